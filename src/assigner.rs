use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde::Serialize;

/// Body posted to the assigner webhook when a student is locked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentRequest {
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub quiz_score: i32,
    pub focus_minutes: i32,
    pub intervention_id: i64,
    pub callback_url: String,
}

/// Fire-and-forget: implementations must not block the caller.
pub trait Assigner: Send + Sync {
    fn dispatch(&self, request: AssignmentRequest);
}

pub struct WebhookAssigner {
    client: Client,
    webhook_url: Option<String>,
}

impl WebhookAssigner {
    pub fn new(webhook_url: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build assigner HTTP client")?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }
}

impl Assigner for WebhookAssigner {
    fn dispatch(&self, request: AssignmentRequest) {
        let Some(url) = self.webhook_url.clone() else {
            tracing::warn!(
                student_id = %request.student_id,
                intervention_id = request.intervention_id,
                "assigner webhook not configured, skipping dispatch"
            );
            return;
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&request)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            match result {
                Ok(response) => tracing::info!(
                    student_id = %request.student_id,
                    intervention_id = request.intervention_id,
                    status = %response.status(),
                    "assigner webhook triggered"
                ),
                Err(err) => tracing::error!(
                    student_id = %request.student_id,
                    intervention_id = request.intervention_id,
                    error = %err,
                    "assigner webhook failed"
                ),
            }
        });
    }
}
