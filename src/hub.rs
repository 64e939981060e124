use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{Intervention, InterventionState, Student};

pub type ChannelId = Uuid;

/// Payload of the `status-update` push event. Pushes for one student can
/// arrive out of commit order; clients keep the highest `version` seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub status: String,
    pub intervention_state: InterventionState,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention: Option<Intervention>,
}

impl StatusUpdate {
    pub fn new(student: &Student, intervention: Option<Intervention>) -> Self {
        Self {
            status: student.intervention_state.as_str().to_string(),
            intervention_state: student.intervention_state,
            version: student.state_version,
            intervention,
        }
    }
}

struct Subscriber {
    channel: ChannelId,
    sender: mpsc::UnboundedSender<StatusUpdate>,
}

#[derive(Default)]
pub struct NotificationHub {
    subscribers: Mutex<HashMap<String, Subscriber>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<String, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        &self,
        student_id: impl Into<String>,
        channel: ChannelId,
        sender: mpsc::UnboundedSender<StatusUpdate>,
    ) {
        let student_id = student_id.into();
        let replaced = self
            .subscribers()
            .insert(student_id.clone(), Subscriber { channel, sender });
        match replaced {
            Some(previous) if previous.channel != channel => tracing::info!(
                %student_id, %channel, previous = %previous.channel,
                "student re-registered, previous channel replaced"
            ),
            _ => tracing::info!(%student_id, %channel, "student registered"),
        }
    }

    pub fn unregister(&self, channel: ChannelId) -> usize {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|student_id, subscriber| {
            let keep = subscriber.channel != channel;
            if !keep {
                tracing::info!(%student_id, %channel, "student disconnected");
            }
            keep
        });
        before - subscribers.len()
    }

    pub fn notify(&self, student_id: &str, update: StatusUpdate) -> bool {
        let mut subscribers = self.subscribers();
        let Some(subscriber) = subscribers.get(student_id) else {
            tracing::debug!(%student_id, "no live channel, status update dropped");
            return false;
        };

        if subscriber.sender.send(update).is_ok() {
            tracing::debug!(%student_id, channel = %subscriber.channel, "status update sent");
            true
        } else {
            tracing::debug!(%student_id, channel = %subscriber.channel, "stale channel pruned");
            subscribers.remove(student_id);
            false
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers().len()
    }
}
