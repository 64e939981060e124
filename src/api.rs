use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::error::AppError;
use crate::models::{Assignment, Scores, StudentStatus};
use crate::service::{
    AssignResponse, CheckinResponse, CompleteResponse, InterventionService, PenaltyResponse,
};
use crate::socket;
use crate::store::Store;

pub const DEFAULT_ASSIGNED_BY: &str = "Mentor";

pub type SharedService<S> = Arc<InterventionService<S>>;

pub fn router<S: Store>(service: SharedService<S>) -> Router {
    let api = Router::new()
        .route("/student/:student_id", get(student_status::<S>))
        .route("/daily-checkin", post(daily_checkin::<S>))
        .route("/assign-intervention", post(assign_intervention::<S>))
        .route("/complete-task", post(complete_task::<S>))
        .route("/log-penalty", post(log_penalty::<S>));

    Router::new()
        .route("/health", get(health::<S>))
        .route("/ws", get(socket::connect::<S>))
        .nest("/api", api)
        .layer(cors())
        .with_state(service)
}

// The web build of the client calls the API from another origin.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::validation(rejection.body_text()))
}

fn required_text(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::validation(format!("{field} is required")))
}

fn required_count(value: Option<i64>, field: &str) -> Result<i32, AppError> {
    let value = value.ok_or_else(|| AppError::validation(format!("{field} is required")))?;
    if value < 0 {
        return Err(AppError::validation(format!("{field} must be non-negative")));
    }
    i32::try_from(value)
        .map_err(|_| AppError::validation(format!("{field} must be at most {}", i32::MAX)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdField {
    Number(i64),
    Text(String),
}

/// Accepts an id as a JSON number or a numeric string.
fn flexible_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<IdField>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IdField::Number(id)) => Ok(Some(id)),
        Some(IdField::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("intervention_id must be an integer, got '{text}'"))),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub database: &'static str,
}

async fn health<S: Store>(State(service): State<SharedService<S>>) -> Json<HealthResponse> {
    let database = if service.database_reachable().await {
        "connected"
    } else {
        "unreachable"
    };
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
        database,
    })
}

async fn student_status<S: Store>(
    State(service): State<SharedService<S>>,
    Path(student_id): Path<String>,
) -> Result<Json<StudentStatus>, AppError> {
    tracing::debug!(%student_id, "student status requested");
    Ok(Json(service.student_status(&student_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CheckinRequest {
    pub student_id: Option<String>,
    pub quiz_score: Option<i64>,
    pub focus_minutes: Option<i64>,
}

async fn daily_checkin<S: Store>(
    State(service): State<SharedService<S>>,
    payload: Result<Json<CheckinRequest>, JsonRejection>,
) -> Result<Json<CheckinResponse>, AppError> {
    let request = body(payload)?;
    let student_id = required_text(request.student_id, "student_id")?;
    let scores = Scores {
        quiz_score: required_count(request.quiz_score, "quiz_score")?,
        focus_minutes: required_count(request.focus_minutes, "focus_minutes")?,
    };
    Ok(Json(service.checkin(&student_id, scores).await?))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub student_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_id")]
    pub intervention_id: Option<i64>,
    pub assigned_task: Option<String>,
    pub assigned_by: Option<String>,
}

async fn assign_intervention<S: Store>(
    State(service): State<SharedService<S>>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<AssignResponse>, AppError> {
    let request = body(payload)?;
    let assignment = Assignment {
        student_id: required_text(request.student_id, "student_id")?,
        intervention_id: request.intervention_id,
        assigned_task: required_text(request.assigned_task, "assigned_task")?,
        assigned_by: request
            .assigned_by
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ASSIGNED_BY.to_string()),
    };
    Ok(Json(service.assign(assignment).await?))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub student_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_id")]
    pub intervention_id: Option<i64>,
}

async fn complete_task<S: Store>(
    State(service): State<SharedService<S>>,
    payload: Result<Json<CompleteRequest>, JsonRejection>,
) -> Result<Json<CompleteResponse>, AppError> {
    let request = body(payload)?;
    let student_id = required_text(request.student_id, "student_id")?;
    let intervention_id = request
        .intervention_id
        .ok_or_else(|| AppError::validation("intervention_id is required"))?;
    Ok(Json(service.complete(&student_id, intervention_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PenaltyRequest {
    pub student_id: Option<String>,
    pub reason: Option<String>,
}

async fn log_penalty<S: Store>(
    State(service): State<SharedService<S>>,
    payload: Result<Json<PenaltyRequest>, JsonRejection>,
) -> Result<Json<PenaltyResponse>, AppError> {
    let request = body(payload)?;
    let student_id = required_text(request.student_id, "student_id")?;
    let reason = required_text(request.reason, "reason")?;
    Ok(Json(service.log_penalty(&student_id, &reason).await?))
}
