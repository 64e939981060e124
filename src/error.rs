use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::machine::TransitionError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Injected by the in-memory store to exercise rollback paths.
    #[error("write rejected by in-memory store")]
    WriteRejected,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Student not found")]
    StudentNotFound,

    #[error("Intervention not found")]
    InterventionNotFound,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::StudentNotFound | AppError::InterventionNotFound => StatusCode::NOT_FOUND,
            AppError::Transition(err) => err.status_code(),
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Persistence(StoreError::Database(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Persistence(err) => {
                tracing::error!(error = %err, "transaction rolled back");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
