use std::future::Future;

use crate::error::AppError;
use crate::models::{
    Assignment, AssignmentRecord, CheckinRecord, Completion, Scores, StudentStatus,
};

/// Each transition commits all of its writes or none, serialized per student.
pub trait Store: Send + Sync + 'static {
    fn ping(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn student_status(
        &self,
        student_id: &str,
    ) -> impl Future<Output = Result<Option<StudentStatus>, AppError>> + Send;

    fn record_checkin(
        &self,
        student_id: &str,
        scores: Scores,
    ) -> impl Future<Output = Result<CheckinRecord, AppError>> + Send;

    fn assign_intervention(
        &self,
        assignment: Assignment,
    ) -> impl Future<Output = Result<AssignmentRecord, AppError>> + Send;

    fn complete_intervention(
        &self,
        student_id: &str,
        intervention_id: i64,
    ) -> impl Future<Output = Result<Completion, AppError>> + Send;

    /// Appends a penalty row to the daily log. No state change.
    fn log_penalty(
        &self,
        student_id: &str,
        reason: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
