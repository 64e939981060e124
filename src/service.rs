use std::sync::Arc;

use serde::Serialize;

use crate::assigner::{Assigner, AssignmentRequest};
use crate::error::AppError;
use crate::hub::{NotificationHub, StatusUpdate};
use crate::models::{Assignment, Completion, Intervention, InterventionState, Scores, StudentStatus};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckinResponse {
    pub status: String,
    pub intervention_state: InterventionState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignResponse {
    pub success: bool,
    pub message: String,
    pub intervention: Intervention,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteResponse {
    pub success: bool,
    pub message: String,
    pub intervention_state: InterventionState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PenaltyResponse {
    pub success: bool,
    pub message: String,
}

pub struct InterventionService<S> {
    store: S,
    hub: Arc<NotificationHub>,
    assigner: Arc<dyn Assigner>,
    callback_url: String,
}

impl<S: Store> InterventionService<S> {
    pub fn new(
        store: S,
        hub: Arc<NotificationHub>,
        assigner: Arc<dyn Assigner>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            hub,
            assigner,
            callback_url: callback_url.into(),
        }
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub async fn database_reachable(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "health check could not reach the store");
                false
            }
        }
    }

    pub async fn student_status(&self, student_id: &str) -> Result<StudentStatus, AppError> {
        self.store
            .student_status(student_id)
            .await?
            .ok_or(AppError::StudentNotFound)
    }

    pub async fn checkin(&self, student_id: &str, scores: Scores) -> Result<CheckinResponse, AppError> {
        let record = self.store.record_checkin(student_id, scores).await?;
        let state = record.student.intervention_state;
        tracing::info!(
            %student_id,
            quiz_score = scores.quiz_score,
            focus_minutes = scores.focus_minutes,
            log_status = %record.log.status,
            %state,
            "check-in recorded"
        );

        self.hub
            .notify(student_id, StatusUpdate::new(&record.student, record.intervention.clone()));

        match record.intervention {
            Some(intervention) => {
                tracing::info!(%student_id, intervention_id = intervention.id, "student locked");
                self.assigner.dispatch(AssignmentRequest {
                    student_id: record.student.student_id.clone(),
                    student_name: record.student.name.clone(),
                    student_email: record.student.email.clone(),
                    quiz_score: scores.quiz_score,
                    focus_minutes: scores.focus_minutes,
                    intervention_id: intervention.id,
                    callback_url: self.callback_url.clone(),
                });
                Ok(CheckinResponse {
                    status: "Pending Mentor Review".to_string(),
                    intervention_state: state,
                    message: "Analysis in progress. Waiting for Mentor...".to_string(),
                    intervention_id: Some(intervention.id),
                })
            }
            None => Ok(CheckinResponse {
                status: record.log.status,
                intervention_state: state,
                message: "Great work! Keep it up.".to_string(),
                intervention_id: None,
            }),
        }
    }

    pub async fn assign(&self, assignment: Assignment) -> Result<AssignResponse, AppError> {
        let student_id = assignment.student_id.clone();
        let record = self.store.assign_intervention(assignment).await?;
        tracing::info!(
            %student_id,
            intervention_id = record.intervention.id,
            assigned_by = record.intervention.assigned_by.as_deref().unwrap_or_default(),
            "remedial task assigned"
        );

        self.hub.notify(
            &student_id,
            StatusUpdate::new(&record.student, Some(record.intervention.clone())),
        );

        Ok(AssignResponse {
            success: true,
            message: "Intervention assigned successfully".to_string(),
            intervention: record.intervention,
        })
    }

    pub async fn complete(
        &self,
        student_id: &str,
        intervention_id: i64,
    ) -> Result<CompleteResponse, AppError> {
        match self
            .store
            .complete_intervention(student_id, intervention_id)
            .await?
        {
            Completion::Closed {
                student,
                intervention,
            } => {
                tracing::info!(%student_id, intervention_id = intervention.id, "remedial task completed");
                self.hub.notify(student_id, StatusUpdate::new(&student, None));
                Ok(CompleteResponse {
                    success: true,
                    message: "Task completed successfully".to_string(),
                    intervention_state: student.intervention_state,
                })
            }
            Completion::AlreadyCompleted {
                intervention,
                state,
            } => {
                tracing::info!(
                    %student_id,
                    intervention_id = intervention.id,
                    superseded = intervention.superseded,
                    "task already closed"
                );
                let message = if intervention.superseded {
                    "Task was closed by a later check-in"
                } else {
                    "Task already completed"
                };
                Ok(CompleteResponse {
                    success: true,
                    message: message.to_string(),
                    intervention_state: state,
                })
            }
        }
    }

    pub async fn log_penalty(&self, student_id: &str, reason: &str) -> Result<PenaltyResponse, AppError> {
        self.store.log_penalty(student_id, reason).await?;
        tracing::warn!(%student_id, %reason, "penalty logged");
        Ok(PenaltyResponse {
            success: true,
            message: "Penalty logged".to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::assigner::WebhookAssigner;
    use crate::memory::MemoryStore;

    #[derive(Default)]
    pub(crate) struct RecordingAssigner {
        pub(crate) requests: Mutex<Vec<AssignmentRequest>>,
    }

    impl Assigner for RecordingAssigner {
        fn dispatch(&self, request: AssignmentRequest) {
            self.requests.lock().unwrap().push(request);
        }
    }

    pub(crate) const CALLBACK: &str = "http://localhost:5000/api/assign-intervention";

    fn service() -> (InterventionService<MemoryStore>, Arc<RecordingAssigner>) {
        let assigner = Arc::new(RecordingAssigner::default());
        let store = MemoryStore::with_students([
            ("S1", "Maya Chen", "maya.chen@example.edu"),
            ("S2", "Tomas Okafor", "tomas.okafor@example.edu"),
        ]);
        let service = InterventionService::new(
            store,
            Arc::new(NotificationHub::new()),
            assigner.clone(),
            CALLBACK,
        );
        (service, assigner)
    }

    fn scores(quiz_score: i32, focus_minutes: i32) -> Scores {
        Scores {
            quiz_score,
            focus_minutes,
        }
    }

    fn listen(service: &InterventionService<MemoryStore>, student_id: &str) -> mpsc::UnboundedReceiver<StatusUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        service.hub().register(student_id, Uuid::new_v4(), tx);
        rx
    }

    fn assignment(intervention_id: i64, task: &str) -> Assignment {
        Assignment {
            student_id: "S1".to_string(),
            intervention_id: Some(intervention_id),
            assigned_task: task.to_string(),
            assigned_by: "Mentor".to_string(),
        }
    }

    #[tokio::test]
    async fn full_lifecycle_scenario() {
        let (service, assigner) = service();

        let on_track = service.checkin("S1", scores(9, 90)).await.unwrap();
        assert_eq!(on_track.status, "On Track");
        assert_eq!(on_track.intervention_state, InterventionState::Normal);
        assert!(on_track.intervention_id.is_none());

        let locked = service.checkin("S1", scores(3, 10)).await.unwrap();
        assert_eq!(locked.intervention_state, InterventionState::Locked);
        let id = locked.intervention_id.unwrap();

        let requests = assigner.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].intervention_id, id);
        assert_eq!(requests[0].student_name, "Maya Chen");
        assert_eq!(requests[0].callback_url, CALLBACK);

        let assigned = service.assign(assignment(id, "Review Ch.3")).await.unwrap();
        assert!(assigned.success);

        let status = service.student_status("S1").await.unwrap();
        assert_eq!(status.student.intervention_state, InterventionState::Remedial);
        assert_eq!(
            status.intervention.unwrap().assigned_task.as_deref(),
            Some("Review Ch.3")
        );

        let done = service.complete("S1", id).await.unwrap();
        assert_eq!(done.intervention_state, InterventionState::Normal);
        let status = service.student_status("S1").await.unwrap();
        assert_eq!(status.student.intervention_state, InterventionState::Normal);
        assert!(status.intervention.is_none());
    }

    #[tokio::test]
    async fn each_committed_transition_pushes_one_matching_update() {
        let (service, _) = service();
        let mut rx = listen(&service, "S1");

        let id = service
            .checkin("S1", scores(3, 10))
            .await
            .unwrap()
            .intervention_id
            .unwrap();
        let locked = rx.try_recv().unwrap();
        assert_eq!(locked.intervention_state, InterventionState::Locked);
        assert!(rx.try_recv().is_err());

        service.assign(assignment(id, "Review Ch.3")).await.unwrap();
        let remedial = rx.try_recv().unwrap();
        assert_eq!(remedial.status, "Remedial");
        assert_eq!(
            remedial.intervention.and_then(|i| i.assigned_task).as_deref(),
            Some("Review Ch.3")
        );

        service.complete("S1", id).await.unwrap();
        let normal = rx.try_recv().unwrap();
        assert_eq!(normal.intervention_state, InterventionState::Normal);
        assert!(rx.try_recv().is_err());

        assert!(locked.version < remedial.version);
        assert!(remedial.version < normal.version);
        let status = service.student_status("S1").await.unwrap();
        assert_eq!(status.student.state_version, normal.version);
    }

    #[tokio::test]
    async fn pushes_from_concurrent_checkins_carry_distinct_versions() {
        let (service, _) = service();
        let service = Arc::new(service);
        let mut rx = listen(&service, "S1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.checkin("S1", scores(9, 90)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut versions = Vec::new();
        while let Ok(update) = rx.try_recv() {
            versions.push(update.version);
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<i64>>());

        let status = service.student_status("S1").await.unwrap();
        assert_eq!(status.student.state_version, 8);
    }

    #[tokio::test]
    async fn transition_commits_without_a_live_channel() {
        let (service, _) = service();
        let response = service.checkin("S2", scores(8, 61)).await.unwrap();
        assert_eq!(response.intervention_state, InterventionState::Normal);
    }

    #[tokio::test]
    async fn failed_transaction_sends_nothing() {
        let assigner = Arc::new(RecordingAssigner::default());
        let store = MemoryStore::with_students([("S1", "Maya Chen", "maya.chen@example.edu")]);
        store.fail_writes(true);
        let service = InterventionService::new(
            store,
            Arc::new(NotificationHub::new()),
            assigner.clone(),
            CALLBACK,
        );
        let mut rx = listen(&service, "S1");

        let err = service.checkin("S1", scores(3, 10)).await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert!(rx.try_recv().is_err());
        assert!(assigner.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_commits_even_when_assigner_is_unreachable() {
        let assigner =
            WebhookAssigner::new(Some("http://127.0.0.1:9/webhook".to_string())).unwrap();
        let store = MemoryStore::with_students([("S1", "Maya Chen", "maya.chen@example.edu")]);
        let service =
            InterventionService::new(store, Arc::new(NotificationHub::new()), Arc::new(assigner), CALLBACK);

        let response = service.checkin("S1", scores(1, 5)).await.unwrap();
        assert_eq!(response.intervention_state, InterventionState::Locked);
        let status = service.student_status("S1").await.unwrap();
        assert_eq!(status.student.intervention_state, InterventionState::Locked);
        assert!(status.intervention.is_some());
    }

    #[tokio::test]
    async fn completing_twice_is_a_no_op() {
        let (service, _) = service();
        let id = service
            .checkin("S1", scores(3, 10))
            .await
            .unwrap()
            .intervention_id
            .unwrap();
        service.assign(assignment(id, "Review Ch.3")).await.unwrap();
        service.complete("S1", id).await.unwrap();

        let mut rx = listen(&service, "S1");
        let again = service.complete("S1", id).await.unwrap();
        assert!(again.success);
        assert_eq!(again.message, "Task already completed");
        assert_eq!(again.intervention_state, InterventionState::Normal);
        assert!(rx.try_recv().is_err());

        let status = service.student_status("S1").await.unwrap();
        assert!(status.intervention.is_none());
    }

    #[tokio::test]
    async fn completing_a_superseded_task_says_so() {
        let (service, _) = service();
        let id = service
            .checkin("S1", scores(3, 10))
            .await
            .unwrap()
            .intervention_id
            .unwrap();
        service.assign(assignment(id, "Review Ch.3")).await.unwrap();
        service.checkin("S1", scores(9, 90)).await.unwrap();

        let mut rx = listen(&service, "S1");
        let response = service.complete("S1", id).await.unwrap();
        assert!(response.success);
        assert_eq!(response.message, "Task was closed by a later check-in");
        assert_eq!(response.intervention_state, InterventionState::Normal);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn completing_before_assignment_is_rejected() {
        let (service, _) = service();
        let id = service
            .checkin("S1", scores(3, 10))
            .await
            .unwrap()
            .intervention_id
            .unwrap();
        let err = service.complete("S1", id).await.unwrap_err();
        assert!(matches!(err, AppError::Transition(_)));
    }

    #[tokio::test]
    async fn foreign_intervention_is_not_found() {
        let (service, _) = service();
        let id = service
            .checkin("S1", scores(3, 10))
            .await
            .unwrap()
            .intervention_id
            .unwrap();
        let err = service.complete("S2", id).await.unwrap_err();
        assert!(matches!(err, AppError::InterventionNotFound));
    }

    #[tokio::test]
    async fn concurrent_checkins_leave_a_consistent_student() {
        let (service, _) = service();
        let service = Arc::new(service);

        let handles: Vec<_> = [scores(9, 90), scores(3, 10), scores(9, 90), scores(2, 2)]
            .into_iter()
            .map(|s| {
                let service = service.clone();
                tokio::spawn(async move { service.checkin("S1", s).await })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(AppError::Transition(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(accepted >= 1);

        let status = service.student_status("S1").await.unwrap();
        match status.student.intervention_state {
            InterventionState::Locked => {
                let open = status.intervention.unwrap();
                assert!(open.assigned_task.is_none());
            }
            InterventionState::Normal => assert!(status.intervention.is_none()),
            InterventionState::Remedial => panic!("no assignment was made"),
        }
    }
}
