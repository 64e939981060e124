use axum::http::StatusCode;

use crate::models::{Intervention, InterventionState, Scores};
use crate::rules;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("check-in rejected: student is locked until a remedial task is assigned")]
    CheckinWhileLocked,
    #[error("cannot assign a task while the student is {0}")]
    NotLocked(InterventionState),
    #[error("student is locked but has no open intervention")]
    NoOpenIntervention,
    #[error("intervention {requested} is not the student's open intervention")]
    NotOpenIntervention { requested: i64 },
    #[error("intervention {0} has no assigned task yet")]
    TaskNotAssigned(i64),
    #[error("cannot complete a task while the student is {0}")]
    NotRemedial(InterventionState),
}

impl TransitionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TransitionError::NotOpenIntervention { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::CONFLICT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckinPlan {
    pub log_status: &'static str,
    pub next_state: InterventionState,
    pub supersede_open: bool,
    pub open_intervention: Option<String>,
}

pub fn plan_checkin(
    current: InterventionState,
    scores: Scores,
) -> Result<CheckinPlan, TransitionError> {
    if current == InterventionState::Locked {
        return Err(TransitionError::CheckinWhileLocked);
    }

    let evaluation = rules::evaluate(scores.quiz_score, scores.focus_minutes);
    let supersede_open = current == InterventionState::Remedial;

    Ok(if evaluation.pass {
        CheckinPlan {
            log_status: rules::log_status(evaluation),
            next_state: InterventionState::Normal,
            supersede_open,
            open_intervention: None,
        }
    } else {
        CheckinPlan {
            log_status: rules::log_status(evaluation),
            next_state: InterventionState::Locked,
            supersede_open,
            open_intervention: Some(rules::trigger_reason(scores)),
        }
    })
}

/// Returns the id of the intervention that receives the task.
pub fn plan_assign(
    current: InterventionState,
    open: Option<&Intervention>,
    requested: Option<i64>,
) -> Result<i64, TransitionError> {
    if current != InterventionState::Locked {
        return Err(TransitionError::NotLocked(current));
    }
    let open = open.ok_or(TransitionError::NoOpenIntervention)?;
    match requested {
        Some(id) if id != open.id => Err(TransitionError::NotOpenIntervention { requested: id }),
        _ => Ok(open.id),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletePlan {
    Close,
    AlreadyCompleted,
}

pub fn plan_complete(
    current: InterventionState,
    target: &Intervention,
) -> Result<CompletePlan, TransitionError> {
    if target.completed {
        return Ok(CompletePlan::AlreadyCompleted);
    }
    if target.assigned_task.is_none() {
        return Err(TransitionError::TaskNotAssigned(target.id));
    }
    if current != InterventionState::Remedial {
        return Err(TransitionError::NotRemedial(current));
    }
    Ok(CompletePlan::Close)
}
