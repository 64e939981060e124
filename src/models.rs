use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterventionState {
    Normal,
    Locked,
    Remedial,
}

impl InterventionState {
    pub fn as_str(self) -> &'static str {
        match self {
            InterventionState::Normal => "Normal",
            InterventionState::Locked => "Locked",
            InterventionState::Remedial => "Remedial",
        }
    }
}

impl fmt::Display for InterventionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown intervention state '{0}'")]
pub struct UnknownState(pub String);

impl FromStr for InterventionState {
    type Err = UnknownState;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Normal" => Ok(InterventionState::Normal),
            "Locked" => Ok(InterventionState::Locked),
            "Remedial" => Ok(InterventionState::Remedial),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scores {
    pub quiz_score: i32,
    pub focus_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub intervention_state: InterventionState,
    /// Bumped on every committed transition.
    pub state_version: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyLog {
    pub id: i64,
    pub student_id: String,
    pub quiz_score: i32,
    pub focus_minutes: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intervention {
    pub id: i64,
    pub student_id: String,
    pub trigger_reason: String,
    pub assigned_task: Option<String>,
    pub assigned_by: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
}

impl Intervention {
    pub fn is_open(&self) -> bool {
        !self.completed
    }
}

/// Read model served by `GET /api/student/:student_id`.
#[derive(Debug, Clone, Serialize)]
pub struct StudentStatus {
    pub student: Student,
    pub intervention: Option<Intervention>,
}

#[derive(Debug, Clone)]
pub struct CheckinRecord {
    pub student: Student,
    pub log: DailyLog,
    pub intervention: Option<Intervention>,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub student_id: String,
    pub intervention_id: Option<i64>,
    pub assigned_task: String,
    pub assigned_by: String,
}

#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub student: Student,
    pub intervention: Intervention,
}

#[derive(Debug, Clone)]
pub enum Completion {
    Closed {
        student: Student,
        intervention: Intervention,
    },
    AlreadyCompleted {
        intervention: Intervention,
        state: InterventionState,
    },
}
