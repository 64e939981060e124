use crate::models::Scores;

pub const QUIZ_PASS_ABOVE: i32 = 7;
pub const FOCUS_PASS_ABOVE: i32 = 60;

pub const STATUS_ON_TRACK: &str = "On Track";
pub const STATUS_NEEDS_INTERVENTION: &str = "Needs Intervention";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub pass: bool,
}

/// Both thresholds are strict: a quiz score of exactly 7 or exactly 60 focus
/// minutes fails.
pub fn evaluate(quiz_score: i32, focus_minutes: i32) -> Evaluation {
    Evaluation {
        pass: quiz_score > QUIZ_PASS_ABOVE && focus_minutes > FOCUS_PASS_ABOVE,
    }
}

pub fn log_status(evaluation: Evaluation) -> &'static str {
    if evaluation.pass {
        STATUS_ON_TRACK
    } else {
        STATUS_NEEDS_INTERVENTION
    }
}

pub fn trigger_reason(scores: Scores) -> String {
    format!(
        "Low performance: Quiz={}, Focus={}min",
        scores.quiz_score, scores.focus_minutes
    )
}

pub fn penalty_status(reason: &str) -> String {
    format!("Penalty: {reason}")
}
