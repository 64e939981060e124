use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{AppError, StoreError};
use crate::machine::{self, CompletePlan};
use crate::models::{
    Assignment, AssignmentRecord, CheckinRecord, Completion, DailyLog, Intervention,
    InterventionState, Scores, Student, StudentStatus,
};
use crate::rules;
use crate::store::Store;

#[derive(Debug, Clone, Default)]
struct Tables {
    students: HashMap<String, Student>,
    daily_logs: Vec<DailyLog>,
    interventions: Vec<Intervention>,
    next_log_id: i64,
    next_intervention_id: i64,
}

impl Tables {
    fn student(&self, student_id: &str) -> Result<&Student, AppError> {
        self.students
            .get(student_id)
            .ok_or(AppError::StudentNotFound)
    }

    fn set_state(&mut self, student_id: &str, state: InterventionState) -> Result<Student, AppError> {
        let student = self
            .students
            .get_mut(student_id)
            .ok_or(AppError::StudentNotFound)?;
        student.intervention_state = state;
        student.state_version += 1;
        Ok(student.clone())
    }

    fn open_intervention(&self, student_id: &str) -> Option<&Intervention> {
        self.interventions
            .iter()
            .filter(|i| i.student_id == student_id && i.is_open())
            .max_by_key(|i| (i.created_at, i.id))
    }

    fn intervention_mut(&mut self, id: i64) -> Option<&mut Intervention> {
        self.interventions.iter_mut().find(|i| i.id == id)
    }

    fn insert_log(&mut self, student_id: &str, scores: Scores, status: String) -> DailyLog {
        self.next_log_id += 1;
        let log = DailyLog {
            id: self.next_log_id,
            student_id: student_id.to_string(),
            quiz_score: scores.quiz_score,
            focus_minutes: scores.focus_minutes,
            status,
            created_at: Utc::now(),
        };
        self.daily_logs.push(log.clone());
        log
    }

    fn insert_intervention(
        &mut self,
        student_id: &str,
        trigger_reason: String,
    ) -> Result<Intervention, AppError> {
        // Mirrors the partial unique index on open interventions.
        if self.open_intervention(student_id).is_some() {
            return Err(StoreError::WriteRejected.into());
        }
        self.next_intervention_id += 1;
        let intervention = Intervention {
            id: self.next_intervention_id,
            student_id: student_id.to_string(),
            trigger_reason,
            assigned_task: None,
            assigned_by: None,
            assigned_at: None,
            completed: false,
            completed_at: None,
            superseded: false,
            created_at: Utc::now(),
        };
        self.interventions.push(intervention.clone());
        Ok(intervention)
    }
}

/// Transitions run on a copy of the tables; the copy is swapped in on success.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    #[cfg(test)]
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn with_students<'a>(students: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>) -> Self {
        let mut tables = Tables::default();
        for (student_id, name, email) in students {
            tables.students.insert(
                student_id.to_string(),
                Student {
                    student_id: student_id.to_string(),
                    name: name.to_string(),
                    email: email.to_string(),
                    intervention_state: InterventionState::Normal,
                    state_version: 0,
                    created_at: Utc::now(),
                },
            );
        }
        Self {
            tables: Mutex::new(tables),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub async fn daily_logs(&self, student_id: &str) -> Vec<DailyLog> {
        let tables = self.tables.lock().await;
        tables
            .daily_logs
            .iter()
            .filter(|log| log.student_id == student_id)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub async fn interventions(&self, student_id: &str) -> Vec<Intervention> {
        let tables = self.tables.lock().await;
        tables
            .interventions
            .iter()
            .filter(|i| i.student_id == student_id)
            .cloned()
            .collect()
    }

    async fn transact<T>(
        &self,
        apply: impl FnOnce(&mut Tables) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut live = self.tables.lock().await;
        let mut draft = live.clone();
        let value = apply(&mut draft)?;

        #[cfg(test)]
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected.into());
        }

        *live = draft;
        Ok(value)
    }
}

impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn student_status(&self, student_id: &str) -> Result<Option<StudentStatus>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.students.get(student_id).map(|student| StudentStatus {
            student: student.clone(),
            intervention: tables.open_intervention(student_id).cloned(),
        }))
    }

    async fn record_checkin(
        &self,
        student_id: &str,
        scores: Scores,
    ) -> Result<CheckinRecord, AppError> {
        self.transact(|tables| {
            let current = tables.student(student_id)?.intervention_state;
            let plan = machine::plan_checkin(current, scores)?;

            if plan.supersede_open {
                let now = Utc::now();
                for intervention in tables
                    .interventions
                    .iter_mut()
                    .filter(|i| i.student_id == student_id && i.is_open())
                {
                    intervention.completed = true;
                    intervention.completed_at = Some(now);
                    intervention.superseded = true;
                }
            }

            let log = tables.insert_log(student_id, scores, plan.log_status.to_string());
            let student = tables.set_state(student_id, plan.next_state)?;
            let intervention = plan
                .open_intervention
                .map(|reason| tables.insert_intervention(student_id, reason))
                .transpose()?;

            Ok(CheckinRecord {
                student,
                log,
                intervention,
            })
        })
        .await
    }

    async fn assign_intervention(
        &self,
        assignment: Assignment,
    ) -> Result<AssignmentRecord, AppError> {
        self.transact(|tables| {
            let current = tables.student(&assignment.student_id)?.intervention_state;
            let target = machine::plan_assign(
                current,
                tables.open_intervention(&assignment.student_id),
                assignment.intervention_id,
            )?;

            let intervention = tables
                .intervention_mut(target)
                .ok_or(AppError::InterventionNotFound)?;
            intervention.assigned_task = Some(assignment.assigned_task.clone());
            intervention.assigned_by = Some(assignment.assigned_by.clone());
            intervention.assigned_at = Some(Utc::now());
            let intervention = intervention.clone();

            let student = tables.set_state(&assignment.student_id, InterventionState::Remedial)?;
            Ok(AssignmentRecord {
                student,
                intervention,
            })
        })
        .await
    }

    async fn complete_intervention(
        &self,
        student_id: &str,
        intervention_id: i64,
    ) -> Result<Completion, AppError> {
        self.transact(|tables| {
            let current = tables.student(student_id)?.intervention_state;
            let target = tables
                .intervention_mut(intervention_id)
                .filter(|i| i.student_id == student_id)
                .ok_or(AppError::InterventionNotFound)?;

            match machine::plan_complete(current, target)? {
                CompletePlan::AlreadyCompleted => Ok(Completion::AlreadyCompleted {
                    intervention: target.clone(),
                    state: current,
                }),
                CompletePlan::Close => {
                    target.completed = true;
                    target.completed_at = Some(Utc::now());
                    let intervention = target.clone();
                    let student = tables.set_state(student_id, InterventionState::Normal)?;
                    Ok(Completion::Closed {
                        student,
                        intervention,
                    })
                }
            }
        })
        .await
    }

    async fn log_penalty(&self, student_id: &str, reason: &str) -> Result<(), AppError> {
        self.transact(|tables| {
            tables.student(student_id)?;
            let zero = Scores {
                quiz_score: 0,
                focus_minutes: 0,
            };
            tables.insert_log(student_id, zero, rules::penalty_status(reason));
            Ok(())
        })
        .await
    }
}
