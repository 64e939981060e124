use anyhow::Context;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::AppError;
use crate::machine::{self, CompletePlan};
use crate::models::{
    Assignment, AssignmentRecord, CheckinRecord, Completion, DailyLog, Intervention,
    InterventionState, Scores, Student, StudentStatus,
};
use crate::rules;
use crate::store::Store;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub const DEMO_STUDENTS: [(&str, &str, &str); 3] = [
    ("S1", "Maya Chen", "maya.chen@example.edu"),
    ("S2", "Tomas Okafor", "tomas.okafor@example.edu"),
    ("S3", "Priya Raman", "priya.raman@example.edu"),
];

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    for (student_id, name, email) in DEMO_STUDENTS {
        upsert_student(pool, student_id, name, email).await?;
    }
    Ok(())
}

/// Upserts students from a `student_id,name,email` CSV. Returns the number of
/// rows that created a new student; existing students keep their state.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        name: String,
        email: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        if row.student_id.trim().is_empty() {
            anyhow::bail!("student_id must not be empty (row for {})", row.email);
        }
        if upsert_student(pool, row.student_id.trim(), &row.name, &row.email).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

async fn upsert_student(
    pool: &PgPool,
    student_id: &str,
    name: &str,
    email: &str,
) -> anyhow::Result<bool> {
    let inserted: bool = sqlx::query(
        r#"
        INSERT INTO intervention_gate.students (student_id, name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (student_id) DO UPDATE
        SET name = EXCLUDED.name, email = EXCLUDED.email
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(student_id)
    .bind(name)
    .bind(email)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert student {student_id}"))?
    .get("inserted");

    Ok(inserted)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn student_from_row(row: &PgRow) -> Result<Student, sqlx::Error> {
    let state: String = row.try_get("intervention_state")?;
    Ok(Student {
        student_id: row.try_get("student_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        intervention_state: state
            .parse::<InterventionState>()
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?,
        state_version: row.try_get("state_version")?,
        created_at: row.try_get("created_at")?,
    })
}

fn intervention_from_row(row: &PgRow) -> Result<Intervention, sqlx::Error> {
    Ok(Intervention {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        trigger_reason: row.try_get("trigger_reason")?,
        assigned_task: row.try_get("assigned_task")?,
        assigned_by: row.try_get("assigned_by")?,
        assigned_at: row.try_get("assigned_at")?,
        completed: row.try_get("completed")?,
        completed_at: row.try_get("completed_at")?,
        superseded: row.try_get("superseded")?,
        created_at: row.try_get("created_at")?,
    })
}

fn log_from_row(row: &PgRow) -> Result<DailyLog, sqlx::Error> {
    Ok(DailyLog {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        quiz_score: row.try_get("quiz_score")?,
        focus_minutes: row.try_get("focus_minutes")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Takes the row lock that serializes transitions for one student.
async fn lock_student(
    tx: &mut Transaction<'_, Postgres>,
    student_id: &str,
) -> Result<Student, AppError> {
    let row = sqlx::query("SELECT * FROM intervention_gate.students WHERE student_id = $1 FOR UPDATE")
        .bind(student_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::StudentNotFound)?;
    Ok(student_from_row(&row)?)
}

async fn open_intervention_for_update(
    tx: &mut Transaction<'_, Postgres>,
    student_id: &str,
) -> Result<Option<Intervention>, AppError> {
    let row = sqlx::query(
        r#"
        SELECT * FROM intervention_gate.interventions
        WHERE student_id = $1 AND completed = false
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(student_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.as_ref().map(intervention_from_row).transpose()?)
}

async fn set_state(
    tx: &mut Transaction<'_, Postgres>,
    student_id: &str,
    state: InterventionState,
) -> Result<Student, AppError> {
    let row = sqlx::query(
        r#"
        UPDATE intervention_gate.students
        SET intervention_state = $1, state_version = state_version + 1
        WHERE student_id = $2
        RETURNING *
        "#,
    )
    .bind(state.as_str())
    .bind(student_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(student_from_row(&row)?)
}

async fn insert_log(
    tx: &mut Transaction<'_, Postgres>,
    student_id: &str,
    scores: Scores,
    status: &str,
) -> Result<DailyLog, AppError> {
    let row = sqlx::query(
        r#"
        INSERT INTO intervention_gate.daily_logs (student_id, quiz_score, focus_minutes, status)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(student_id)
    .bind(scores.quiz_score)
    .bind(scores.focus_minutes)
    .bind(status)
    .fetch_one(&mut **tx)
    .await?;
    Ok(log_from_row(&row)?)
}

impl Store for PgStore {
    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn student_status(&self, student_id: &str) -> Result<Option<StudentStatus>, AppError> {
        let Some(row) = sqlx::query("SELECT * FROM intervention_gate.students WHERE student_id = $1")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let student = student_from_row(&row)?;

        let intervention = sqlx::query(
            r#"
            SELECT * FROM intervention_gate.interventions
            WHERE student_id = $1 AND completed = false
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(intervention_from_row)
        .transpose()?;

        Ok(Some(StudentStatus {
            student,
            intervention,
        }))
    }

    async fn record_checkin(
        &self,
        student_id: &str,
        scores: Scores,
    ) -> Result<CheckinRecord, AppError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_student(&mut tx, student_id).await?;
        let plan = machine::plan_checkin(current.intervention_state, scores)?;

        if plan.supersede_open {
            sqlx::query(
                r#"
                UPDATE intervention_gate.interventions
                SET completed = true, completed_at = NOW(), superseded = true
                WHERE student_id = $1 AND completed = false
                "#,
            )
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        }

        let log = insert_log(&mut tx, student_id, scores, plan.log_status).await?;
        let student = set_state(&mut tx, student_id, plan.next_state).await?;

        let intervention = match plan.open_intervention {
            Some(reason) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO intervention_gate.interventions (student_id, trigger_reason)
                    VALUES ($1, $2)
                    RETURNING *
                    "#,
                )
                .bind(student_id)
                .bind(reason)
                .fetch_one(&mut *tx)
                .await?;
                Some(intervention_from_row(&row)?)
            }
            None => None,
        };

        tx.commit().await?;

        Ok(CheckinRecord {
            student,
            log,
            intervention,
        })
    }

    async fn assign_intervention(
        &self,
        assignment: Assignment,
    ) -> Result<AssignmentRecord, AppError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_student(&mut tx, &assignment.student_id).await?;
        let open = open_intervention_for_update(&mut tx, &assignment.student_id).await?;
        let target = machine::plan_assign(
            current.intervention_state,
            open.as_ref(),
            assignment.intervention_id,
        )?;

        let row = sqlx::query(
            r#"
            UPDATE intervention_gate.interventions
            SET assigned_task = $1, assigned_by = $2, assigned_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(&assignment.assigned_task)
        .bind(&assignment.assigned_by)
        .bind(target)
        .fetch_one(&mut *tx)
        .await?;
        let intervention = intervention_from_row(&row)?;

        let student = set_state(&mut tx, &assignment.student_id, InterventionState::Remedial).await?;
        tx.commit().await?;

        Ok(AssignmentRecord {
            student,
            intervention,
        })
    }

    async fn complete_intervention(
        &self,
        student_id: &str,
        intervention_id: i64,
    ) -> Result<Completion, AppError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_student(&mut tx, student_id).await?;

        let row = sqlx::query(
            "SELECT * FROM intervention_gate.interventions WHERE id = $1 AND student_id = $2 FOR UPDATE",
        )
        .bind(intervention_id)
        .bind(student_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::InterventionNotFound)?;
        let target = intervention_from_row(&row)?;

        match machine::plan_complete(current.intervention_state, &target)? {
            CompletePlan::AlreadyCompleted => {
                tx.rollback().await?;
                Ok(Completion::AlreadyCompleted {
                    intervention: target,
                    state: current.intervention_state,
                })
            }
            CompletePlan::Close => {
                let row = sqlx::query(
                    r#"
                    UPDATE intervention_gate.interventions
                    SET completed = true, completed_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(intervention_id)
                .fetch_one(&mut *tx)
                .await?;
                let intervention = intervention_from_row(&row)?;

                let student = set_state(&mut tx, student_id, InterventionState::Normal).await?;
                tx.commit().await?;
                Ok(Completion::Closed {
                    student,
                    intervention,
                })
            }
        }
    }

    async fn log_penalty(&self, student_id: &str, reason: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        // FOR SHARE: a penalty never changes state.
        sqlx::query("SELECT 1 FROM intervention_gate.students WHERE student_id = $1 FOR SHARE")
            .bind(student_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::StudentNotFound)?;

        let zero = Scores {
            quiz_score: 0,
            focus_minutes: 0,
        };
        insert_log(&mut tx, student_id, zero, &rules::penalty_status(reason)).await?;
        tx.commit().await?;
        Ok(())
    }
}
