use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::types::*;
use crate::audit::{AuditAction, AuditEntry};
use crate::errors::AppError;
use crate::store::IdeaStore;

/// Postgres-backed ideas and their audit log.
#[derive(Clone)]
pub struct PgIdeaStore {
    pool: PgPool,
}

const IDEA_COLUMNS: &str = "id, title, submitted_by, category_id, target_division_id, target_department_id, \
     saving_cost, event_id, workflow_id, max_stage, current_stage, current_status, approved_stages, \
     is_rejected, rejection_reason, is_deleted, version, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct IdeaRow {
    id: i64,
    title: String,
    submitted_by: i64,
    category_id: String,
    target_division_id: String,
    target_department_id: String,
    saving_cost: f64,
    event_id: Option<String>,
    workflow_id: Option<i64>,
    max_stage: i32,
    current_stage: i32,
    current_status: String,
    approved_stages: Vec<i32>,
    is_rejected: bool,
    rejection_reason: Option<String>,
    is_deleted: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IdeaRow> for Idea {
    type Error = AppError;

    fn try_from(row: IdeaRow) -> Result<Self, Self::Error> {
        Ok(Idea {
            id: row.id,
            title: row.title,
            submitted_by: row.submitted_by,
            category_id: row.category_id,
            target_division_id: row.target_division_id,
            target_department_id: row.target_department_id,
            saving_cost: row.saving_cost,
            event_id: row.event_id,
            workflow_id: row.workflow_id,
            max_stage: row.max_stage,
            current_stage: row.current_stage,
            current_status: row.current_status.parse()?,
            approved_stages: row.approved_stages,
            is_rejected: row.is_rejected,
            rejection_reason: row.rejection_reason,
            is_deleted: row.is_deleted,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    idea_id: i64,
    action: String,
    actor_id: i64,
    from_stage: i32,
    from_status: String,
    to_stage: i32,
    to_status: String,
    workflow_from: Option<i64>,
    workflow_to: Option<i64>,
    reason: Option<String>,
    details: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AppError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let details = serde_json::from_str(&row.details).map_err(|e| {
            AppError::Validation(format!("audit details for idea #{} are not valid JSON: {e}", row.idea_id))
        })?;
        Ok(AuditEntry {
            idea_id: row.idea_id,
            action: row.action.parse::<AuditAction>()?,
            actor_id: row.actor_id,
            from: StageState {
                stage: row.from_stage,
                status: row.from_status.parse()?,
            },
            to: StageState {
                stage: row.to_stage,
                status: row.to_status.parse()?,
            },
            workflow_from: row.workflow_from,
            workflow_to: row.workflow_to,
            reason: row.reason,
            details,
            recorded_at: row.recorded_at,
        })
    }
}

impl PgIdeaStore {
    pub fn new(pool: PgPool) -> Self {
        PgIdeaStore { pool }
    }
}

#[async_trait]
impl IdeaStore for PgIdeaStore {
    async fn insert(&self, input: &NewIdea) -> Result<Idea, AppError> {
        let row = sqlx::query_as::<_, IdeaRow>(&format!(
            "INSERT INTO ideas (title, submitted_by, category_id, target_division_id, target_department_id, \
                                saving_cost, event_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {IDEA_COLUMNS}"
        ))
        .bind(&input.title)
        .bind(input.submitted_by)
        .bind(&input.category_id)
        .bind(&input.target_division_id)
        .bind(&input.target_department_id)
        .bind(input.saving_cost)
        .bind(&input.event_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Idea>, AppError> {
        let row = sqlx::query_as::<_, IdeaRow>(&format!("SELECT {IDEA_COLUMNS} FROM ideas WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Idea::try_from).transpose()
    }

    async fn find_pending(&self) -> Result<Vec<Idea>, AppError> {
        let rows = sqlx::query_as::<_, IdeaRow>(&format!(
            "SELECT {IDEA_COLUMNS} FROM ideas \
             WHERE current_status = 'Pending' AND is_deleted = FALSE \
             ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Idea::try_from).collect()
    }

    async fn count_for_workflow(&self, workflow_id: i64) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ideas WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn commit(&self, expected_version: i64, idea: &Idea, entry: &AuditEntry) -> Result<Idea, AppError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, IdeaRow>(&format!(
            "UPDATE ideas SET workflow_id = $1, max_stage = $2, current_stage = $3, current_status = $4, \
                              approved_stages = $5, is_rejected = $6, rejection_reason = $7, is_deleted = $8, \
                              version = version + 1, updated_at = $9 \
             WHERE id = $10 AND version = $11 \
             RETURNING {IDEA_COLUMNS}"
        ))
        .bind(idea.workflow_id)
        .bind(idea.max_stage)
        .bind(idea.current_stage)
        .bind(idea.current_status.as_str())
        .bind(&idea.approved_stages)
        .bind(idea.is_rejected)
        .bind(&idea.rejection_reason)
        .bind(idea.is_deleted)
        .bind(entry.recorded_at)
        .bind(idea.id)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM ideas WHERE id = $1)")
                .bind(idea.id)
                .fetch_one(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Err(if exists {
                AppError::ConcurrencyConflict { idea_id: idea.id }
            } else {
                AppError::NotFound(format!("idea #{}", idea.id))
            });
        };

        sqlx::query(
            "INSERT INTO idea_audit_log (idea_id, action, actor_id, from_stage, from_status, to_stage, to_status, \
                                         workflow_from, workflow_to, reason, details, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(entry.idea_id)
        .bind(entry.action.as_str())
        .bind(entry.actor_id)
        .bind(entry.from.stage)
        .bind(entry.from.status.as_str())
        .bind(entry.to.stage)
        .bind(entry.to.status.as_str())
        .bind(entry.workflow_from)
        .bind(entry.workflow_to)
        .bind(&entry.reason)
        .bind(entry.details.to_string())
        .bind(entry.recorded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn audit_trail(&self, idea_id: i64) -> Result<Vec<AuditEntry>, AppError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT idea_id, action, actor_id, from_stage, from_status, to_stage, to_status, \
                    workflow_from, workflow_to, reason, details, recorded_at \
             FROM idea_audit_log WHERE idea_id = $1 ORDER BY id",
        )
        .bind(idea_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}
