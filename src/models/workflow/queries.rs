use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;

use super::types::*;
use crate::errors::{AppError, is_unique_violation};
use crate::store::WorkflowStore;

/// Postgres-backed workflow definitions.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct HeaderRow {
    id: i64,
    name: String,
    description: String,
    is_active: bool,
    priority: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct StageRow {
    id: i64,
    workflow_id: i64,
    stage: i32,
    level_id: i64,
    is_mandatory: bool,
    is_parallel: bool,
}

impl From<StageRow> for WorkflowStage {
    fn from(row: StageRow) -> Self {
        WorkflowStage {
            id: row.id,
            workflow_id: row.workflow_id,
            stage: row.stage,
            level_id: row.level_id,
            is_mandatory: row.is_mandatory,
            is_parallel: row.is_parallel,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ConditionRow {
    id: i64,
    workflow_id: i64,
    condition_type: String,
    operator: String,
    condition_value: String,
    is_active: bool,
}

const STAGE_COLUMNS: &str = "id, workflow_id, stage, level_id, is_mandatory, is_parallel";

fn duplicate_name(e: sqlx::Error, name: &str) -> AppError {
    if is_unique_violation(&e) {
        AppError::Configuration(format!("a workflow named '{}' already exists", name.trim()))
    } else {
        AppError::Db(e)
    }
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        PgWorkflowStore { pool }
    }

    /// Attach stages and conditions to the given headers.
    ///
    /// A stored condition whose type or operator no longer parses takes its whole
    /// workflow out of resolution: the workflow comes back inactive.
    async fn assemble(&self, headers: Vec<HeaderRow>) -> Result<Vec<Workflow>, AppError> {
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = headers.iter().map(|h| h.id).collect();

        let stage_rows = sqlx::query_as::<_, StageRow>(&format!(
            "SELECT {STAGE_COLUMNS} FROM workflow_stages WHERE workflow_id = ANY($1) ORDER BY workflow_id, stage"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let condition_rows = sqlx::query_as::<_, ConditionRow>(
            "SELECT id, workflow_id, condition_type, operator, condition_value, is_active \
             FROM workflow_conditions WHERE workflow_id = ANY($1) ORDER BY workflow_id, id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut stages: HashMap<i64, Vec<WorkflowStage>> = HashMap::new();
        for row in stage_rows {
            stages.entry(row.workflow_id).or_default().push(row.into());
        }

        let mut conditions: HashMap<i64, Vec<WorkflowCondition>> = HashMap::new();
        let mut broken: Vec<i64> = Vec::new();
        for row in condition_rows {
            let parsed = row
                .condition_type
                .parse::<ConditionType>()
                .and_then(|ct| row.operator.parse::<Operator>().map(|op| (ct, op)));
            match parsed {
                Ok((condition_type, operator)) => {
                    conditions.entry(row.workflow_id).or_default().push(WorkflowCondition {
                        id: row.id,
                        workflow_id: row.workflow_id,
                        condition_type,
                        operator,
                        condition_value: row.condition_value,
                        is_active: row.is_active,
                    });
                }
                Err(e) if row.is_active => {
                    log::warn!("Workflow #{} disqualified, condition #{}: {e}", row.workflow_id, row.id);
                    broken.push(row.workflow_id);
                }
                Err(_) => {}
            }
        }

        Ok(headers
            .into_iter()
            .map(|h| Workflow {
                id: h.id,
                name: h.name,
                description: h.description,
                is_active: h.is_active && !broken.contains(&h.id),
                priority: h.priority,
                stages: stages.remove(&h.id).unwrap_or_default(),
                conditions: conditions.remove(&h.id).unwrap_or_default(),
                created_at: h.created_at,
                updated_at: h.updated_at,
            })
            .collect())
    }

    async fn insert_stages(
        tx: &mut Transaction<'_, Postgres>,
        workflow_id: i64,
        stages: &[NewStage],
    ) -> Result<(), AppError> {
        for s in stages {
            sqlx::query(
                "INSERT INTO workflow_stages (workflow_id, stage, level_id, is_mandatory, is_parallel) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(workflow_id)
            .bind(s.stage)
            .bind(s.level_id)
            .bind(s.is_mandatory)
            .bind(s.is_parallel)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Configuration(format!("stage {} appears twice in workflow #{workflow_id}", s.stage))
                } else {
                    AppError::Db(e)
                }
            })?;
        }
        Ok(())
    }

    async fn insert_conditions(
        tx: &mut Transaction<'_, Postgres>,
        workflow_id: i64,
        conditions: &[NewCondition],
    ) -> Result<(), AppError> {
        for c in conditions {
            sqlx::query(
                "INSERT INTO workflow_conditions (workflow_id, condition_type, operator, condition_value, is_active) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(workflow_id)
            .bind(c.condition_type.as_str())
            .bind(c.operator.as_str())
            .bind(&c.condition_value)
            .bind(c.is_active)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn touch(tx: &mut Transaction<'_, Postgres>, workflow_id: i64) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE workflows SET updated_at = NOW() WHERE id = $1")
            .bind(workflow_id)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("workflow #{workflow_id}")));
        }
        Ok(())
    }
}

const HEADER_SELECT: &str =
    "SELECT id, name, description, is_active, priority, created_at, updated_at FROM workflows";

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn get_all(&self) -> Result<Vec<Workflow>, AppError> {
        let headers = sqlx::query_as::<_, HeaderRow>(&format!("{HEADER_SELECT} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        self.assemble(headers).await
    }

    async fn get_all_active(&self) -> Result<Vec<Workflow>, AppError> {
        let headers = sqlx::query_as::<_, HeaderRow>(&format!("{HEADER_SELECT} WHERE is_active = TRUE ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        let mut workflows = self.assemble(headers).await?;
        workflows.retain(|w| w.is_active);
        Ok(workflows)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Workflow>, AppError> {
        let header = sqlx::query_as::<_, HeaderRow>(&format!("{HEADER_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match header {
            Some(h) => Ok(self.assemble(vec![h]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn get_stage(&self, workflow_id: i64, stage: i32) -> Result<Option<WorkflowStage>, AppError> {
        let row = sqlx::query_as::<_, StageRow>(&format!(
            "SELECT {STAGE_COLUMNS} FROM workflow_stages WHERE workflow_id = $1 AND stage = $2"
        ))
        .bind(workflow_id)
        .bind(stage)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_stage_sequence(&self, workflow_id: i64) -> Result<Vec<WorkflowStage>, AppError> {
        let rows = sqlx::query_as::<_, StageRow>(&format!(
            "SELECT {STAGE_COLUMNS} FROM workflow_stages WHERE workflow_id = $1 ORDER BY stage"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_max_stage(&self, workflow_id: i64) -> Result<i32, AppError> {
        let (max,): (Option<i32>,) = sqlx::query_as("SELECT MAX(stage) FROM workflow_stages WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0))
    }

    async fn insert_workflow(&self, input: &NewWorkflow) -> Result<Workflow, AppError> {
        let mut tx = self.pool.begin().await?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO workflows (name, description, is_active, priority) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(input.name.trim())
        .bind(&input.description)
        .bind(input.is_active)
        .bind(input.priority)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| duplicate_name(e, &input.name))?;

        Self::insert_stages(&mut tx, id, &input.stages).await?;
        Self::insert_conditions(&mut tx, id, &input.conditions).await?;
        tx.commit().await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("workflow #{id}")))
    }

    async fn update_workflow(&self, id: i64, update: &WorkflowUpdate) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE workflows SET name = $1, description = $2, priority = $3, is_active = $4, updated_at = NOW() \
             WHERE id = $5",
        )
        .bind(update.name.trim())
        .bind(&update.description)
        .bind(update.priority)
        .bind(update.is_active)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_name(e, &update.name))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("workflow #{id}")));
        }
        Ok(())
    }

    async fn replace_stages(&self, workflow_id: i64, stages: &[NewStage]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        Self::touch(&mut tx, workflow_id).await?;
        sqlx::query("DELETE FROM workflow_stages WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;
        Self::insert_stages(&mut tx, workflow_id, stages).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_conditions(&self, workflow_id: i64, conditions: &[NewCondition]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        Self::touch(&mut tx, workflow_id).await?;
        sqlx::query("DELETE FROM workflow_conditions WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;
        Self::insert_conditions(&mut tx, workflow_id, conditions).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_workflow(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("workflow #{id}")));
        }
        Ok(())
    }
}
