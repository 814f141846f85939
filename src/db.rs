use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::SystemClock;
use crate::config::AppConfig;
use crate::engine::{Actor, WorkflowAdmin};
use crate::errors::AppError;
use crate::models::idea::PgIdeaStore;
use crate::models::workflow::{ConditionType, NewCondition, NewStage, NewWorkflow, Operator, PgWorkflowStore};
use crate::store::WorkflowStore;

pub const MIGRATIONS: &str = include_str!("schema.sql");

/// Actor recorded for seed writes.
const SYSTEM_ACTOR: Actor = Actor { user_id: 0, is_admin: true };

pub async fn init_pool(config: &AppConfig) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::raw_sql(MIGRATIONS).execute(pool).await?;
    log::info!("Database migrations complete");
    Ok(())
}

fn stage(stage: i32, level_id: i64, is_mandatory: bool, is_parallel: bool) -> NewStage {
    NewStage {
        stage,
        level_id,
        is_mandatory,
        is_parallel,
    }
}

fn condition(condition_type: ConditionType, operator: Operator, value: &str) -> NewCondition {
    NewCondition {
        condition_type,
        operator,
        condition_value: value.to_string(),
        is_active: true,
    }
}

/// Starter workflows: a catch-all two-step review and a high-value track with a
/// parallel finance/legal step.
pub fn default_workflows() -> Vec<NewWorkflow> {
    vec![
        NewWorkflow {
            name: "Standard review".to_string(),
            description: "Department head, then division head".to_string(),
            is_active: true,
            priority: 100,
            stages: vec![stage(1, 1, true, false), stage(2, 2, true, false)],
            conditions: Vec::new(),
        },
        NewWorkflow {
            name: "High-value review".to_string(),
            description: "Savings of 100000 or more".to_string(),
            is_active: true,
            priority: 10,
            stages: vec![
                stage(1, 1, true, false),
                stage(2, 2, true, false),
                stage(3, 3, true, true),
                stage(4, 4, false, true),
                stage(5, 5, true, false),
            ],
            conditions: vec![condition(ConditionType::SavingCost, Operator::Gte, "100000")],
        },
    ]
}

/// Insert the default workflows unless any workflow exists. Returns how many were created.
pub async fn seed_default_workflows(pool: &PgPool) -> Result<usize, AppError> {
    let workflows = Arc::new(PgWorkflowStore::new(pool.clone()));
    let existing = workflows.get_all().await?;
    if !existing.is_empty() {
        log::info!("Database already has {} workflow(s), skipping workflow seed", existing.len());
        return Ok(0);
    }

    let admin = WorkflowAdmin::new(
        workflows,
        Arc::new(PgIdeaStore::new(pool.clone())),
        Arc::new(SystemClock),
    );
    let mut created = 0;
    for input in default_workflows() {
        let workflow = admin.create_workflow(&input, SYSTEM_ACTOR).await?;
        log::info!("Seeded workflow #{} '{}'", workflow.id, workflow.name);
        created += 1;
    }
    log::info!("Workflow seed complete ({created} created)");
    Ok(created)
}
