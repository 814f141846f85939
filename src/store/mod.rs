//! Collaborator interfaces the workflow core reads from and writes through.
//!
//! Postgres implementations live next to their models (`models::*::queries`);
//! `memory` holds in-process implementations for tests and embedding.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::audit::AuditEntry;
use crate::errors::AppError;
use crate::models::approver::{ActingDelegation, RoleAssignment, UserSummary};
use crate::models::idea::{Idea, NewIdea};
use crate::models::workflow::{NewCondition, NewStage, NewWorkflow, Workflow, WorkflowStage, WorkflowUpdate};

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Every workflow, active or not, ordered by id.
    async fn get_all(&self) -> Result<Vec<Workflow>, AppError>;

    /// Active workflows with their stages and conditions, ordered by id.
    async fn get_all_active(&self) -> Result<Vec<Workflow>, AppError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Workflow>, AppError>;

    async fn get_stage(&self, workflow_id: i64, stage: i32) -> Result<Option<WorkflowStage>, AppError>;

    /// Stages ascending by stage number.
    async fn get_stage_sequence(&self, workflow_id: i64) -> Result<Vec<WorkflowStage>, AppError>;

    /// Highest stage number, 0 for a workflow without stages.
    async fn get_max_stage(&self, workflow_id: i64) -> Result<i32, AppError>;

    async fn insert_workflow(&self, input: &NewWorkflow) -> Result<Workflow, AppError>;

    async fn update_workflow(&self, id: i64, update: &WorkflowUpdate) -> Result<(), AppError>;

    async fn replace_stages(&self, workflow_id: i64, stages: &[NewStage]) -> Result<(), AppError>;

    async fn replace_conditions(&self, workflow_id: i64, conditions: &[NewCondition]) -> Result<(), AppError>;

    async fn delete_workflow(&self, id: i64) -> Result<(), AppError>;
}

#[async_trait]
pub trait IdeaStore: Send + Sync {
    async fn insert(&self, input: &NewIdea) -> Result<Idea, AppError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Idea>, AppError>;

    /// Pending, non-deleted ideas ordered by id.
    async fn find_pending(&self) -> Result<Vec<Idea>, AppError>;

    /// Ideas (deleted ones included) that reference the workflow.
    async fn count_for_workflow(&self, workflow_id: i64) -> Result<i64, AppError>;

    /// Write `idea` and append `entry` atomically, provided the stored version still
    /// equals `expected_version`. Returns the stored idea with its new version.
    ///
    /// Fails with `ConcurrencyConflict` when another transition committed first.
    async fn commit(&self, expected_version: i64, idea: &Idea, entry: &AuditEntry) -> Result<Idea, AppError>;

    /// Audit entries for an idea, oldest first.
    async fn audit_trail(&self, idea_id: i64) -> Result<Vec<AuditEntry>, AppError>;
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn role_assignments(&self, level_id: i64) -> Result<Vec<RoleAssignment>, AppError>;

    /// Delegations at `level_id` whose window contains `at`.
    async fn acting_delegations(&self, level_id: i64, at: DateTime<Utc>) -> Result<Vec<ActingDelegation>, AppError>;

    /// Users for the given ids; unknown ids are skipped.
    async fn users(&self, ids: &[i64]) -> Result<Vec<UserSummary>, AppError>;
}
