//! In-process stores backed by `tokio::sync` locks.
//!
//! They honour the same contracts as the Postgres stores (unique names, version
//! checked commits, ordered reads) and are what the test-suite runs against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::{Mutex, RwLock};

use super::{DirectoryStore, IdeaStore, WorkflowStore};
use crate::audit::AuditEntry;
use crate::errors::AppError;
use crate::models::approver::{ActingDelegation, RoleAssignment, UserSummary};
use crate::models::idea::{Idea, IdeaStatus, NewIdea};
use crate::models::workflow::{
    NewCondition, NewStage, NewWorkflow, Workflow, WorkflowCondition, WorkflowStage, WorkflowUpdate,
};

// ============================================================================
// WORKFLOWS
// ============================================================================

#[derive(Default)]
struct WorkflowState {
    workflows: BTreeMap<i64, Workflow>,
    next_workflow_id: i64,
    next_stage_id: i64,
    next_condition_id: i64,
}

impl WorkflowState {
    fn build_stages(&mut self, workflow_id: i64, stages: &[NewStage]) -> Result<Vec<WorkflowStage>, AppError> {
        let mut built: Vec<WorkflowStage> = Vec::with_capacity(stages.len());
        for s in stages {
            if built.iter().any(|b| b.stage == s.stage) {
                return Err(AppError::Configuration(format!(
                    "stage {} appears twice in workflow #{workflow_id}",
                    s.stage
                )));
            }
            self.next_stage_id += 1;
            built.push(WorkflowStage {
                id: self.next_stage_id,
                workflow_id,
                stage: s.stage,
                level_id: s.level_id,
                is_mandatory: s.is_mandatory,
                is_parallel: s.is_parallel,
            });
        }
        built.sort_by_key(|s| s.stage);
        Ok(built)
    }

    fn build_conditions(&mut self, workflow_id: i64, conditions: &[NewCondition]) -> Vec<WorkflowCondition> {
        conditions
            .iter()
            .map(|c| {
                self.next_condition_id += 1;
                WorkflowCondition {
                    id: self.next_condition_id,
                    workflow_id,
                    condition_type: c.condition_type,
                    operator: c.operator,
                    condition_value: c.condition_value.clone(),
                    is_active: c.is_active,
                }
            })
            .collect()
    }

    fn name_taken(&self, name: &str, except: Option<i64>) -> bool {
        let wanted = name.trim().to_lowercase();
        self.workflows
            .values()
            .any(|w| Some(w.id) != except && w.name.trim().to_lowercase() == wanted)
    }

    fn get_mut(&mut self, id: i64) -> Result<&mut Workflow, AppError> {
        self.workflows
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("workflow #{id}")))
    }
}

#[derive(Default)]
pub struct MemoryWorkflowStore {
    state: RwLock<WorkflowState>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn get_all(&self) -> Result<Vec<Workflow>, AppError> {
        Ok(self.state.read().await.workflows.values().cloned().collect())
    }

    async fn get_all_active(&self) -> Result<Vec<Workflow>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .workflows
            .values()
            .filter(|w| w.is_active)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Workflow>, AppError> {
        Ok(self.state.read().await.workflows.get(&id).cloned())
    }

    async fn get_stage(&self, workflow_id: i64, stage: i32) -> Result<Option<WorkflowStage>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .workflows
            .get(&workflow_id)
            .and_then(|w| w.stages.iter().find(|s| s.stage == stage).cloned()))
    }

    async fn get_stage_sequence(&self, workflow_id: i64) -> Result<Vec<WorkflowStage>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .workflows
            .get(&workflow_id)
            .map(|w| w.stages.clone())
            .unwrap_or_default())
    }

    async fn get_max_stage(&self, workflow_id: i64) -> Result<i32, AppError> {
        let state = self.state.read().await;
        Ok(state.workflows.get(&workflow_id).map(Workflow::max_stage).unwrap_or(0))
    }

    async fn insert_workflow(&self, input: &NewWorkflow) -> Result<Workflow, AppError> {
        let mut state = self.state.write().await;
        if state.name_taken(&input.name, None) {
            return Err(AppError::Configuration(format!(
                "a workflow named '{}' already exists",
                input.name.trim()
            )));
        }
        let id = state.next_workflow_id + 1;
        let stages = state.build_stages(id, &input.stages)?;
        let conditions = state.build_conditions(id, &input.conditions);
        state.next_workflow_id = id;

        let now = Utc::now();
        let workflow = Workflow {
            id,
            name: input.name.trim().to_string(),
            description: input.description.clone(),
            is_active: input.is_active,
            priority: input.priority,
            stages,
            conditions,
            created_at: now,
            updated_at: now,
        };
        state.workflows.insert(id, workflow.clone());
        Ok(workflow)
    }

    async fn update_workflow(&self, id: i64, update: &WorkflowUpdate) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.name_taken(&update.name, Some(id)) {
            return Err(AppError::Configuration(format!(
                "a workflow named '{}' already exists",
                update.name.trim()
            )));
        }
        let workflow = state.get_mut(id)?;
        workflow.name = update.name.trim().to_string();
        workflow.description = update.description.clone();
        workflow.priority = update.priority;
        workflow.is_active = update.is_active;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn replace_stages(&self, workflow_id: i64, stages: &[NewStage]) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.get_mut(workflow_id)?;
        let built = state.build_stages(workflow_id, stages)?;
        let workflow = state.get_mut(workflow_id)?;
        workflow.stages = built;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn replace_conditions(&self, workflow_id: i64, conditions: &[NewCondition]) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.get_mut(workflow_id)?;
        let built = state.build_conditions(workflow_id, conditions);
        let workflow = state.get_mut(workflow_id)?;
        workflow.conditions = built;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_workflow(&self, id: i64) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state
            .workflows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("workflow #{id}")))
    }
}

// ============================================================================
// IDEAS
// ============================================================================

#[derive(Default)]
struct IdeaState {
    ideas: BTreeMap<i64, Idea>,
    audit: Vec<AuditEntry>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryIdeaStore {
    state: Mutex<IdeaState>,
}

impl MemoryIdeaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdeaStore for MemoryIdeaStore {
    async fn insert(&self, input: &NewIdea) -> Result<Idea, AppError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let now = Utc::now();
        let idea = Idea {
            id: state.next_id,
            title: input.title.clone(),
            submitted_by: input.submitted_by,
            category_id: input.category_id.clone(),
            target_division_id: input.target_division_id.clone(),
            target_department_id: input.target_department_id.clone(),
            saving_cost: input.saving_cost,
            event_id: input.event_id.clone(),
            workflow_id: None,
            max_stage: 0,
            current_stage: 0,
            current_status: IdeaStatus::Draft,
            approved_stages: Vec::new(),
            is_rejected: false,
            rejection_reason: None,
            is_deleted: false,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        state.ideas.insert(idea.id, idea.clone());
        Ok(idea)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Idea>, AppError> {
        Ok(self.state.lock().await.ideas.get(&id).cloned())
    }

    async fn find_pending(&self) -> Result<Vec<Idea>, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .ideas
            .values()
            .filter(|i| i.current_status == IdeaStatus::Pending && !i.is_deleted)
            .cloned()
            .collect())
    }

    async fn count_for_workflow(&self, workflow_id: i64) -> Result<i64, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .ideas
            .values()
            .filter(|i| i.workflow_id == Some(workflow_id))
            .count() as i64)
    }

    async fn commit(&self, expected_version: i64, idea: &Idea, entry: &AuditEntry) -> Result<Idea, AppError> {
        let mut state = self.state.lock().await;
        let stored = state
            .ideas
            .get(&idea.id)
            .ok_or_else(|| AppError::NotFound(format!("idea #{}", idea.id)))?;
        if stored.version != expected_version {
            return Err(AppError::ConcurrencyConflict { idea_id: idea.id });
        }
        let mut updated = idea.clone();
        updated.version = expected_version + 1;
        updated.updated_at = entry.recorded_at;
        state.ideas.insert(updated.id, updated.clone());
        state.audit.push(entry.clone());
        Ok(updated)
    }

    async fn audit_trail(&self, idea_id: i64) -> Result<Vec<AuditEntry>, AppError> {
        let state = self.state.lock().await;
        Ok(state.audit.iter().filter(|e| e.idea_id == idea_id).cloned().collect())
    }
}

// ============================================================================
// DIRECTORY
// ============================================================================

#[derive(Default)]
struct DirectoryState {
    users: BTreeMap<i64, UserSummary>,
    assignments: Vec<RoleAssignment>,
    delegations: Vec<ActingDelegation>,
}

/// Approver directory. Populated by the admin helpers below.
#[derive(Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, id: i64, username: &str, display_name: &str) {
        let user = UserSummary {
            id,
            username: username.to_string(),
            display_name: display_name.to_string(),
            email: format!("{username}@example.com"),
        };
        self.state.write().await.users.insert(id, user);
    }

    pub async fn assign_role(&self, user_id: i64, level_id: i64, division_id: Option<&str>, department_id: Option<&str>) {
        self.state.write().await.assignments.push(RoleAssignment {
            user_id,
            level_id,
            division_id: division_id.map(str::to_string),
            department_id: department_id.map(str::to_string),
        });
    }

    /// Record an acting delegation, returning its id.
    pub async fn add_delegation(
        &self,
        user_id: i64,
        level_id: i64,
        division_id: Option<&str>,
        department_id: Option<&str>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> i64 {
        let mut state = self.state.write().await;
        let id = state.delegations.len() as i64 + 1;
        state.delegations.push(ActingDelegation {
            id,
            user_id,
            level_id,
            division_id: division_id.map(str::to_string),
            department_id: department_id.map(str::to_string),
            starts_at,
            ends_at,
        });
        id
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    async fn role_assignments(&self, level_id: i64) -> Result<Vec<RoleAssignment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.level_id == level_id)
            .cloned()
            .collect())
    }

    async fn acting_delegations(&self, level_id: i64, at: DateTime<Utc>) -> Result<Vec<ActingDelegation>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .delegations
            .iter()
            .filter(|d| d.level_id == level_id && d.is_active_at(at))
            .cloned()
            .collect())
    }

    async fn users(&self, ids: &[i64]) -> Result<Vec<UserSummary>, AppError> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }
}
