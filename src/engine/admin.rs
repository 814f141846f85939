//! Validated administrative changes to workflow definitions.
//!
//! Everything that could later make resolution or planning misbehave is rejected
//! here with `AppError::Configuration`, before it reaches the store.

use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::Actor;
use super::change_workflow::resume_in;
use super::planner::StagePlan;
use crate::audit::{AuditAction, AuditEntry};
use crate::clock::Clock;
use crate::errors::AppError;
use crate::models::idea::{Idea, IdeaStatus};
use crate::models::workflow::{Condition, NewCondition, NewStage, NewWorkflow, Workflow, WorkflowUpdate};
use crate::store::{IdeaStore, WorkflowStore};

/// Commit attempts per idea when realigning after a stage change.
const REALIGN_ATTEMPTS: usize = 3;

pub struct WorkflowAdmin {
    workflows: Arc<dyn WorkflowStore>,
    ideas: Arc<dyn IdeaStore>,
    clock: Arc<dyn Clock>,
}

fn require_admin(actor: Actor) -> Result<(), AppError> {
    if actor.is_admin {
        Ok(())
    } else {
        Err(AppError::PermissionDenied(format!(
            "user #{} may not manage workflows",
            actor.user_id
        )))
    }
}

fn validate_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Configuration("workflow name is required".to_string()));
    }
    Ok(())
}

pub fn validate_stages(stages: &[NewStage]) -> Result<(), AppError> {
    if stages.is_empty() {
        return Err(AppError::Configuration("a workflow needs at least one stage".to_string()));
    }
    let mut seen = BTreeSet::new();
    for s in stages {
        if s.stage <= 0 {
            return Err(AppError::Configuration(format!("stage number {} must be positive", s.stage)));
        }
        if s.level_id <= 0 {
            return Err(AppError::Configuration(format!(
                "stage {} needs an approval level",
                s.stage
            )));
        }
        if !seen.insert(s.stage) {
            return Err(AppError::Configuration(format!("stage number {} is used twice", s.stage)));
        }
    }
    Ok(())
}

/// Compile every condition; the canonical forms of the active ones come back sorted.
pub fn validate_conditions(conditions: &[NewCondition]) -> Result<Vec<String>, AppError> {
    let mut canonical = Vec::new();
    for input in conditions {
        let compiled = Condition::from_new(input)?;
        if input.is_active {
            canonical.push(compiled.canonical());
        }
    }
    canonical.sort();
    canonical.dedup();
    Ok(canonical)
}

/// Canonical active rule set of a stored workflow. Rows that no longer compile are kept
/// verbatim so they never look identical to a valid rule.
fn rule_set(workflow: &Workflow) -> Vec<String> {
    let mut rules: Vec<String> = workflow
        .conditions
        .iter()
        .filter(|c| c.is_active)
        .map(|c| match Condition::from_stored(c) {
            Ok(compiled) => compiled.canonical(),
            Err(_) => format!("{} {} {}", c.condition_type, c.operator, c.condition_value),
        })
        .collect();
    rules.sort();
    rules.dedup();
    rules
}

impl WorkflowAdmin {
    pub fn new(workflows: Arc<dyn WorkflowStore>, ideas: Arc<dyn IdeaStore>, clock: Arc<dyn Clock>) -> Self {
        WorkflowAdmin { workflows, ideas, clock }
    }

    pub async fn list(&self) -> Result<Vec<Workflow>, AppError> {
        self.workflows.get_all().await
    }

    pub async fn create_workflow(&self, input: &NewWorkflow, actor: Actor) -> Result<Workflow, AppError> {
        require_admin(actor)?;
        validate_name(&input.name)?;
        validate_stages(&input.stages)?;
        let rules = validate_conditions(&input.conditions)?;

        let existing = self.workflows.get_all().await?;
        self.check_name_free(&existing, &input.name, None)?;
        if input.is_active {
            check_unambiguous(&existing, None, input.priority, &rules)?;
        }

        let workflow = self.workflows.insert_workflow(input).await?;
        log::info!(
            "Admin #{} created workflow #{} '{}' ({} stages, priority {})",
            actor.user_id,
            workflow.id,
            workflow.name,
            workflow.stages.len(),
            workflow.priority
        );
        Ok(workflow)
    }

    pub async fn update_workflow(&self, id: i64, update: &WorkflowUpdate, actor: Actor) -> Result<Workflow, AppError> {
        require_admin(actor)?;
        validate_name(&update.name)?;
        let current = self.load(id).await?;

        let existing = self.workflows.get_all().await?;
        self.check_name_free(&existing, &update.name, Some(id))?;
        if update.is_active {
            check_unambiguous(&existing, Some(id), update.priority, &rule_set(&current))?;
        }

        self.workflows.update_workflow(id, update).await?;
        log::info!("Admin #{} updated workflow #{id}", actor.user_id);
        self.load(id).await
    }

    pub async fn set_active(&self, id: i64, is_active: bool, actor: Actor) -> Result<Workflow, AppError> {
        let current = self.load(id).await?;
        let update = WorkflowUpdate {
            name: current.name,
            description: current.description,
            priority: current.priority,
            is_active,
        };
        self.update_workflow(id, &update, actor).await
    }

    /// Replace the stage list, then realign every pending idea on the workflow:
    /// an idea whose stage no longer exists resumes at the next defined stage, or is
    /// completed at the new last stage when the workflow now ends before it.
    pub async fn replace_stages(&self, id: i64, stages: &[NewStage], actor: Actor) -> Result<Workflow, AppError> {
        require_admin(actor)?;
        validate_stages(stages)?;
        self.load(id).await?;
        self.workflows.replace_stages(id, stages).await?;
        log::info!("Admin #{} replaced stages of workflow #{id} ({} stages)", actor.user_id, stages.len());

        let workflow = self.load(id).await?;
        let plan = StagePlan::from_stages(id, workflow.stages.clone());
        let mut realigned = 0;
        for idea in self.ideas.find_pending().await? {
            if idea.workflow_id == Some(id) && self.realign(idea, &plan, actor).await? {
                realigned += 1;
            }
        }
        if realigned > 0 {
            log::info!("Realigned {realigned} pending idea(s) to the new stages of workflow #{id}");
        }
        Ok(workflow)
    }

    pub async fn replace_conditions(
        &self,
        id: i64,
        conditions: &[NewCondition],
        actor: Actor,
    ) -> Result<Workflow, AppError> {
        require_admin(actor)?;
        let rules = validate_conditions(conditions)?;
        let current = self.load(id).await?;
        if current.is_active {
            let existing = self.workflows.get_all().await?;
            check_unambiguous(&existing, Some(id), current.priority, &rules)?;
        }
        self.workflows.replace_conditions(id, conditions).await?;
        log::info!("Admin #{} replaced conditions of workflow #{id}", actor.user_id);
        self.load(id).await
    }

    /// Delete a workflow no idea has ever used. Deactivate it otherwise.
    pub async fn delete_workflow(&self, id: i64, actor: Actor) -> Result<(), AppError> {
        require_admin(actor)?;
        self.load(id).await?;
        let referenced = self.ideas.count_for_workflow(id).await?;
        if referenced > 0 {
            return Err(AppError::Configuration(format!(
                "workflow #{id} is used by {referenced} idea(s); deactivate it instead"
            )));
        }
        self.workflows.delete_workflow(id).await?;
        log::info!("Admin #{} deleted workflow #{id}", actor.user_id);
        Ok(())
    }

    /// Fit one pending idea onto `plan`. Returns whether anything was written.
    async fn realign(&self, mut idea: Idea, plan: &StagePlan, actor: Actor) -> Result<bool, AppError> {
        for _ in 0..REALIGN_ATTEMPTS {
            let mut after = idea.clone();
            let completed = resume_in(plan, &mut after);
            if after.current_stage == idea.current_stage
                && after.max_stage == idea.max_stage
                && after.current_status == idea.current_status
                && after.approved_stages == idea.approved_stages
            {
                return Ok(false);
            }

            let entry = AuditEntry::between(AuditAction::StagesRedefined, actor.user_id, &idea, &after, self.clock.now())
                .with_details(json!({
                    "old_stage": idea.current_stage,
                    "new_stage": after.current_stage,
                    "old_max_stage": idea.max_stage,
                    "new_max_stage": after.max_stage,
                    "completed": completed,
                }));
            match self.ideas.commit(idea.version, &after, &entry).await {
                Ok(_) => {
                    log::info!("{}", entry.summary());
                    return Ok(true);
                }
                Err(AppError::ConcurrencyConflict { .. }) => {
                    // Moved on meanwhile; realign the fresh copy if it is still ours.
                    match self.ideas.get_by_id(idea.id).await? {
                        Some(fresh)
                            if !fresh.is_deleted
                                && fresh.current_status == IdeaStatus::Pending
                                && fresh.workflow_id == Some(plan.workflow_id) =>
                        {
                            idea = fresh;
                        }
                        _ => return Ok(false),
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(AppError::ConcurrencyConflict { idea_id: idea.id })
    }

    async fn load(&self, id: i64) -> Result<Workflow, AppError> {
        self.workflows
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("workflow #{id}")))
    }

    fn check_name_free(&self, existing: &[Workflow], name: &str, except: Option<i64>) -> Result<(), AppError> {
        let wanted = name.trim().to_lowercase();
        match existing
            .iter()
            .find(|w| Some(w.id) != except && w.name.trim().to_lowercase() == wanted)
        {
            Some(clash) => Err(AppError::Configuration(format!(
                "workflow name '{}' is already used by workflow #{}",
                name.trim(),
                clash.id
            ))),
            None => Ok(()),
        }
    }
}

/// Two active workflows with the same priority and the same rule set can never be
/// told apart by the resolver.
fn check_unambiguous(existing: &[Workflow], except: Option<i64>, priority: i32, rules: &[String]) -> Result<(), AppError> {
    let clash = existing
        .iter()
        .filter(|w| w.is_active && Some(w.id) != except && w.priority == priority)
        .find(|w| rule_set(w) == rules);
    match clash {
        Some(w) => Err(AppError::Configuration(format!(
            "workflow #{} '{}' already has priority {priority} and the same conditions",
            w.id, w.name
        ))),
        None => Ok(()),
    }
}
