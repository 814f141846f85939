use serde::Serialize;
use serde_json::json;

use super::Actor;
use super::planner::StagePlan;
use super::transition::TransitionEngine;
use crate::audit::{AuditAction, AuditEntry};
use crate::errors::AppError;
use crate::models::idea::{Idea, IdeaStatus};
use crate::notify::{Notification, NotificationTemplate};

/// Result of reassigning an idea to another workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowChange {
    pub success: bool,
    pub message: String,
    pub workflow_name: String,
    /// The idea had already passed the new workflow's last stage and was completed.
    pub auto_completed: bool,
    /// The idea already used the requested workflow; nothing was written.
    pub unchanged: bool,
    pub idea: Idea,
}

/// Resume `idea` at the first stage of `plan` at or after its current stage, or
/// complete it at the plan's last stage when none is left. Sign-offs outside the
/// resulting position are dropped. Returns whether the idea was completed.
pub(super) fn resume_in(plan: &StagePlan, idea: &mut Idea) -> bool {
    idea.max_stage = plan.max_stage();
    match plan.next_defined_stage(idea.current_stage) {
        Some(stage) => {
            idea.current_stage = stage;
            match plan.position_of(stage) {
                Some(position) => idea.approved_stages.retain(|s| position.contains(*s)),
                None => idea.approved_stages.clear(),
            }
            false
        }
        None => {
            idea.current_stage = plan.max_stage();
            idea.current_status = IdeaStatus::Completed;
            idea.approved_stages.clear();
            true
        }
    }
}

impl TransitionEngine {
    /// Move an in-flight idea to `new_workflow_id`.
    ///
    /// Checks run in order and stop at the first failure: idea exists and is not
    /// deleted, workflow exists and is active, idea not rejected, idea not
    /// completed, idea submitted. Requesting the current workflow is a successful no-op.
    ///
    /// When the idea's stage is at or beyond the new workflow's last stage it is
    /// completed at that last stage. Otherwise it keeps its stage and status.
    pub async fn change_workflow(&self, idea_id: i64, new_workflow_id: i64, actor: Actor) -> Result<WorkflowChange, AppError> {
        let idea = self
            .ideas
            .get_by_id(idea_id)
            .await?
            .filter(|i| !i.is_deleted)
            .ok_or_else(|| AppError::NotFound(format!("idea #{idea_id}")))?;

        let workflow = self
            .workflows
            .get_by_id(new_workflow_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("workflow #{new_workflow_id}")))?;
        if !workflow.is_active {
            return Err(AppError::Validation(format!("workflow '{}' is inactive", workflow.name)));
        }
        if idea.is_rejected {
            return Err(AppError::InvalidStateTransition(format!(
                "idea #{idea_id} was rejected and cannot change workflow"
            )));
        }
        if idea.current_status == IdeaStatus::Completed {
            return Err(AppError::InvalidStateTransition(format!(
                "idea #{idea_id} is already completed"
            )));
        }
        if idea.current_status == IdeaStatus::Draft {
            return Err(AppError::InvalidStateTransition(format!(
                "idea #{idea_id} has not been submitted; its workflow is chosen on submission"
            )));
        }
        if idea.workflow_id == Some(new_workflow_id) {
            return Ok(WorkflowChange {
                success: true,
                message: format!("Idea already follows workflow '{}'", workflow.name),
                workflow_name: workflow.name,
                auto_completed: false,
                unchanged: true,
                idea,
            });
        }

        let plan = self.planner.plan(new_workflow_id).await?;
        let new_max = plan.max_stage();
        let at = self.clock.now();

        let mut after = idea.clone();
        after.workflow_id = Some(new_workflow_id);

        let auto_completed = if idea.current_stage >= new_max {
            after.max_stage = new_max;
            after.current_stage = new_max;
            after.current_status = IdeaStatus::Completed;
            after.approved_stages.clear();
            true
        } else {
            // Stage numbers may have gaps; resume at the next stage the workflow defines.
            resume_in(&plan, &mut after)
        };

        let entry = AuditEntry::between(AuditAction::WorkflowChanged, actor.user_id, &idea, &after, at).with_details(
            json!({
                "old_workflow_id": idea.workflow_id,
                "new_workflow_id": new_workflow_id,
                "new_workflow_name": workflow.name,
                "old_stage": idea.current_stage,
                "new_stage": after.current_stage,
                "old_max_stage": idea.max_stage,
                "new_max_stage": new_max,
                "auto_completed": auto_completed,
            }),
        );
        let stored = self.commit(&idea, after, entry).await?;

        let message = if auto_completed {
            log::info!(
                "Idea #{idea_id} completed by workflow change: stage {} >= max stage {new_max} of '{}'",
                idea.current_stage,
                workflow.name
            );
            format!(
                "Workflow changed to '{}'; the idea had reached stage {} of {new_max} and is now completed",
                workflow.name, idea.current_stage
            )
        } else {
            format!("Workflow changed to '{}'", workflow.name)
        };

        self.notifications.dispatch(Notification {
            template: if auto_completed {
                NotificationTemplate::IdeaCompleted
            } else {
                NotificationTemplate::WorkflowChanged
            },
            idea_id,
            recipients: vec![stored.submitted_by],
            context: json!({ "workflow_name": workflow.name, "stage": stored.current_stage }),
        });

        Ok(WorkflowChange {
            success: true,
            message,
            workflow_name: workflow.name,
            auto_completed,
            unchanged: false,
            idea: stored,
        })
    }
}
