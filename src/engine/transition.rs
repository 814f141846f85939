//! Idea state machine.
//!
//! ```text
//! Draft --submit--> Pending(stage) --approve/bypass--> Pending(next) ... --> Completed
//!                        |
//!                        +--reject--> Rejected
//! ```
//!
//! `is_deleted` is a tombstone that stops every further transition. Each operation
//! reads the idea, decides, and commits through `IdeaStore::commit`, which only
//! succeeds if the idea's version is unchanged since the read.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::Actor;
use super::approvers::{ApproverResolver, Scope};
use super::planner::{StagePlan, StagePlanner, StagePosition};
use super::resolver::WorkflowResolver;
use crate::audit::{AuditAction, AuditEntry};
use crate::clock::Clock;
use crate::errors::AppError;
use crate::models::idea::{Idea, IdeaStatus, PendingApproval};
use crate::notify::{Notification, NotificationDispatcher, NotificationTemplate};
use crate::store::{DirectoryStore, IdeaStore, WorkflowStore};

/// How to treat a mandatory stage nobody can sign while looking for the next position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnUnstaffed {
    /// Fail with `NoEligibleApprover`.
    Fail,
    /// Park the idea there so an admin can bypass it.
    Stop,
}

pub struct TransitionEngine {
    pub(super) ideas: Arc<dyn IdeaStore>,
    pub(super) workflows: Arc<dyn WorkflowStore>,
    pub(super) resolver: WorkflowResolver,
    pub(super) planner: StagePlanner,
    pub(super) approvers: ApproverResolver,
    pub(super) notifications: NotificationDispatcher,
    pub(super) clock: Arc<dyn Clock>,
}

pub(super) fn scope_of(idea: &Idea) -> Scope<'_> {
    Scope::new(Some(&idea.target_division_id), Some(&idea.target_department_id))
}

impl TransitionEngine {
    pub fn new(
        ideas: Arc<dyn IdeaStore>,
        workflows: Arc<dyn WorkflowStore>,
        directory: Arc<dyn DirectoryStore>,
        notifications: NotificationDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        TransitionEngine {
            resolver: WorkflowResolver::new(workflows.clone()),
            planner: StagePlanner::new(workflows.clone()),
            approvers: ApproverResolver::new(workflows.clone(), directory),
            ideas,
            workflows,
            notifications,
            clock,
        }
    }

    pub fn resolver(&self) -> &WorkflowResolver {
        &self.resolver
    }

    pub fn planner(&self) -> &StagePlanner {
        &self.planner
    }

    pub fn approvers(&self) -> &ApproverResolver {
        &self.approvers
    }

    pub async fn get_idea(&self, idea_id: i64) -> Result<Idea, AppError> {
        self.ideas
            .get_by_id(idea_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("idea #{idea_id}")))
    }

    pub async fn audit_trail(&self, idea_id: i64) -> Result<Vec<AuditEntry>, AppError> {
        self.ideas.audit_trail(idea_id).await
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Route a draft idea into its workflow.
    pub async fn submit(&self, idea_id: i64, actor: Actor) -> Result<Idea, AppError> {
        let idea = self.get_idea(idea_id).await?;
        if idea.is_deleted {
            return Err(AppError::InvalidStateTransition(format!("idea #{idea_id} is deleted")));
        }
        if idea.current_status != IdeaStatus::Draft {
            return Err(AppError::InvalidStateTransition(format!(
                "idea #{idea_id} was already submitted ({})",
                idea.current_status
            )));
        }
        if actor.user_id != idea.submitted_by && !actor.is_admin {
            return Err(AppError::PermissionDenied(format!(
                "only the author may submit idea #{idea_id}"
            )));
        }

        let workflow = self.resolver.resolve_required(&idea.context()).await?;
        let plan = self.planner.plan(workflow.id).await?;
        let at = self.clock.now();

        let mut after = idea.clone();
        after.workflow_id = Some(workflow.id);
        let notification = self.move_past(&plan, 0, &mut after, at, OnUnstaffed::Fail).await?;

        let entry = AuditEntry::between(AuditAction::Submitted, actor.user_id, &idea, &after, at).with_details(json!({
            "workflow_id": workflow.id,
            "workflow_name": workflow.name,
            "max_stage": after.max_stage,
        }));
        let stored = self.commit(&idea, after, entry).await?;
        self.notifications.dispatch(notification);
        Ok(stored)
    }

    /// Sign `stage` as `actor`. Moves on once the whole current position is signed.
    pub async fn approve(&self, idea_id: i64, stage: i32, actor: Actor) -> Result<Idea, AppError> {
        let idea = self.get_idea(idea_id).await?;
        ensure_pending(&idea)?;
        let plan = self.plan_for(&idea).await?;
        let position = current_position(&plan, &idea, stage)?;
        let at = self.clock.now();
        self.require_approver(&idea, position, stage, actor, at).await?;

        let mut after = idea.clone();
        after.max_stage = plan.max_stage();
        after.approved_stages.push(stage);
        after.approved_stages.sort_unstable();

        let outstanding = self.outstanding(position, &after, at).await?;
        let notification = if outstanding.is_empty() {
            Some(self.move_past(&plan, position.last(), &mut after, at, OnUnstaffed::Fail).await?)
        } else {
            None
        };

        let entry = AuditEntry::between(AuditAction::Approved, actor.user_id, &idea, &after, at).with_details(json!({
            "stage": stage,
            "outstanding_stages": outstanding,
        }));
        let stored = self.commit(&idea, after, entry).await?;
        if let Some(n) = notification {
            self.notifications.dispatch(n);
        }
        Ok(stored)
    }

    /// Reject the idea at `stage`. Terminal.
    pub async fn reject(&self, idea_id: i64, stage: i32, reason: &str, actor: Actor) -> Result<Idea, AppError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation("rejection reason is required".to_string()));
        }

        let idea = self.get_idea(idea_id).await?;
        ensure_pending(&idea)?;
        let plan = self.plan_for(&idea).await?;
        let position = current_position(&plan, &idea, stage)?;
        let at = self.clock.now();
        self.require_approver(&idea, position, stage, actor, at).await?;

        let mut after = idea.clone();
        after.is_rejected = true;
        after.current_status = IdeaStatus::Rejected;
        after.rejection_reason = Some(reason.to_string());
        after.approved_stages.clear();

        let entry = AuditEntry::between(AuditAction::Rejected, actor.user_id, &idea, &after, at)
            .with_reason(reason)
            .with_details(json!({ "stage": stage }));
        let stored = self.commit(&idea, after, entry).await?;
        self.notifications.dispatch(Notification {
            template: NotificationTemplate::IdeaRejected,
            idea_id,
            recipients: vec![stored.submitted_by],
            context: json!({ "stage": stage, "reason": reason, "title": stored.title }),
        });
        Ok(stored)
    }

    /// Administrative override: push the idea past the position holding `stage`
    /// without sign-off.
    pub async fn bypass(&self, idea_id: i64, stage: i32, actor: Actor, note: Option<&str>) -> Result<Idea, AppError> {
        if !actor.is_admin {
            return Err(AppError::PermissionDenied(format!(
                "user #{} may not bypass approval stages",
                actor.user_id
            )));
        }

        let idea = self.get_idea(idea_id).await?;
        ensure_pending(&idea)?;
        let plan = self.plan_for(&idea).await?;
        let position = current_position(&plan, &idea, stage)?;
        let at = self.clock.now();

        let skipped: Vec<i32> = position
            .stage_numbers()
            .into_iter()
            .filter(|s| !idea.approved_stages.contains(s))
            .collect();

        let mut after = idea.clone();
        let notification = self.move_past(&plan, position.last(), &mut after, at, OnUnstaffed::Stop).await?;

        let mut entry = AuditEntry::between(AuditAction::Bypassed, actor.user_id, &idea, &after, at).with_details(json!({
            "stage": stage,
            "bypassed_stages": skipped,
        }));
        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            entry = entry.with_reason(note);
        }
        log::warn!("Admin #{} bypassed stages {:?} of idea #{}", actor.user_id, skipped, idea_id);
        let stored = self.commit(&idea, after, entry).await?;
        self.notifications.dispatch(notification);
        Ok(stored)
    }

    /// Soft-delete a draft or pending idea.
    pub async fn delete(&self, idea_id: i64, actor: Actor) -> Result<Idea, AppError> {
        let idea = self.get_idea(idea_id).await?;
        if idea.is_deleted {
            return Err(AppError::InvalidStateTransition(format!("idea #{idea_id} is already deleted")));
        }
        if idea.current_status.is_terminal() {
            return Err(AppError::InvalidStateTransition(format!(
                "idea #{idea_id} is {} and can no longer be deleted",
                idea.current_status
            )));
        }
        if actor.user_id != idea.submitted_by && !actor.is_admin {
            return Err(AppError::PermissionDenied(format!(
                "only the author or an admin may delete idea #{idea_id}"
            )));
        }

        let at = self.clock.now();
        let mut after = idea.clone();
        after.is_deleted = true;
        let entry = AuditEntry::between(AuditAction::Deleted, actor.user_id, &idea, &after, at);
        self.commit(&idea, after, entry).await
    }

    /// Every pending stage `user_id` may sign right now.
    pub async fn pending_approvals(&self, user_id: i64) -> Result<Vec<PendingApproval>, AppError> {
        let at = self.clock.now();
        let mut plans: HashMap<i64, StagePlan> = HashMap::new();
        let mut inbox = Vec::new();

        for idea in self.ideas.find_pending().await? {
            let Some(workflow_id) = idea.workflow_id else {
                continue;
            };
            if !plans.contains_key(&workflow_id) {
                match self.planner.plan(workflow_id).await {
                    Ok(plan) => {
                        plans.insert(workflow_id, plan);
                    }
                    Err(AppError::NotFound(what)) => {
                        log::warn!("Idea #{} skipped in approval inbox: {what} not found", idea.id);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            let Some(position) = plans.get(&workflow_id).and_then(|p| p.position_of(idea.current_stage)) else {
                continue;
            };
            for definition in position.stages() {
                if idea.approved_stages.contains(&definition.stage) {
                    continue;
                }
                if let Some(approver) = self
                    .approvers
                    .is_eligible(user_id, definition, scope_of(&idea), at)
                    .await?
                {
                    inbox.push(PendingApproval {
                        idea_id: idea.id,
                        title: idea.title.clone(),
                        workflow_id,
                        stage: definition.stage,
                        via_acting: approver.via_acting,
                    });
                }
            }
        }
        Ok(inbox)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    pub(super) async fn plan_for(&self, idea: &Idea) -> Result<StagePlan, AppError> {
        let workflow_id = idea.workflow_id.ok_or_else(|| {
            AppError::InvalidStateTransition(format!("idea #{} has no workflow assigned", idea.id))
        })?;
        self.planner.plan(workflow_id).await
    }

    async fn require_approver(
        &self,
        idea: &Idea,
        position: &StagePosition,
        stage: i32,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let definition = position
            .stage(stage)
            .ok_or_else(|| AppError::NotFound(format!("stage {stage} of idea #{}", idea.id)))?;
        match self
            .approvers
            .is_eligible(actor.user_id, definition, scope_of(idea), at)
            .await?
        {
            Some(_) => Ok(()),
            None => Err(AppError::PermissionDenied(format!(
                "user #{} is not an approver for stage {stage} of idea #{}",
                actor.user_id, idea.id
            ))),
        }
    }

    /// Unsigned stages of `position` that still need someone. Optional stages nobody
    /// can sign are not waited for.
    async fn outstanding(&self, position: &StagePosition, idea: &Idea, at: DateTime<Utc>) -> Result<Vec<i32>, AppError> {
        let mut waiting = Vec::new();
        for definition in position.stages() {
            if idea.approved_stages.contains(&definition.stage) {
                continue;
            }
            let approvers = self.approvers.eligible_for_stage(definition, scope_of(idea), at).await?;
            if !approvers.is_empty() {
                waiting.push(definition.stage);
            } else if definition.is_mandatory {
                return Err(AppError::NoEligibleApprover {
                    workflow_id: definition.workflow_id,
                    stage: definition.stage,
                });
            }
        }
        Ok(waiting)
    }

    /// Move `idea` to the first position after `after_stage` that someone can act
    /// on, or complete it. `max_stage` is taken from `plan`, never from the stored
    /// idea. Returns the notification to send once committed.
    async fn move_past(
        &self,
        plan: &StagePlan,
        after_stage: i32,
        idea: &mut Idea,
        at: DateTime<Utc>,
        on_unstaffed: OnUnstaffed,
    ) -> Result<Notification, AppError> {
        idea.max_stage = plan.max_stage();
        let mut target: Option<(i32, BTreeSet<i64>)> = None;

        'positions: for position in plan.positions_after(after_stage) {
            let mut recipients = BTreeSet::new();
            for definition in position.stages() {
                let approvers = self.approvers.eligible_for_stage(definition, scope_of(idea), at).await?;
                if approvers.is_empty() {
                    if definition.is_mandatory {
                        match on_unstaffed {
                            OnUnstaffed::Fail => {
                                return Err(AppError::NoEligibleApprover {
                                    workflow_id: plan.workflow_id,
                                    stage: definition.stage,
                                });
                            }
                            OnUnstaffed::Stop => {
                                log::warn!(
                                    "Idea #{} parked at unstaffed mandatory stage {}",
                                    idea.id,
                                    definition.stage
                                );
                                target = Some((position.head(), recipients));
                                break 'positions;
                            }
                        }
                    }
                    log::info!(
                        "Idea #{}: optional stage {} has no approver, skipping",
                        idea.id,
                        definition.stage
                    );
                }
                recipients.extend(approvers.iter().map(|a| a.user.id));
            }
            if !recipients.is_empty() {
                target = Some((position.head(), recipients));
                break;
            }
        }

        idea.approved_stages.clear();
        match target {
            Some((stage, recipients)) => {
                idea.current_stage = stage;
                idea.current_status = IdeaStatus::Pending;
                Ok(Notification {
                    template: NotificationTemplate::ApprovalRequested,
                    idea_id: idea.id,
                    recipients: recipients.into_iter().collect(),
                    context: json!({ "stage": stage, "title": idea.title }),
                })
            }
            None => {
                idea.current_stage = plan.max_stage();
                idea.current_status = IdeaStatus::Completed;
                Ok(Notification {
                    template: NotificationTemplate::IdeaCompleted,
                    idea_id: idea.id,
                    recipients: vec![idea.submitted_by],
                    context: json!({ "title": idea.title }),
                })
            }
        }
    }

    pub(super) async fn commit(&self, before: &Idea, after: Idea, entry: AuditEntry) -> Result<Idea, AppError> {
        match self.ideas.commit(before.version, &after, &entry).await {
            Ok(stored) => {
                log::info!("{}", entry.summary());
                Ok(stored)
            }
            Err(e @ AppError::ConcurrencyConflict { .. }) => {
                log::warn!("{} lost a race: {e}", entry.action);
                Err(e)
            }
            Err(e) => {
                log::error!("Committing {} for idea #{} failed: {e}", entry.action, before.id);
                Err(e)
            }
        }
    }
}

fn ensure_pending(idea: &Idea) -> Result<(), AppError> {
    if idea.is_deleted {
        return Err(AppError::InvalidStateTransition(format!("idea #{} is deleted", idea.id)));
    }
    if idea.is_rejected {
        return Err(AppError::InvalidStateTransition(format!("idea #{} was rejected", idea.id)));
    }
    match idea.current_status {
        IdeaStatus::Pending => Ok(()),
        IdeaStatus::Draft => Err(AppError::InvalidStateTransition(format!(
            "idea #{} has not been submitted",
            idea.id
        ))),
        status => Err(AppError::InvalidStateTransition(format!("idea #{} is {status}", idea.id))),
    }
}

/// The position the idea waits at, checked to contain an unsigned `stage`.
fn current_position<'p>(plan: &'p StagePlan, idea: &Idea, stage: i32) -> Result<&'p StagePosition, AppError> {
    let position = plan.position_of(idea.current_stage).ok_or_else(|| {
        AppError::InvalidStateTransition(format!(
            "idea #{} sits at stage {}, which workflow #{} does not define",
            idea.id, idea.current_stage, plan.workflow_id
        ))
    })?;
    if !position.contains(stage) {
        return Err(AppError::InvalidStateTransition(format!(
            "idea #{} is pending at stage(s) {:?}, not stage {stage}",
            idea.id,
            position.stage_numbers()
        )));
    }
    if idea.approved_stages.contains(&stage) {
        return Err(AppError::InvalidStateTransition(format!(
            "stage {stage} of idea #{} is already approved",
            idea.id
        )));
    }
    Ok(position)
}
