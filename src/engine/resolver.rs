use std::sync::Arc;

use crate::errors::AppError;
use crate::models::idea::IdeaContext;
use crate::models::workflow::{Condition, Workflow};
use crate::store::WorkflowStore;

/// Picks the workflow an idea should follow.
pub struct WorkflowResolver {
    workflows: Arc<dyn WorkflowStore>,
}

impl WorkflowResolver {
    pub fn new(workflows: Arc<dyn WorkflowStore>) -> Self {
        WorkflowResolver { workflows }
    }

    /// The single applicable active workflow, or `None` when nothing qualifies.
    pub async fn resolve_applicable_workflow(&self, ctx: &IdeaContext) -> Result<Option<Workflow>, AppError> {
        let candidates = self.workflows.get_all_active().await?;
        Ok(select_workflow(candidates, ctx))
    }

    /// Same as `resolve_applicable_workflow`, but a miss is a `NotFound`.
    pub async fn resolve_required(&self, ctx: &IdeaContext) -> Result<Workflow, AppError> {
        self.resolve_applicable_workflow(ctx).await?.ok_or_else(|| {
            AppError::NotFound(format!(
                "no active workflow applies to category {} in {}/{}",
                ctx.category_id, ctx.division_id, ctx.department_id
            ))
        })
    }
}

/// True when every active condition of `workflow` holds for `ctx`.
///
/// A stored condition that does not compile disqualifies the workflow.
pub fn qualifies(workflow: &Workflow, ctx: &IdeaContext) -> bool {
    workflow.conditions.iter().filter(|c| c.is_active).all(|row| {
        match Condition::from_stored(row) {
            Ok(condition) => condition.evaluate(ctx),
            Err(e) => {
                log::warn!(
                    "Workflow #{} condition #{} is malformed and never matches: {e}",
                    workflow.id,
                    row.id
                );
                false
            }
        }
    })
}

/// Lowest priority wins; equal priorities fall back to the lowest workflow id.
pub fn select_workflow(candidates: Vec<Workflow>, ctx: &IdeaContext) -> Option<Workflow> {
    let mut qualifying: Vec<Workflow> = candidates
        .into_iter()
        .filter(|w| w.is_active && qualifies(w, ctx))
        .collect();
    qualifying.sort_by_key(|w| (w.priority, w.id));

    let mut iter = qualifying.into_iter();
    let chosen = iter.next()?;
    let tied: Vec<i64> = iter
        .take_while(|w| w.priority == chosen.priority)
        .map(|w| w.id)
        .collect();
    if !tied.is_empty() {
        log::warn!(
            "Workflows {:?} tie with #{} at priority {}; using #{} (lowest id)",
            tied,
            chosen.id,
            chosen.priority,
            chosen.id
        );
    }
    Some(chosen)
}
