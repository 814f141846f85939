//! Approver resolution for a stage and organizational scope.
//!
//! Candidates are the union of home role assignments at the stage's level and the
//! acting delegations at that level active at the given instant. Acting grants only
//! ever add eligibility. Among the candidates the narrowest matching scope wins:
//!
//! 1. department match (the grant's division, if set, must match too)
//! 2. division-level grants (no department)
//! 3. organization-wide grants (no division, no department)

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::AppError;
use crate::models::approver::Approver;
use crate::models::workflow::WorkflowStage;
use crate::store::{DirectoryStore, WorkflowStore};

/// Target organizational unit of an idea.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'a> {
    pub division: Option<&'a str>,
    pub department: Option<&'a str>,
}

impl<'a> Scope<'a> {
    pub fn new(division: Option<&'a str>, department: Option<&'a str>) -> Self {
        Scope { division, department }
    }
}

#[derive(Debug, Clone)]
struct Grant {
    user_id: i64,
    division: Option<String>,
    department: Option<String>,
    acting: bool,
}

impl Grant {
    fn matches_department(&self, scope: &Scope<'_>) -> bool {
        match (scope.department, self.department.as_deref()) {
            (Some(wanted), Some(held)) if wanted == held => {
                self.division.is_none() || self.division.as_deref() == scope.division
            }
            _ => false,
        }
    }

    fn matches_division(&self, scope: &Scope<'_>) -> bool {
        self.department.is_none() && scope.division.is_some() && self.division.as_deref() == scope.division
    }

    fn is_unscoped(&self) -> bool {
        self.division.is_none() && self.department.is_none()
    }
}

/// Narrowest non-empty tier, deduplicated per user. The flag is true when the user
/// qualifies only through acting grants.
fn pick_tier(grants: &[Grant], scope: &Scope<'_>) -> BTreeMap<i64, bool> {
    let tiers: [&dyn Fn(&Grant) -> bool; 3] = [
        &|g: &Grant| g.matches_department(scope),
        &|g: &Grant| g.matches_division(scope),
        &|g: &Grant| g.is_unscoped(),
    ];
    for tier in tiers {
        let mut picked: BTreeMap<i64, bool> = BTreeMap::new();
        for grant in grants.iter().filter(|&g| tier(g)) {
            let via_acting = picked.entry(grant.user_id).or_insert(true);
            *via_acting = *via_acting && grant.acting;
        }
        if !picked.is_empty() {
            return picked;
        }
    }
    BTreeMap::new()
}

pub struct ApproverResolver {
    workflows: Arc<dyn WorkflowStore>,
    directory: Arc<dyn DirectoryStore>,
}

impl ApproverResolver {
    pub fn new(workflows: Arc<dyn WorkflowStore>, directory: Arc<dyn DirectoryStore>) -> Self {
        ApproverResolver { workflows, directory }
    }

    /// Approvers for `stage` of `workflow_id`.
    ///
    /// An optional stage may resolve to nobody; a mandatory one fails with
    /// `NoEligibleApprover`.
    pub async fn resolve_approvers(
        &self,
        workflow_id: i64,
        stage: i32,
        division: Option<&str>,
        department: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Approver>, AppError> {
        let definition = self
            .workflows
            .get_stage(workflow_id, stage)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("stage {stage} of workflow #{workflow_id}")))?;

        let approvers = self
            .eligible_for_stage(&definition, Scope::new(division, department), at)
            .await?;
        if approvers.is_empty() && definition.is_mandatory {
            return Err(AppError::NoEligibleApprover { workflow_id, stage });
        }
        Ok(approvers)
    }

    /// Approvers for an already loaded stage, without the mandatory-stage policy.
    pub async fn eligible_for_stage(
        &self,
        stage: &WorkflowStage,
        scope: Scope<'_>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Approver>, AppError> {
        let mut grants: Vec<Grant> = self
            .directory
            .role_assignments(stage.level_id)
            .await?
            .into_iter()
            .map(|a| Grant {
                user_id: a.user_id,
                division: a.division_id,
                department: a.department_id,
                acting: false,
            })
            .collect();

        let acting = self.directory.acting_delegations(stage.level_id, at).await?;
        grants.extend(acting.into_iter().filter(|d| d.is_active_at(at)).map(|d| Grant {
            user_id: d.user_id,
            division: d.division_id,
            department: d.department_id,
            acting: true,
        }));

        let picked = pick_tier(&grants, &scope);
        if picked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = picked.keys().copied().collect();
        let users = self.directory.users(&ids).await?;
        if users.len() < ids.len() {
            log::warn!(
                "Stage {} of workflow #{}: {} approver(s) missing from the directory",
                stage.stage,
                stage.workflow_id,
                ids.len() - users.len()
            );
        }

        let mut approvers: Vec<Approver> = users
            .into_iter()
            .map(|user| Approver {
                via_acting: picked.get(&user.id).copied().unwrap_or(false),
                user,
            })
            .collect();
        approvers.sort_by_key(|a| a.user.id);
        Ok(approvers)
    }

    /// The approver entry for `user_id` if that user may sign `stage` at `at`.
    pub async fn is_eligible(
        &self,
        user_id: i64,
        stage: &WorkflowStage,
        scope: Scope<'_>,
        at: DateTime<Utc>,
    ) -> Result<Option<Approver>, AppError> {
        Ok(self
            .eligible_for_stage(stage, scope, at)
            .await?
            .into_iter()
            .find(|a| a.user.id == user_id))
    }
}
