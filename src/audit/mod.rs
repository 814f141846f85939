//! Audit trail entries for idea transitions.
//!
//! Entries are appended by `IdeaStore::commit` in the same transaction as the idea
//! update, so an entry exists exactly when its transition was committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;
use crate::models::idea::{Idea, StageState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Submitted,
    Approved,
    Rejected,
    Bypassed,
    WorkflowChanged,
    StagesRedefined,
    Deleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Submitted => "idea.submitted",
            AuditAction::Approved => "idea.approved",
            AuditAction::Rejected => "idea.rejected",
            AuditAction::Bypassed => "idea.bypassed",
            AuditAction::WorkflowChanged => "idea.workflow_changed",
            AuditAction::StagesRedefined => "idea.stages_redefined",
            AuditAction::Deleted => "idea.deleted",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idea.submitted" => Ok(AuditAction::Submitted),
            "idea.approved" => Ok(AuditAction::Approved),
            "idea.rejected" => Ok(AuditAction::Rejected),
            "idea.bypassed" => Ok(AuditAction::Bypassed),
            "idea.workflow_changed" => Ok(AuditAction::WorkflowChanged),
            "idea.stages_redefined" => Ok(AuditAction::StagesRedefined),
            "idea.deleted" => Ok(AuditAction::Deleted),
            other => Err(AppError::Validation(format!("unknown audit action '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub idea_id: i64,
    pub action: AuditAction,
    pub actor_id: i64,
    pub from: StageState,
    pub to: StageState,
    pub workflow_from: Option<i64>,
    pub workflow_to: Option<i64>,
    pub reason: Option<String>,
    pub details: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Entry describing the move from `before` to `after`.
    pub fn between(
        action: AuditAction,
        actor_id: i64,
        before: &Idea,
        after: &Idea,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        AuditEntry {
            idea_id: after.id,
            action,
            actor_id,
            from: before.state(),
            to: after.state(),
            workflow_from: before.workflow_id,
            workflow_to: after.workflow_id,
            reason: None,
            details: Value::Null,
            recorded_at,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// One-line form written to the application log next to the stored entry.
    pub fn summary(&self) -> String {
        format!(
            "{} idea #{} by user #{}: stage {} {} -> stage {} {}",
            self.action,
            self.idea_id,
            self.actor_id,
            self.from.stage,
            self.from.status,
            self.to.stage,
            self.to.status
        )
    }
}
