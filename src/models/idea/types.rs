use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdeaStatus {
    Draft,
    Pending,
    Completed,
    Rejected,
}

impl IdeaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdeaStatus::Draft => "Draft",
            IdeaStatus::Pending => "Pending",
            IdeaStatus::Completed => "Completed",
            IdeaStatus::Rejected => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IdeaStatus::Completed | IdeaStatus::Rejected)
    }
}

impl fmt::Display for IdeaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdeaStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(IdeaStatus::Draft),
            "Pending" => Ok(IdeaStatus::Pending),
            "Completed" => Ok(IdeaStatus::Completed),
            "Rejected" => Ok(IdeaStatus::Rejected),
            other => Err(AppError::Validation(format!("unknown idea status '{other}'"))),
        }
    }
}

/// The attributes workflow conditions are evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaContext {
    pub category_id: String,
    pub division_id: String,
    pub department_id: String,
    pub saving_cost: f64,
    pub event_id: Option<String>,
}

/// Stage and status pair, recorded on both sides of every audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub stage: i32,
    pub status: IdeaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    pub id: i64,
    pub title: String,
    pub submitted_by: i64,
    pub category_id: String,
    pub target_division_id: String,
    pub target_department_id: String,
    pub saving_cost: f64,
    pub event_id: Option<String>,
    pub workflow_id: Option<i64>,
    pub max_stage: i32,
    pub current_stage: i32,
    pub current_status: IdeaStatus,
    /// Stages already signed inside the current parallel position.
    pub approved_stages: Vec<i32>,
    pub is_rejected: bool,
    pub rejection_reason: Option<String>,
    pub is_deleted: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Idea {
    pub fn context(&self) -> IdeaContext {
        IdeaContext {
            category_id: self.category_id.clone(),
            division_id: self.target_division_id.clone(),
            department_id: self.target_department_id.clone(),
            saving_cost: self.saving_cost,
            event_id: self.event_id.clone(),
        }
    }

    pub fn state(&self) -> StageState {
        StageState {
            stage: self.current_stage,
            status: self.current_status,
        }
    }
}

/// Input for a draft idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIdea {
    pub title: String,
    pub submitted_by: i64,
    pub category_id: String,
    pub target_division_id: String,
    pub target_department_id: String,
    pub saving_cost: f64,
    pub event_id: Option<String>,
}

/// A stage an approver can sign right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub idea_id: i64,
    pub title: String,
    pub workflow_id: i64,
    pub stage: i32,
    pub via_acting: bool,
}
