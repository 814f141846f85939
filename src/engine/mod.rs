//! Workflow resolution and idea stage transitions.

pub mod admin;
pub mod approvers;
pub mod change_workflow;
pub mod planner;
pub mod resolver;
pub mod transition;

pub use admin::WorkflowAdmin;
pub use approvers::{ApproverResolver, Scope};
pub use change_workflow::WorkflowChange;
pub use planner::{StagePlan, StagePlanner, StagePosition};
pub use resolver::WorkflowResolver;
pub use transition::TransitionEngine;

use serde::{Deserialize, Serialize};

/// Identity performing an operation. Always passed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: i64) -> Self {
        Actor { user_id, is_admin: false }
    }

    pub fn admin(user_id: i64) -> Self {
        Actor { user_id, is_admin: true }
    }
}
