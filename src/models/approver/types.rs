use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Safe user view for approver lists and notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
}

/// A home role held by a user at an approval level, optionally scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: i64,
    pub level_id: i64,
    pub division_id: Option<String>,
    pub department_id: Option<String>,
}

/// Time-boxed acting role. Grants the level/scope on top of the user's home roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActingDelegation {
    pub id: i64,
    pub user_id: i64,
    pub level_id: i64,
    pub division_id: Option<String>,
    pub department_id: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl ActingDelegation {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at <= self.ends_at
    }
}

/// A resolved approver for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub user: UserSummary,
    /// Eligible only through an acting delegation.
    pub via_acting: bool,
}
