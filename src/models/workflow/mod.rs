pub mod condition;
pub mod queries;
pub mod types;

pub use condition::{Comparison, Condition, Membership};
pub use queries::PgWorkflowStore;
pub use types::*;
