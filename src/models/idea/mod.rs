pub mod queries;
pub mod types;

pub use queries::PgIdeaStore;
pub use types::*;
