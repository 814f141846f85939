pub mod queries;
pub mod types;

pub use queries::PgDirectory;
pub use types::*;
