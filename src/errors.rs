use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Db(sqlx::Error),
    NotFound(String),
    InvalidStateTransition(String),
    NoEligibleApprover { workflow_id: i64, stage: i32 },
    ConcurrencyConflict { idea_id: i64 },
    Configuration(String),
    PermissionDenied(String),
    Validation(String),
    Environment(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Db(e) => write!(f, "Database error: {e}"),
            AppError::NotFound(what) => write!(f, "Not found: {what}"),
            AppError::InvalidStateTransition(msg) => write!(f, "Invalid state transition: {msg}"),
            AppError::NoEligibleApprover { workflow_id, stage } => write!(
                f,
                "No eligible approver for mandatory stage {stage} of workflow #{workflow_id}"
            ),
            AppError::ConcurrencyConflict { idea_id } => write!(
                f,
                "Idea #{idea_id} was modified concurrently, reload and retry"
            ),
            AppError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            AppError::PermissionDenied(msg) => write!(f, "Permission denied: {msg}"),
            AppError::Validation(msg) => write!(f, "Validation error: {msg}"),
            AppError::Environment(msg) => write!(f, "Environment error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidStateTransition(_) | AppError::ConcurrencyConflict { .. } => {
                StatusCode::CONFLICT
            }
            AppError::NoEligibleApprover { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Configuration(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Db(_) | AppError::Environment(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Db(_) | AppError::Environment(_) => {
                log::error!("{self}");
                HttpResponse::InternalServerError().body("Internal Server Error")
            }
            _ => HttpResponse::build(self.status_code()).body(self.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Db(e)
    }
}

/// True when `e` is a Postgres unique-constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == "23505")
}
