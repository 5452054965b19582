//! Error types for Tempo core domain logic

use crate::types::AccountId;
use thiserror::Error;

/// Core domain errors
///
/// Every variant maps onto exactly one HTTP status and stable `error_code`
/// at the API boundary; components below the API report these kinds and
/// nothing else.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),

    #[error("an unfinished onboarding session already exists")]
    SessionExists,

    #[error("onboarding session is already complete")]
    SessionComplete,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} is still referenced and cannot be deleted")]
    InUse(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code included in API error envelopes
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::AuthRequired => "auth_required",
            Self::Forbidden => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::UnknownAccount(_) => "unknown_account",
            Self::SessionExists => "session_exists",
            Self::SessionComplete => "session_complete",
            Self::Conflict(_) => "conflict",
            Self::InUse(_) => "in_use",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal(_) => "internal",
        }
    }

    /// Shorthand for wrapping a downstream failure
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // Unique/foreign-key violations surface as conflicts, not 500s
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                    Self::Conflict(db_err.to_string())
                } else {
                    Self::Internal(format!("database error: {db_err}"))
                }
            }
            _ => Self::Internal(format!("database error: {err}")),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("invalid JSON payload: {err}"))
    }
}
