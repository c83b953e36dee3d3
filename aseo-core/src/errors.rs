//! Error types for the quota/billing engine and audit pipeline.

use thiserror::Error;

/// Denial reasons produced by the quota gate (§4.D `authenticate_and_gate`).
///
/// These are the only three error kinds the gate itself can raise; every
/// other failure surfaces through [`CoreError`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    #[error("invalid credential")]
    InvalidCredential,

    #[error("subscription inactive: {status}")]
    SubscriptionInactive { status: String },

    #[error("rate limit exceeded: {current_usage}/{limit}")]
    RateLimitExceeded {
        current_usage: i64,
        limit: i64,
        overage: i64,
        days_left: i64,
        cycle_end: chrono::DateTime<chrono::Utc>,
    },
}

/// Crate-wide error type for every other fallible operation.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("gate denied: {0}")]
    Gate(#[from] GateError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("unauthorized admin request")]
    UnauthorizedAdmin,

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Internal(anyhow::anyhow!(err))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
