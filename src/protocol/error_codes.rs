//! Error taxonomy surfaced at the `SessionCoordinator` boundary (§7).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error code transported alongside `CoreError` messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    Forbidden,
    Unauthorized,
    Conflict,
    PreconditionFailed,
    InvalidArgument,
    InternalError,
}

/// Errors raised by the coordinator/engine/lobby surface. Internal
/// generator and store retry failures never reach this type, they are
/// swallowed into fallback text or logged, per §7.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error("precondition failed: {0}")]
    PreconditionFailed(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::PreconditionFailed(_) => ErrorCode::PreconditionFailed,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Forbidden(_) => 403,
            Self::Unauthorized => 401,
            Self::Conflict(_) => 409,
            Self::PreconditionFailed(_) => 412,
            Self::InvalidArgument(_) => 400,
            Self::Internal(_) => 500,
        }
    }
}
