//! Error taxonomy shared across the coordination subsystem (spec §7).
//!
//! Every component surfaces failures through [`CoreError`] so that protocol
//! encoding (Error frames), task lifecycle records, and logs all agree on the
//! same kind/code pairing. Downstream code should map into this enum at the
//! boundary rather than inventing parallel error types.

use thiserror::Error;

/// A stable error kind with its spec-assigned numeric code.
///
/// Code ranges: 1000-1999 protocol, 2000-2999 auth, 3000-3999 rate/quota,
/// 4000-4999 business, 5000-5999 retryable, 6000-6999 fatal.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown method: {0}")]
    MethodNotFound(String),

    #[error("invalid params: field={field} reason={reason}")]
    InvalidParams { field: String, reason: String },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("no capable agent for required capabilities")]
    NoCapableAgent,

    #[error("illegal state transition: {0}")]
    ConflictState(String),

    #[error("transient failure: {0}")]
    Retryable(String),

    #[error("internal invariant violation: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Numeric code per spec §7 / §6.
    pub fn code(&self) -> u32 {
        match self {
            CoreError::ProtocolViolation(_) => 1001,
            CoreError::MalformedFrame(_) => 1002,
            CoreError::MethodNotFound(_) => 4004,
            CoreError::InvalidParams { .. } => 4005,
            CoreError::AuthFailed(_) => 2001,
            CoreError::RateLimited(_) => 4002,
            CoreError::BudgetExceeded(_) => 4100,
            CoreError::NoCapableAgent => 4101,
            CoreError::ConflictState(_) => 4008,
            CoreError::Retryable(_) => 5000,
            CoreError::Fatal(_) => 6000,
        }
    }

    /// Whether a caller should retry this operation. Mirrors spec §7's
    /// propagation policy: only `Retryable` and rate limiting are
    /// expected to be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Retryable(_) | CoreError::RateLimited(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
