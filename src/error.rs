//! Error taxonomy for the cascading breaker.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::store::StoreError;

/// Errors produced by the request path and by detached cascade work.
#[derive(Debug, Error)]
pub enum CascadeError {
    /// The requested URL could not be normalized.
    #[error("failed to parse URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A required request field is missing or malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The endpoint is short-circuited, locally or through the shared cache.
    #[error("circuit breaker is open for {0}")]
    CircuitBreakerOpen(String),

    /// The downstream call failed with a transport error or a 5xx.
    #[error("failed to execute the request: {0}")]
    DownstreamExecutionFailed(String),

    /// Every configured alternative was open or failed.
    #[error("failed to execute the request to the alternative endpoint")]
    AlternativeExecutionFailed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Caller-visible outcome class of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The endpoint is unavailable because its breaker is open.
    Unavailable,
    /// Execution failed downstream or in the infrastructure.
    Internal,
    /// The request itself was unusable.
    FailedPrecondition,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Unavailable => "unavailable",
            Outcome::Internal => "internal",
            Outcome::FailedPrecondition => "failed_precondition",
        }
    }
}

impl CascadeError {
    /// Map the error onto the small set of outcomes callers see.
    pub fn outcome(&self) -> Outcome {
        match self {
            CascadeError::CircuitBreakerOpen(_) => Outcome::Unavailable,
            CascadeError::InvalidUrl { .. } | CascadeError::Validation(_) => {
                Outcome::FailedPrecondition
            }
            CascadeError::DownstreamExecutionFailed(_)
            | CascadeError::AlternativeExecutionFailed
            | CascadeError::Store(_)
            | CascadeError::Broker(_) => Outcome::Internal,
        }
    }
}
