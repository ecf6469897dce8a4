use std::fmt;

/// Error taxonomy shared by every port and orchestration component.
///
/// The variants map onto handling policy: transient failures are retried
/// and counted by the circuit breaker, permanent failures surface to the
/// caller unchanged, invariant violations are fatal for the loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Timeout, network, 5xx. Retried with bounded backoff; counted by the breaker.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Auth failure, bad request, unknown symbol. Never retried.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Rejected by the risk gatekeeper.
    #[error("validation rejected: {0}")]
    Validation(String),

    /// Not enough non-errored providers for an ensemble vote.
    #[error("insufficient quorum: {0}")]
    Quorum(String),

    /// Rejected without calling the collaborator.
    #[error("circuit breaker [{0}] is open")]
    BreakerOpen(String),

    /// Programmer error. Fatal for the loop.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Cooperative cancellation; propagated, never reported as an error.
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn transient(msg: impl fmt::Display) -> Self {
        Self::Transient(msg.to_string())
    }

    pub fn permanent(msg: impl fmt::Display) -> Self {
        Self::Permanent(msg.to_string())
    }

    pub fn invariant(msg: impl fmt::Display) -> Self {
        Self::Invariant(msg.to_string())
    }

    /// Whether the breaker should count this failure toward its threshold.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::BreakerOpen(_))
    }

    /// Whether the loop agent must stop on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}
