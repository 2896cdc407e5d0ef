//! Error types for the broker client library.

use thiserror::Error;

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors returned by broker publish and consume operations.
///
/// The transient/permanent split drives the caller's retry policy: a
/// `Transient` error is likely to resolve on retry (broker unreachable,
/// delivery timeout, full local queue), a `Permanent` error indicates the
/// request itself was rejected and retrying will not help.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Broker or network failure likely to resolve on retry
    #[error("transient broker error: {0}")]
    Transient(String),

    /// Payload rejected by the broker, must not be retried
    #[error("permanent broker error: {0}")]
    Permanent(String),

    /// Consumer group subscription failed
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Offset commit failed
    #[error("offset commit failed: {0}")]
    Commit(String),
}

impl BrokerError {
    /// Whether the caller may retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Transient(_))
    }
}
