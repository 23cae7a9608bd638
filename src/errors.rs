//! Error and Result types shared across the crate.
//!
//! Individual modules define their own error enums for the failures they
//! can produce; this module aggregates them into the [`Error`] surfaced by
//! every timeline operation.

pub use crate::{commands::CommandError, net::NetError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Submission was rejected because the client already has
    /// `pipeline_max_size` calls inflight. Surfaced to the caller as
    /// backpressure, never retried.
    #[error("Pipeline is full")]
    Overloaded,
    /// No pooled client could be checked out within the pool timeout.
    #[error("Timed out waiting for a pooled client")]
    PoolTimeout,
    /// The host is inside its auto-disable cooldown window.
    #[error("Host is disabled after sustained errors")]
    HostDown,
    /// No response arrived within the per-call deadline.
    #[error("Timed out waiting for a call response")]
    CallTimeout,
    /// The store reported a failure for this call. The connection itself is
    /// still healthy.
    #[error("Store error: {0}")]
    Store(String),
    /// The client shut down (or lost its connection) before the call could
    /// be delivered.
    #[error("Client has shut down")]
    Closed,
    #[error("Network error")]
    Net(#[from] NetError),
    #[error("Command error")]
    Command(#[from] CommandError),
}

impl Error {
    /// Whether a failed replica write may be re-enqueued as a retry job.
    /// Backpressure is the one failure that must reach the caller instead.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Overloaded)
    }
}
