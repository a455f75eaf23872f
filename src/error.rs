//! Error kinds surfaced by the consensus core, per spec §7.
//!
//! `RaftError` covers failures that the core itself can raise while driving
//! the protocol (storage faults, cancellation, safety-invariant violations).
//! `ClientError` covers precondition failures a caller can recover from by
//! retrying elsewhere (wrong leader, non-voter, concurrent config change).

use thiserror::Error;

use crate::NodeId;

pub type RaftResult<T> = std::result::Result<T, RaftError>;

/// Errors raised by the consensus core itself.
#[derive(Debug, Error)]
pub enum RaftError {
    /// An allocation failure. Never swallowed; always surfaced to the caller.
    #[error("out of memory")]
    OutOfMemory,

    /// A storage read or write failed.
    #[error("storage fault: {0}")]
    IoFault(#[source] anyhow::Error),

    /// An in-flight I/O operation was cancelled, typically by `close`.
    #[error("operation canceled")]
    IoCanceled,

    /// A transport-level failure: destination unreachable, or the send
    /// queue evicted the request before it could be handed to the network.
    #[error("transport fault: {0}")]
    IoConnect(#[source] anyhow::Error),

    /// A safety invariant (log matching, commit conflict) was violated.
    /// The instance must halt; this is not recoverable by retrying.
    #[error("safety invariant violated, instance is shutting down: {0}")]
    Shutdown(String),

    /// The Raft instance has already been closed.
    #[error("raft instance is shutting down")]
    ShuttingDown,
}

impl RaftError {
    pub fn io_fault(err: impl Into<anyhow::Error>) -> Self {
        RaftError::IoFault(err.into())
    }

    pub fn io_connect(err: impl Into<anyhow::Error>) -> Self {
        RaftError::IoConnect(err.into())
    }

    pub fn fatal(&self) -> bool {
        matches!(self, RaftError::Shutdown(_))
    }
}

/// User-facing API precondition failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request was sent to a server which is not the current leader.
    #[error("not leader, current leader hint: {0:?}")]
    NotLeader(Option<NodeId>),

    /// The local server is not a voting member of the current configuration.
    #[error("server {0} is not a voter")]
    NotVoter(NodeId),

    /// A membership change is already in flight; at most one is allowed at
    /// a time (spec §4.7).
    #[error("a configuration change is already in progress")]
    ConfigurationBusy,

    /// The request was rejected because the instance is shutting down.
    #[error("raft instance is shutting down")]
    ShuttingDown,

    /// The proposed membership change is a no-op or otherwise invalid.
    #[error("invalid membership change: {0}")]
    InvalidChange(String),
}

impl From<RaftError> for ClientError {
    fn from(err: RaftError) -> Self {
        match err {
            RaftError::ShuttingDown => ClientError::ShuttingDown,
            other => ClientError::InvalidChange(other.to_string()),
        }
    }
}
