//! Error taxonomy of the runtime
//!
//! Transient failures (network, server not ready, timeout) are recovered
//! locally by the component that incurred them. Logical outcomes that the
//! original expressed as exceptions (trim, overwrite) surface either as
//! `RuntimeError` variants or as `WriteStatus` values, depending on whether
//! the operation can report them in-band.

use crate::address::GlobalAddress;
use crate::stream_id::StreamId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced by the log, sequencer, and replication components.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("address {0} has been trimmed")]
    Trimmed(GlobalAddress),

    #[error("wrong epoch: client at {client}, server at {server}")]
    WrongEpoch { client: u64, server: u64 },

    #[error("wrong cluster id: {0}")]
    WrongCluster(Uuid),

    #[error("log unit out of space at address {0}")]
    OutOfSpace(GlobalAddress),

    #[error("network failure: {0}")]
    Network(String),

    #[error("server not ready")]
    ServerNotReady,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transaction aborted: {0}")]
    TransactionAborted(AbortCause),

    #[error("leadership lost")]
    LeadershipLost,
}

impl RuntimeError {
    /// True for failures that a retry loop may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuntimeError::Network(_) | RuntimeError::ServerNotReady | RuntimeError::Timeout(_)
        )
    }
}

/// Why a transaction was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCause {
    /// The sequencer found a conflicting committed write.
    Conflict { stream: Option<StreamId> },
    /// A read inside the transaction hit a trimmed address.
    TrimmedRead,
    /// A network failure interrupted the transaction; retrying at a new
    /// snapshot is advisable.
    NetworkFailure,
    /// The token epoch went stale; the layout must be refreshed.
    StaleEpoch,
    /// The caller aborted explicitly.
    Explicit,
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::Conflict {
                stream: Some(stream),
            } => write!(f, "conflict on stream {}", stream),
            AbortCause::Conflict { stream: None } => write!(f, "conflict"),
            AbortCause::TrimmedRead => write!(f, "read of a trimmed address"),
            AbortCause::NetworkFailure => write!(f, "network failure"),
            AbortCause::StaleEpoch => write!(f, "stale epoch"),
            AbortCause::Explicit => write!(f, "explicit abort"),
        }
    }
}

/// Outcome of a log write, reported in-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteStatus {
    /// The entry was written (or an identical entry already existed).
    Ok,
    /// A competing writer holds the address with different content.
    Overwrite,
    /// The address has been garbage-collected.
    Trimmed,
    /// The log unit is exhausted; fatal to the write.
    OutOfSpace,
}
