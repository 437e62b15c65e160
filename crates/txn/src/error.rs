//! Transaction error types

use crate::types::TxnState;
use skein_common::{AbortCause, RuntimeError};
use thiserror::Error;

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TxnError>;

/// Errors surfaced by transaction contexts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TxnError {
    #[error("transaction aborted: {0}")]
    Aborted(AbortCause),

    #[error("writes are not permitted in snapshot transactions")]
    WritesNotPermitted,

    #[error("transaction is {0:?}, not active")]
    NotActive(TxnState),

    #[error("runtime failure: {0}")]
    Runtime(#[from] RuntimeError),
}
