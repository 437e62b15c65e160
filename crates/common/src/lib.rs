//! Common types for the skein distributed log runtime
//!
//! This crate defines:
//! - Global address primitives and reserved sentinels
//! - Stream IDs (UUID-based)
//! - The log entry model (data types, backpointers, checkpoint records)
//! - Sequencer tokens and transaction resolution info
//! - The runtime error taxonomy
//! - Runtime settings recognized by every client component

mod address;
mod entry;
mod error;
mod settings;
mod stream_id;
mod token;

pub use address::{
    is_address, GlobalAddress, MAX_ADDRESS, NEVER_READ, NON_ADDRESS, NON_EXIST, NOT_FOUND,
};
pub use entry::{CheckpointKind, CheckpointRecord, DataType, LogEntry};
pub use error::{AbortCause, Result, RuntimeError, WriteStatus};
pub use settings::{RuntimeSettings, SocketType};
pub use stream_id::StreamId;
pub use token::{Token, TxResolutionInfo};
