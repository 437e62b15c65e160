//! Log entry model
//!
//! A log entry is the immutable record stored at one global address. It
//! carries a tagged data type, the set of streams it belongs to, per-stream
//! backpointers to the previous entry of each stream, and an opaque payload.

use crate::address::{is_address, GlobalAddress, NON_EXIST};
use crate::stream_id::StreamId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Tagged type of the record at a global address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// A regular data entry written by a client.
    Data,
    /// An address allocated by the sequencer but explicitly filled to
    /// preserve order after the writer failed.
    Hole,
    /// One record of a checkpoint sequence.
    Checkpoint,
    /// The address has been garbage-collected.
    Trimmed,
    /// The address has been allocated but never written.
    Empty,
}

/// Position of a checkpoint record within its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointKind {
    Start,
    Entries,
    End,
}

/// Checkpoint bookkeeping carried by a `Checkpoint` entry.
///
/// Only the `End` record carries a meaningful `snapshot_address`: every
/// entry of the checkpointed stream at or below it is subsumed by the
/// checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_id: Uuid,
    pub kind: CheckpointKind,
    pub snapshot_address: GlobalAddress,
}

/// The immutable record at one global address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The address this entry was written at.
    pub global_address: GlobalAddress,

    /// What kind of record this is.
    pub data_type: DataType,

    /// The streams this entry belongs to.
    pub streams: BTreeSet<StreamId>,

    /// Per-stream pointer to the previous entry of that stream, or
    /// `NON_EXIST` at the start of a stream.
    pub backpointers: BTreeMap<StreamId, GlobalAddress>,

    /// Opaque payload; empty for non-data records.
    pub payload: Vec<u8>,

    /// Present iff `data_type == Checkpoint`.
    pub checkpoint: Option<CheckpointRecord>,
}

impl LogEntry {
    /// Create a data entry. Panics if any backpointer does not precede the
    /// entry address (invariant violations are programming errors).
    pub fn data(
        global_address: GlobalAddress,
        streams: BTreeSet<StreamId>,
        backpointers: BTreeMap<StreamId, GlobalAddress>,
        payload: Vec<u8>,
    ) -> Self {
        for (stream, &bp) in &backpointers {
            assert!(
                bp == NON_EXIST || (is_address(bp) && bp < global_address),
                "backpointer {} for stream {} does not precede address {}",
                bp,
                stream,
                global_address
            );
        }
        Self {
            global_address,
            data_type: DataType::Data,
            streams,
            backpointers,
            payload,
            checkpoint: None,
        }
    }

    /// Create a checkpoint record entry for a single stream.
    pub fn checkpoint(
        global_address: GlobalAddress,
        stream: StreamId,
        backpointer: GlobalAddress,
        record: CheckpointRecord,
        payload: Vec<u8>,
    ) -> Self {
        let mut entry = Self::data(
            global_address,
            BTreeSet::from([stream]),
            BTreeMap::from([(stream, backpointer)]),
            payload,
        );
        entry.data_type = DataType::Checkpoint;
        entry.checkpoint = Some(record);
        entry
    }

    /// Create a hole record.
    pub fn hole(global_address: GlobalAddress) -> Self {
        Self::tagged(global_address, DataType::Hole)
    }

    /// Create the record returned for a never-written address.
    pub fn empty(global_address: GlobalAddress) -> Self {
        Self::tagged(global_address, DataType::Empty)
    }

    /// Create the record returned for a garbage-collected address.
    pub fn trimmed(global_address: GlobalAddress) -> Self {
        Self::tagged(global_address, DataType::Trimmed)
    }

    fn tagged(global_address: GlobalAddress, data_type: DataType) -> Self {
        Self {
            global_address,
            data_type,
            streams: BTreeSet::new(),
            backpointers: BTreeMap::new(),
            payload: Vec::new(),
            checkpoint: None,
        }
    }

    /// True iff this entry belongs to `stream`.
    pub fn contains_stream(&self, stream: StreamId) -> bool {
        self.streams.contains(&stream)
    }

    /// The backpointer recorded for `stream`, if any.
    pub fn backpointer(&self, stream: StreamId) -> Option<GlobalAddress> {
        self.backpointers.get(&stream).copied()
    }

    /// Rough in-memory footprint, used for replication batching.
    pub fn size_estimate(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.payload.len()
            + (self.streams.len() + self.backpointers.len()) * std::mem::size_of::<StreamId>()
    }
}
