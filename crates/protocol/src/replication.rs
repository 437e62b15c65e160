//! Cross-cluster replication wire format
//!
//! Replication between an active cluster and a standby is a stream of
//! `ReplicationEntry` messages flowing over a duplex channel; acks flow
//! back as entries with the `ack` field set.

use serde::{Deserialize, Serialize};
use skein_common::{GlobalAddress, NON_ADDRESS};

/// Kind of a replication message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationEntryType {
    /// Start of a full snapshot at `snapshot_timestamp`.
    SnapshotStart,
    /// One entry of an in-flight snapshot.
    SnapshotMessage,
    /// End of a full snapshot.
    SnapshotEnd,
    /// One incremental log entry.
    LogEntry,
    /// Keep-alive.
    Heartbeat,
}

/// One message of the replication stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEntry {
    pub entry_type: ReplicationEntryType,
    /// Epoch of the sending cluster when the message was produced.
    pub epoch: u64,
    /// Global address of the carried entry, or `NON_ADDRESS` for control
    /// messages.
    pub timestamp: GlobalAddress,
    /// The pinned address of the snapshot this message belongs to, or
    /// `NON_ADDRESS` during delta sync.
    pub snapshot_timestamp: GlobalAddress,
    /// Encoded log entry, empty for control messages.
    pub payload: Vec<u8>,
    /// Highest address the receiver has applied, or `NON_ADDRESS`.
    pub ack: GlobalAddress,
}

impl ReplicationEntry {
    /// A control message with no entry payload.
    pub fn control(entry_type: ReplicationEntryType, epoch: u64) -> Self {
        Self {
            entry_type,
            epoch,
            timestamp: NON_ADDRESS,
            snapshot_timestamp: NON_ADDRESS,
            payload: Vec::new(),
            ack: NON_ADDRESS,
        }
    }

    /// A snapshot boundary message pinned at `snapshot_timestamp`.
    pub fn snapshot_boundary(
        entry_type: ReplicationEntryType,
        epoch: u64,
        snapshot_timestamp: GlobalAddress,
    ) -> Self {
        Self {
            snapshot_timestamp,
            ..Self::control(entry_type, epoch)
        }
    }

    /// A message carrying one log entry.
    pub fn entry(
        entry_type: ReplicationEntryType,
        epoch: u64,
        timestamp: GlobalAddress,
        snapshot_timestamp: GlobalAddress,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            entry_type,
            epoch,
            timestamp,
            snapshot_timestamp,
            payload,
            ack: NON_ADDRESS,
        }
    }

    /// An ack for everything at or below `address`.
    pub fn ack(epoch: u64, address: GlobalAddress) -> Self {
        Self {
            ack: address,
            ..Self::control(ReplicationEntryType::Heartbeat, epoch)
        }
    }
}
