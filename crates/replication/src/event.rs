//! Replication events
//!
//! The input alphabet of the log replication state machine. Events carry
//! an id so task completions can be matched against the sync that
//! spawned them.

use uuid::Uuid;

/// Kind of a replication event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationEventKind {
    /// Start (or restart) a full snapshot sync.
    SnapshotSyncRequest,
    /// Cancel the in-flight snapshot sync.
    SnapshotSyncCancel,
    /// The snapshot reader finished streaming a snapshot.
    SnapshotSyncComplete,
    /// The log was trimmed under a reader; a snapshot sync is required.
    TrimmedException,
    /// This node is no longer the replication leader.
    LeadershipLost,
    /// Start incremental (delta) sync.
    StartLogEntrySync,
    /// Stop the state machine permanently.
    LogReplicationStop,
}

/// One event submitted to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationEvent {
    pub id: Uuid,
    pub kind: ReplicationEventKind,
}

impl ReplicationEvent {
    pub fn new(kind: ReplicationEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }

    /// An event correlated with an existing sync id.
    pub fn with_id(kind: ReplicationEventKind, id: Uuid) -> Self {
        Self { id, kind }
    }
}
