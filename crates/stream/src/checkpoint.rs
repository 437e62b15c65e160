//! Checkpoint filtering during address discovery
//!
//! A checkpoint is a snapshot of an object's state written into the log
//! as a Start / Entries / End record sequence. When the backward walk
//! finds a complete sequence, the checkpoint subsumes every stream entry
//! at or below its snapshot address, so initial replay can skip them.
//! The first complete sequence encountered wins.

use skein_common::{CheckpointKind, DataType, GlobalAddress, LogEntry};
use uuid::Uuid;

/// Verdict on one visited entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOp {
    /// Queue the address.
    Include,
    /// Queue the address, then stop the walk.
    IncludeStop,
    /// Skip the address.
    Exclude,
    /// Skip the address and stop the walk.
    ExcludeStop,
}

impl CheckpointOp {
    pub fn includes(self) -> bool {
        matches!(self, CheckpointOp::Include | CheckpointOp::IncludeStop)
    }

    pub fn stops(self) -> bool {
        matches!(self, CheckpointOp::IncludeStop | CheckpointOp::ExcludeStop)
    }
}

/// A completely observed checkpoint sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointSuccess {
    pub id: Uuid,
    pub start_address: GlobalAddress,
    pub end_address: GlobalAddress,
    /// Stream entries at or below this address are subsumed.
    pub snapshot_address: GlobalAddress,
    pub num_entries: u64,
    pub bytes: u64,
}

struct PendingCheckpoint {
    id: Uuid,
    end_address: GlobalAddress,
    snapshot_address: GlobalAddress,
    start_address: Option<GlobalAddress>,
    num_entries: u64,
    bytes: u64,
}

/// Tracks checkpoint records across one backward walk.
pub struct CheckpointFilter {
    existing: Option<CheckpointSuccess>,
    pending: Option<PendingCheckpoint>,
}

impl CheckpointFilter {
    /// A filter for one walk. `existing` is the checkpoint the context
    /// already committed to, if any; its records are not consumed again.
    pub fn new(existing: Option<CheckpointSuccess>) -> Self {
        Self {
            existing,
            pending: None,
        }
    }

    /// Judge one visited entry. Entries are visited in descending address
    /// order, so the `End` record of a sequence is seen first.
    pub fn observe(&mut self, entry: &LogEntry) -> CheckpointOp {
        match entry.data_type {
            DataType::Checkpoint => self.observe_checkpoint(entry),
            _ => self.observe_data(entry),
        }
    }

    fn observe_checkpoint(&mut self, entry: &LogEntry) -> CheckpointOp {
        let Some(record) = entry.checkpoint else {
            tracing::warn!(
                "checkpoint entry at {} has no checkpoint record",
                entry.global_address
            );
            return CheckpointOp::Exclude;
        };
        if self.existing.is_some() {
            // A checkpoint already won on an earlier walk.
            return CheckpointOp::Exclude;
        }
        match &mut self.pending {
            None if record.kind == CheckpointKind::End => {
                self.pending = Some(PendingCheckpoint {
                    id: record.checkpoint_id,
                    end_address: entry.global_address,
                    snapshot_address: record.snapshot_address,
                    start_address: None,
                    num_entries: 1,
                    bytes: entry.size_estimate() as u64,
                });
                CheckpointOp::Include
            }
            // A Start or Entries record with no End above it belongs to a
            // sequence still being written; it cannot subsume anything.
            None => CheckpointOp::Exclude,
            Some(pending) if pending.id == record.checkpoint_id => {
                pending.num_entries += 1;
                pending.bytes += entry.size_estimate() as u64;
                if record.kind == CheckpointKind::Start {
                    pending.start_address = Some(entry.global_address);
                }
                CheckpointOp::Include
            }
            Some(_) => CheckpointOp::Exclude,
        }
    }

    fn observe_data(&self, entry: &LogEntry) -> CheckpointOp {
        let snapshot_address = match (&self.existing, &self.pending) {
            (Some(existing), _) => Some(existing.snapshot_address),
            (None, Some(pending)) if pending.start_address.is_some() => {
                Some(pending.snapshot_address)
            }
            _ => None,
        };
        match snapshot_address {
            Some(snapshot) if entry.global_address <= snapshot => CheckpointOp::ExcludeStop,
            _ => CheckpointOp::Include,
        }
    }

    /// The completed sequence, if the walk observed one.
    pub fn take_success(&mut self) -> Option<CheckpointSuccess> {
        let pending = self.pending.take()?;
        match pending.start_address {
            Some(start_address) => Some(CheckpointSuccess {
                id: pending.id,
                start_address,
                end_address: pending.end_address,
                snapshot_address: pending.snapshot_address,
                num_entries: pending.num_entries,
                bytes: pending.bytes,
            }),
            None => {
                self.pending = Some(pending);
                None
            }
        }
    }

    /// True if checkpoint records were seen but the sequence never
    /// completed; their queued addresses must be discarded.
    pub fn saw_partial(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.start_address.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_common::{CheckpointRecord, StreamId, NON_ADDRESS, NON_EXIST};
    use std::collections::{BTreeMap, BTreeSet};

    fn cp_entry(
        address: GlobalAddress,
        stream: StreamId,
        id: Uuid,
        kind: CheckpointKind,
        snapshot_address: GlobalAddress,
    ) -> LogEntry {
        LogEntry::checkpoint(
            address,
            stream,
            NON_EXIST,
            CheckpointRecord {
                checkpoint_id: id,
                kind,
                snapshot_address,
            },
            Vec::new(),
        )
    }

    fn data_entry(address: GlobalAddress, stream: StreamId) -> LogEntry {
        LogEntry::data(
            address,
            BTreeSet::from([stream]),
            BTreeMap::from([(stream, NON_EXIST)]),
            Vec::new(),
        )
    }

    #[test]
    fn test_complete_sequence_wins_and_subsumes() {
        let stream = StreamId::new();
        let id = Uuid::new_v4();
        let mut filter = CheckpointFilter::new(None);

        // Descending walk: End 13, Entries 12, Start 11, then data 10.
        assert_eq!(
            filter.observe(&cp_entry(13, stream, id, CheckpointKind::End, 10)),
            CheckpointOp::Include
        );
        assert_eq!(
            filter.observe(&cp_entry(12, stream, id, CheckpointKind::Entries, NON_ADDRESS)),
            CheckpointOp::Include
        );
        assert_eq!(
            filter.observe(&cp_entry(11, stream, id, CheckpointKind::Start, NON_ADDRESS)),
            CheckpointOp::Include
        );
        assert_eq!(
            filter.observe(&data_entry(10, stream)),
            CheckpointOp::ExcludeStop
        );

        let success = filter.take_success().unwrap();
        assert_eq!(success.start_address, 11);
        assert_eq!(success.end_address, 13);
        assert_eq!(success.snapshot_address, 10);
        assert_eq!(success.num_entries, 3);
    }

    #[test]
    fn test_data_above_snapshot_is_included() {
        let stream = StreamId::new();
        let id = Uuid::new_v4();
        let mut filter = CheckpointFilter::new(None);
        filter.observe(&cp_entry(13, stream, id, CheckpointKind::End, 10));
        filter.observe(&cp_entry(11, stream, id, CheckpointKind::Start, NON_ADDRESS));
        // Written concurrently with the checkpoint, above its snapshot.
        assert_eq!(
            filter.observe(&data_entry(12, stream)),
            CheckpointOp::Include
        );
    }

    #[test]
    fn test_incomplete_sequence_is_partial() {
        let stream = StreamId::new();
        let id = Uuid::new_v4();
        let mut filter = CheckpointFilter::new(None);
        filter.observe(&cp_entry(13, stream, id, CheckpointKind::End, 10));
        // Start never observed: no subsumption, data stays included.
        assert_eq!(
            filter.observe(&data_entry(9, stream)),
            CheckpointOp::Include
        );
        assert!(filter.take_success().is_none());
        assert!(filter.saw_partial());
    }

    #[test]
    fn test_records_without_end_above_are_skipped() {
        let stream = StreamId::new();
        let id = Uuid::new_v4();
        let mut filter = CheckpointFilter::new(None);
        assert_eq!(
            filter.observe(&cp_entry(12, stream, id, CheckpointKind::Entries, NON_ADDRESS)),
            CheckpointOp::Exclude
        );
    }

    #[test]
    fn test_existing_checkpoint_excludes_its_records() {
        let stream = StreamId::new();
        let id = Uuid::new_v4();
        let existing = CheckpointSuccess {
            id,
            start_address: 11,
            end_address: 13,
            snapshot_address: 10,
            num_entries: 3,
            bytes: 0,
        };
        let mut filter = CheckpointFilter::new(Some(existing));
        assert_eq!(
            filter.observe(&cp_entry(12, stream, id, CheckpointKind::Entries, NON_ADDRESS)),
            CheckpointOp::Exclude
        );
        assert_eq!(
            filter.observe(&data_entry(10, stream)),
            CheckpointOp::ExcludeStop
        );
        assert_eq!(
            filter.observe(&data_entry(14, stream)),
            CheckpointOp::Include
        );
    }

    #[test]
    fn test_foreign_sequence_records_are_skipped() {
        let stream = StreamId::new();
        let winner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut filter = CheckpointFilter::new(None);
        filter.observe(&cp_entry(13, stream, winner, CheckpointKind::End, 8));
        assert_eq!(
            filter.observe(&cp_entry(12, stream, other, CheckpointKind::End, 9)),
            CheckpointOp::Exclude
        );
    }
}
