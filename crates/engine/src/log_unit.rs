//! Write-once address space
//!
//! This module stores log entries keyed by global address with the
//! semantics of a log-unit server: write-once slots, explicit hole fills,
//! and per-stream prefix trims. Durability and on-disk layout belong to
//! real log units and are out of scope here.

use parking_lot::Mutex;
use skein_common::{GlobalAddress, LogEntry, StreamId, WriteStatus};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory write-once log storage.
pub struct LogUnit {
    inner: Mutex<LogUnitInner>,
}

struct LogUnitInner {
    entries: BTreeMap<GlobalAddress, LogEntry>,

    /// Addresses whose contents have been garbage-collected.
    collected: BTreeSet<GlobalAddress>,

    /// Highest trimmed address per stream.
    trim_marks: BTreeMap<StreamId, GlobalAddress>,

    /// Addresses at or beyond this bound refuse writes.
    capacity: Option<GlobalAddress>,
}

impl LogUnit {
    pub fn new() -> Self {
        Self::bounded(None)
    }

    /// A log unit that runs out of space at `capacity`.
    pub fn with_capacity(capacity: GlobalAddress) -> Self {
        Self::bounded(Some(capacity))
    }

    fn bounded(capacity: Option<GlobalAddress>) -> Self {
        Self {
            inner: Mutex::new(LogUnitInner {
                entries: BTreeMap::new(),
                collected: BTreeSet::new(),
                trim_marks: BTreeMap::new(),
                capacity,
            }),
        }
    }

    /// Read the record at `address`. Never-written addresses read as
    /// `Empty`, collected ones as `Trimmed`; reads are idempotent.
    pub fn read(&self, address: GlobalAddress) -> LogEntry {
        let inner = self.inner.lock();
        if inner.collected.contains(&address) {
            return LogEntry::trimmed(address);
        }
        match inner.entries.get(&address) {
            Some(entry) => entry.clone(),
            None => LogEntry::empty(address),
        }
    }

    /// Write a fully formed entry at its address.
    ///
    /// A slot can be written once; rewriting identical content reports
    /// `Ok` so writer retries stay idempotent.
    pub fn write(&self, entry: LogEntry) -> WriteStatus {
        let mut inner = self.inner.lock();
        let address = entry.global_address;
        if inner.collected.contains(&address) {
            return WriteStatus::Trimmed;
        }
        if let Some(capacity) = inner.capacity {
            if address >= capacity {
                return WriteStatus::OutOfSpace;
            }
        }
        match inner.entries.get(&address) {
            Some(existing) if *existing == entry => WriteStatus::Ok,
            Some(_) => WriteStatus::Overwrite,
            None => {
                inner.entries.insert(address, entry);
                WriteStatus::Ok
            }
        }
    }

    /// Fill a never-written address with a hole record. Filling an already
    /// written or collected address is a no-op.
    pub fn fill_hole(&self, address: GlobalAddress) {
        let mut inner = self.inner.lock();
        if inner.collected.contains(&address) {
            return;
        }
        inner
            .entries
            .entry(address)
            .or_insert_with(|| LogEntry::hole(address));
    }

    /// Garbage-collect every entry of `stream` at or below `address`.
    pub fn trim(&self, stream: StreamId, address: GlobalAddress) {
        let mut inner = self.inner.lock();
        let mark = inner.trim_marks.entry(stream).or_insert(address);
        if *mark < address {
            *mark = address;
        }
        let doomed: Vec<GlobalAddress> = inner
            .entries
            .range(..=address)
            .filter(|(_, entry)| entry.contains_stream(stream))
            .map(|(&ga, _)| ga)
            .collect();
        for ga in doomed {
            inner.entries.remove(&ga);
            inner.collected.insert(ga);
        }
        tracing::debug!("trimmed stream {} up to address {}", stream, address);
    }

    /// The trim mark recorded for `stream`, if any.
    pub fn trim_mark(&self, stream: StreamId) -> Option<GlobalAddress> {
        self.inner.lock().trim_marks.get(&stream).copied()
    }
}

impl Default for LogUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_common::{DataType, NON_EXIST};

    fn data_entry(address: GlobalAddress, stream: StreamId) -> LogEntry {
        LogEntry::data(
            address,
            BTreeSet::from([stream]),
            BTreeMap::from([(stream, NON_EXIST)]),
            b"v".to_vec(),
        )
    }

    #[test]
    fn test_unwritten_reads_empty() {
        let log = LogUnit::new();
        assert_eq!(log.read(5).data_type, DataType::Empty);
    }

    #[test]
    fn test_write_once() {
        let log = LogUnit::new();
        let stream = StreamId::new();
        assert_eq!(log.write(data_entry(0, stream)), WriteStatus::Ok);

        let mut competing = data_entry(0, stream);
        competing.payload = b"other".to_vec();
        assert_eq!(log.write(competing), WriteStatus::Overwrite);
    }

    #[test]
    fn test_identical_rewrite_is_idempotent() {
        let log = LogUnit::new();
        let stream = StreamId::new();
        assert_eq!(log.write(data_entry(0, stream)), WriteStatus::Ok);
        assert_eq!(log.write(data_entry(0, stream)), WriteStatus::Ok);
    }

    #[test]
    fn test_fill_hole_then_permanent() {
        let log = LogUnit::new();
        log.fill_hole(3);
        assert_eq!(log.read(3).data_type, DataType::Hole);
        // Filling again changes nothing.
        log.fill_hole(3);
        assert_eq!(log.read(3).data_type, DataType::Hole);
    }

    #[test]
    fn test_fill_hole_does_not_clobber_data() {
        let log = LogUnit::new();
        let stream = StreamId::new();
        log.write(data_entry(2, stream));
        log.fill_hole(2);
        assert_eq!(log.read(2).data_type, DataType::Data);
    }

    #[test]
    fn test_capacity_exhaustion() {
        let log = LogUnit::with_capacity(2);
        let stream = StreamId::new();
        assert_eq!(log.write(data_entry(1, stream)), WriteStatus::Ok);
        assert_eq!(log.write(data_entry(2, stream)), WriteStatus::OutOfSpace);
    }

    #[test]
    fn test_trim_collects_stream_prefix() {
        let log = LogUnit::new();
        let stream = StreamId::new();
        let other = StreamId::new();
        log.write(data_entry(0, stream));
        log.write(data_entry(1, other));
        log.write(data_entry(2, stream));

        log.trim(stream, 1);
        assert_eq!(log.read(0).data_type, DataType::Trimmed);
        assert_eq!(log.read(1).data_type, DataType::Data);
        assert_eq!(log.read(2).data_type, DataType::Data);
        assert_eq!(log.trim_mark(stream), Some(1));

        // Writes to collected slots are refused.
        assert_eq!(log.write(data_entry(0, stream)), WriteStatus::Trimmed);
    }
}
