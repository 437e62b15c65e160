//! Per-stream iteration state
//!
//! The context tracks where the view has read to (`global_pointer`), the
//! window of addresses known to be resolved (`min_resolution` to
//! `max_resolution`), and three ordered address sets: candidates to read,
//! checkpoint records to drain first, and everything already surfaced.

use crate::checkpoint::CheckpointSuccess;
use skein_common::{GlobalAddress, StreamId, NEVER_READ, NON_ADDRESS};
use std::collections::BTreeSet;

/// Iteration state for one stream view.
#[derive(Debug)]
pub struct StreamContext {
    pub stream_id: StreamId,

    /// Address of the last entry surfaced, or `NEVER_READ`.
    pub global_pointer: GlobalAddress,

    /// Lowest address still considered resolved, or `NON_ADDRESS`.
    /// Reverse iteration below this point re-resolves first.
    pub min_resolution: GlobalAddress,

    /// Highest address resolved so far, or `NON_ADDRESS`.
    pub max_resolution: GlobalAddress,

    /// Candidate addresses discovered but not yet consumed.
    pub read_queue: BTreeSet<GlobalAddress>,

    /// Addresses of a successfully observed checkpoint record sequence,
    /// drained before the read queue.
    pub read_cp_queue: BTreeSet<GlobalAddress>,

    /// Addresses known to belong to the stream and already surfaced.
    pub resolved_queue: BTreeSet<GlobalAddress>,

    /// The winning checkpoint, once one has been observed completely.
    pub checkpoint: Option<CheckpointSuccess>,
}

impl StreamContext {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            global_pointer: NEVER_READ,
            min_resolution: NON_ADDRESS,
            max_resolution: NON_ADDRESS,
            read_queue: BTreeSet::new(),
            read_cp_queue: BTreeSet::new(),
            resolved_queue: BTreeSet::new(),
            checkpoint: None,
        }
    }

    /// Forget everything and start over from the beginning of the stream.
    pub fn reset(&mut self) {
        self.global_pointer = NEVER_READ;
        self.min_resolution = NON_ADDRESS;
        self.max_resolution = NON_ADDRESS;
        self.read_queue.clear();
        self.read_cp_queue.clear();
        self.resolved_queue.clear();
        self.checkpoint = None;
    }

    /// Move the iteration position so the next entry surfaced is the
    /// first stream entry at or above `global_address`. Resolved entries
    /// at or above it go back into the read queue to be re-yielded.
    pub fn seek(&mut self, global_address: GlobalAddress) {
        assert!(
            global_address >= 0,
            "seek target {} is not an address",
            global_address
        );
        tracing::trace!(
            "seek[{}]({}) min={} max={}",
            self.stream_id,
            global_address,
            self.min_resolution,
            self.max_resolution
        );
        if global_address >= self.max_resolution {
            // Clamped to the resolved window so min never exceeds max.
            self.min_resolution = self.max_resolution;
        }
        let at_or_above = self.read_queue.split_off(&global_address);
        self.read_queue = at_or_above;
        for &address in self.resolved_queue.range(global_address..) {
            self.read_queue.insert(address);
        }
        self.global_pointer = global_address - 1;
    }

    /// Record `global_address` as surfaced, widening the resolved window.
    pub fn add_to_resolved(&mut self, global_address: GlobalAddress) {
        self.resolved_queue.insert(global_address);
        if self.max_resolution < global_address {
            self.max_resolution = global_address;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_unread() {
        let ctx = StreamContext::new(StreamId::new());
        assert_eq!(ctx.global_pointer, NEVER_READ);
        assert_eq!(ctx.min_resolution, NON_ADDRESS);
        assert_eq!(ctx.max_resolution, NON_ADDRESS);
    }

    #[test]
    fn test_add_to_resolved_tracks_max() {
        let mut ctx = StreamContext::new(StreamId::new());
        ctx.add_to_resolved(4);
        ctx.add_to_resolved(9);
        ctx.add_to_resolved(6);
        assert_eq!(ctx.max_resolution, 9);
        assert!(ctx.resolved_queue.iter().copied().eq([4, 6, 9]));
    }

    #[test]
    fn test_seek_requeues_resolved_tail() {
        let mut ctx = StreamContext::new(StreamId::new());
        for address in [2, 5, 8] {
            ctx.add_to_resolved(address);
        }
        ctx.global_pointer = 8;
        ctx.read_queue.insert(1);
        ctx.read_queue.insert(9);

        ctx.seek(5);
        assert_eq!(ctx.global_pointer, 4);
        // 1 dropped, 9 kept, 5 and 8 re-queued from the resolved set.
        assert!(ctx.read_queue.iter().copied().eq([5, 8, 9]));
    }

    #[test]
    fn test_seek_never_inverts_resolution_window() {
        let mut ctx = StreamContext::new(StreamId::new());
        ctx.add_to_resolved(3);
        ctx.seek(10);
        assert!(ctx.min_resolution <= ctx.max_resolution);
        assert_eq!(ctx.min_resolution, 3);
    }

    #[test]
    fn test_seek_to_zero_rewinds_fully() {
        let mut ctx = StreamContext::new(StreamId::new());
        ctx.add_to_resolved(0);
        ctx.add_to_resolved(1);
        ctx.global_pointer = 1;
        ctx.seek(0);
        assert_eq!(ctx.global_pointer, NEVER_READ);
        assert!(ctx.read_queue.iter().copied().eq([0, 1]));
    }

    #[test]
    fn test_reset_clears_queues() {
        let mut ctx = StreamContext::new(StreamId::new());
        ctx.add_to_resolved(2);
        ctx.read_queue.insert(3);
        ctx.read_cp_queue.insert(4);
        ctx.global_pointer = 2;
        ctx.reset();
        assert_eq!(ctx.global_pointer, NEVER_READ);
        assert!(ctx.read_queue.is_empty());
        assert!(ctx.read_cp_queue.is_empty());
        assert!(ctx.resolved_queue.is_empty());
    }
}
