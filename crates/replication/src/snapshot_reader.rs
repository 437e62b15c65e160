//! Snapshot reader task
//!
//! Streams the full contents of every replicated stream, pinned at the
//! global tail observed when the sync starts. The reader owns no state
//! machine state: it reports back only by enqueueing events, and it
//! checks the cancellation flag between entries.

use crate::context::LogReplicationContext;
use crate::event::{ReplicationEvent, ReplicationEventKind};
use crossbeam::channel::Sender;
use skein_common::RuntimeError;
use skein_protocol::{encode_frame, ReplicationEntry, ReplicationEntryType};
use skein_stream::{QueuedStreamView, StreamOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Streams all replicated streams at a pinned address to the peer.
pub struct SnapshotReader {
    context: Arc<LogReplicationContext>,
    events: Sender<ReplicationEvent>,
    sync_id: Uuid,
    cancel: Arc<AtomicBool>,
}

impl SnapshotReader {
    pub fn new(
        context: Arc<LogReplicationContext>,
        events: Sender<ReplicationEvent>,
        sync_id: Uuid,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            context,
            events,
            sync_id,
            cancel,
        }
    }

    pub fn run(self) {
        if self.cancel.load(Ordering::SeqCst) {
            tracing::debug!("snapshot sync {} cancelled before starting", self.sync_id);
            return;
        }
        let runtime = &self.context.runtime;
        let pin = match runtime
            .sequencer()
            .token_query(self.context.streams.iter().copied())
        {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("snapshot sync {}: tail query failed: {}", self.sync_id, e);
                return;
            }
        };
        let snapshot_address = pin.global_address;
        let epoch = pin.epoch;
        tracing::info!(
            "snapshot sync {} pinned at address {}",
            self.sync_id,
            snapshot_address
        );

        if !self.send(ReplicationEntry::snapshot_boundary(
            ReplicationEntryType::SnapshotStart,
            epoch,
            snapshot_address,
        )) {
            return;
        }

        for &stream in &self.context.streams {
            let view = QueuedStreamView::new(runtime, stream, StreamOptions::DEFAULT);
            loop {
                if self.cancel.load(Ordering::SeqCst) {
                    tracing::debug!("snapshot sync {} cancelled", self.sync_id);
                    return;
                }
                let entry = match view.next_up_to(snapshot_address) {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(RuntimeError::Trimmed(address)) => {
                        tracing::warn!(
                            "snapshot sync {}: address {} trimmed under the reader",
                            self.sync_id,
                            address
                        );
                        let _ = self.events.send(ReplicationEvent::with_id(
                            ReplicationEventKind::TrimmedException,
                            self.sync_id,
                        ));
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("snapshot sync {} read failed: {}", self.sync_id, e);
                        return;
                    }
                };
                let payload = match encode_frame(&entry) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("snapshot sync {} encode failed: {}", self.sync_id, e);
                        return;
                    }
                };
                if !self.send(ReplicationEntry::entry(
                    ReplicationEntryType::SnapshotMessage,
                    epoch,
                    entry.global_address,
                    snapshot_address,
                    payload,
                )) {
                    return;
                }
            }
        }

        if !self.send(ReplicationEntry::snapshot_boundary(
            ReplicationEntryType::SnapshotEnd,
            epoch,
            snapshot_address,
        )) {
            return;
        }
        self.context.advance_progress(snapshot_address);
        let _ = self.events.send(ReplicationEvent::with_id(
            ReplicationEventKind::SnapshotSyncComplete,
            self.sync_id,
        ));
    }

    fn send(&self, message: ReplicationEntry) -> bool {
        let timeout = self.context.runtime.settings().request_timeout;
        match self.context.channel.send(message).wait(timeout) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("snapshot sync {} send failed: {}", self.sync_id, e);
                false
            }
        }
    }
}
