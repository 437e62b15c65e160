//! Log entry (delta) reader task
//!
//! Follows the tails of the replicated streams and forwards every new
//! entry in global-address order. Acks flowing back from the peer are
//! drained on each cycle.

use crate::context::LogReplicationContext;
use crate::event::{ReplicationEvent, ReplicationEventKind};
use crossbeam::channel::Sender;
use skein_common::{is_address, GlobalAddress, RuntimeError, NON_ADDRESS};
use skein_protocol::{encode_frame, ReplicationEntry, ReplicationEntryType};
use skein_stream::{QueuedStreamView, StreamOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Continuously replicates new log entries to the peer.
pub struct LogEntryReader {
    context: Arc<LogReplicationContext>,
    events: Sender<ReplicationEvent>,
    sync_id: Uuid,
    cancel: Arc<AtomicBool>,
}

impl LogEntryReader {
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
        let runtime = &self.context.runtime;
        let poll_interval = runtime.settings().connection_retry_rate;
        let views: Vec<QueuedStreamView> = self
            .context
            .streams
            .iter()
            .map(|&stream| QueuedStreamView::new(runtime, stream, StreamOptions::DEFAULT))
            .collect();
        // Resume just past whatever snapshot or delta sync already
        // delivered.
        let replicated = self.context.progress();
        if is_address(replicated) {
            for view in &views {
                view.seek(replicated + 1);
            }
        }
        let mut max_acked: GlobalAddress = NON_ADDRESS;

        tracing::info!("log entry sync {} following the tail", self.sync_id);
        while !self.cancel.load(Ordering::SeqCst) {
            let mut sent_any = false;
            for view in &views {
                loop {
                    if self.cancel.load(Ordering::SeqCst) {
                        return;
                    }
                    match view.next() {
                        Ok(Some(entry)) => {
                            let payload = match encode_frame(&entry) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    tracing::warn!(
                                        "log entry sync {} encode failed: {}",
                                        self.sync_id,
                                        e
                                    );
                                    return;
                                }
                            };
                            let epoch = entry_epoch(&self.context);
                            if !self.send(ReplicationEntry::entry(
                                ReplicationEntryType::LogEntry,
                                epoch,
                                entry.global_address,
                                NON_ADDRESS,
                                payload,
                            )) {
                                return;
                            }
                            self.context.advance_progress(entry.global_address);
                            sent_any = true;
                        }
                        Ok(None) => break,
                        Err(RuntimeError::Trimmed(address)) => {
                            tracing::warn!(
                                "log entry sync {}: address {} trimmed, snapshot sync required",
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
                            tracing::warn!("log entry sync {} read failed: {}", self.sync_id, e);
                            return;
                        }
                    }
                }
            }

            while let Some(message) = self.context.channel.try_receive() {
                if is_address(message.ack) && message.ack > max_acked {
                    max_acked = message.ack;
                    tracing::trace!("log entry sync {} acked to {}", self.sync_id, max_acked);
                }
            }

            if !sent_any {
                std::thread::sleep(poll_interval);
            }
        }
    }

    fn send(&self, message: ReplicationEntry) -> bool {
        let timeout = self.context.runtime.settings().request_timeout;
        match self.context.channel.send(message).wait(timeout) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("log entry sync {} send failed: {}", self.sync_id, e);
                false
            }
        }
    }
}

fn entry_epoch(context: &LogReplicationContext) -> u64 {
    context.runtime.cluster().epoch()
}
