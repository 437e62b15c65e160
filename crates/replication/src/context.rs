//! Shared state for one replication session

use crate::transport::ReplicationChannel;
use crate::worker::WorkerPool;
use skein_common::{GlobalAddress, StreamId, NON_ADDRESS};
use skein_runtime::LogRuntime;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Everything the state machine and its tasks share: the runtime to read
/// the log through, the set of replicated streams, the peer channel, and
/// the pool blocking work runs on.
pub struct LogReplicationContext {
    pub runtime: Arc<LogRuntime>,
    pub streams: Vec<StreamId>,
    pub channel: Arc<dyn ReplicationChannel>,
    pub pool: Arc<WorkerPool>,

    /// Highest global address replicated to the peer. Snapshot sync jumps
    /// it forward; delta sync resumes just past it. Never decreases.
    progress: AtomicI64,
}

impl LogReplicationContext {
    pub fn new(
        runtime: Arc<LogRuntime>,
        streams: Vec<StreamId>,
        channel: Arc<dyn ReplicationChannel>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            runtime,
            streams,
            channel,
            pool,
            progress: AtomicI64::new(NON_ADDRESS),
        }
    }

    pub fn progress(&self) -> GlobalAddress {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn advance_progress(&self, address: GlobalAddress) {
        self.progress.fetch_max(address, Ordering::SeqCst);
    }
}
