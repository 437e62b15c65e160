//! Cross-cluster log replication
//!
//! The control plane is a five-state machine driven by a single-threaded
//! event dispatcher. Long-running work (snapshot reads, tail following)
//! runs on a blocking worker pool and talks back to the machine only by
//! enqueueing events; tasks observe a cooperative cancellation flag
//! between entries. Entries flow to the standby over a duplex channel
//! that reconnects until shutdown.

mod context;
mod event;
mod fsm;
mod log_entry_reader;
mod snapshot_reader;
mod transport;
mod worker;

pub use context::LogReplicationContext;
pub use event::{ReplicationEvent, ReplicationEventKind};
pub use fsm::{LogReplicationFsm, ReplicationState};
pub use log_entry_reader::LogEntryReader;
pub use snapshot_reader::SnapshotReader;
pub use transport::{
    channel_pair, ConnectionTracker, InMemoryChannel, ReconnectingChannel, ReplicationChannel,
    SendCompletion,
};
pub use worker::WorkerPool;
