//! The log replication state machine
//!
//! Five states, driven by a single dispatcher thread: every transition
//! runs `process → on_exit(old) → on_entry(new)` as one atomic unit, so
//! state objects need no locking of their own. Unknown events in a state
//! are logged and ignored. `Stopped` is terminal.

use crate::context::LogReplicationContext;
use crate::event::{ReplicationEvent, ReplicationEventKind};
use crate::log_entry_reader::LogEntryReader;
use crate::snapshot_reader::SnapshotReader;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Control-plane state of one replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationState {
    Initialized,
    InRequireSnapshotSync,
    InSnapshotSync,
    InLogEntrySync,
    Stopped,
}

struct ActiveTask {
    sync_id: Uuid,
    cancel: Arc<AtomicBool>,
}

impl ActiveTask {
    fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        !self.cancel.load(Ordering::SeqCst)
    }
}

struct FsmShared {
    state: ReplicationState,
    snapshot_task: Option<ActiveTask>,
    delta_task: Option<ActiveTask>,
    /// Number of events taken off the queue, including ignored ones.
    processed: u64,
}

/// Handle to a running replication state machine.
pub struct LogReplicationFsm {
    events_tx: Sender<ReplicationEvent>,
    shared: Arc<Mutex<FsmShared>>,
    dispatcher: Option<std::thread::JoinHandle<()>>,
}

impl LogReplicationFsm {
    /// Start the machine in `Initialized` with its own dispatcher thread.
    pub fn start(context: Arc<LogReplicationContext>) -> Self {
        let (events_tx, events_rx) = unbounded();
        let shared = Arc::new(Mutex::new(FsmShared {
            state: ReplicationState::Initialized,
            snapshot_task: None,
            delta_task: None,
            processed: 0,
        }));
        let dispatcher = {
            let shared = Arc::clone(&shared);
            let events_tx = events_tx.clone();
            std::thread::Builder::new()
                .name("replication-fsm".to_string())
                .spawn(move || dispatch_loop(context, events_rx, events_tx, shared))
                .expect("failed to spawn fsm dispatcher")
        };
        Self {
            events_tx,
            shared,
            dispatcher: Some(dispatcher),
        }
    }

    /// Enqueue one event. Events submitted after stop are dropped.
    pub fn submit(&self, event: ReplicationEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn state(&self) -> ReplicationState {
        self.shared.lock().state
    }

    /// Events taken off the queue so far, including ignored ones.
    pub fn processed_events(&self) -> u64 {
        self.shared.lock().processed
    }

    /// The id of the snapshot sync currently running, if any.
    pub fn active_snapshot_sync(&self) -> Option<Uuid> {
        self.shared
            .lock()
            .snapshot_task
            .as_ref()
            .filter(|task| task.is_live())
            .map(|task| task.sync_id)
    }

    /// True while any replication task is scheduled and uncancelled.
    pub fn has_active_task(&self) -> bool {
        let shared = self.shared.lock();
        let live = |task: &Option<ActiveTask>| task.as_ref().is_some_and(ActiveTask::is_live);
        live(&shared.snapshot_task) || live(&shared.delta_task)
    }

    /// Stop the machine and wait for the dispatcher to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self
            .events_tx
            .send(ReplicationEvent::new(ReplicationEventKind::LogReplicationStop));
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

impl Drop for LogReplicationFsm {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(
    context: Arc<LogReplicationContext>,
    events_rx: Receiver<ReplicationEvent>,
    events_tx: Sender<ReplicationEvent>,
    shared: Arc<Mutex<FsmShared>>,
) {
    while let Ok(event) = events_rx.recv() {
        let mut guard = shared.lock();
        guard.processed += 1;
        let current = guard.state;

        let Some(next) = transition(current, event.kind) else {
            tracing::warn!(
                "replication fsm: ignoring {:?} in state {:?}",
                event.kind,
                current
            );
            continue;
        };

        // A completion from a sync that is no longer in flight (it was
        // cancelled or superseded) must not move the machine.
        if event.kind == ReplicationEventKind::SnapshotSyncComplete {
            let live = guard
                .snapshot_task
                .as_ref()
                .is_some_and(|task| task.is_live() && task.sync_id == event.id);
            if !live {
                tracing::warn!(
                    "replication fsm: stale snapshot completion {} ignored",
                    event.id
                );
                continue;
            }
        }

        tracing::info!(
            "replication fsm: {:?} --{:?}--> {:?}",
            current,
            event.kind,
            next
        );
        on_exit(&mut guard, current);
        guard.state = next;
        on_entry(&mut guard, next, &context, &events_tx, &event);

        if next == ReplicationState::Stopped {
            break;
        }
    }
}

/// The transition table. `None` means the event is ignored in the state.
fn transition(
    state: ReplicationState,
    event: ReplicationEventKind,
) -> Option<ReplicationState> {
    use ReplicationEventKind::*;
    use ReplicationState::*;
    match (state, event) {
        (Initialized, SnapshotSyncRequest) => Some(InSnapshotSync),
        (Initialized, StartLogEntrySync) => Some(InLogEntrySync),
        (Initialized, LogReplicationStop) => Some(Stopped),

        // Re-entry restarts the snapshot: the prior task is cancelled on
        // exit and a fresh one submitted on entry.
        (InSnapshotSync, SnapshotSyncRequest) => Some(InSnapshotSync),
        (InSnapshotSync, SnapshotSyncCancel) => Some(InRequireSnapshotSync),
        (InSnapshotSync, TrimmedException) => Some(InRequireSnapshotSync),
        (InSnapshotSync, LeadershipLost) => Some(Initialized),
        (InSnapshotSync, StartLogEntrySync) => Some(InLogEntrySync),
        (InSnapshotSync, SnapshotSyncComplete) => Some(InLogEntrySync),
        (InSnapshotSync, LogReplicationStop) => Some(Stopped),

        (InLogEntrySync, TrimmedException) => Some(InRequireSnapshotSync),
        (InLogEntrySync, SnapshotSyncRequest) => Some(InSnapshotSync),
        (InLogEntrySync, LeadershipLost) => Some(Initialized),
        (InLogEntrySync, LogReplicationStop) => Some(Stopped),

        (InRequireSnapshotSync, SnapshotSyncRequest) => Some(InSnapshotSync),
        (InRequireSnapshotSync, LeadershipLost) => Some(Initialized),
        (InRequireSnapshotSync, LogReplicationStop) => Some(Stopped),

        _ => None,
    }
}

/// Cancel whatever the state being left had in flight.
fn on_exit(shared: &mut FsmShared, from: ReplicationState) {
    match from {
        ReplicationState::InSnapshotSync => {
            if let Some(task) = shared.snapshot_task.take() {
                task.cancel();
            }
        }
        ReplicationState::InLogEntrySync => {
            if let Some(task) = shared.delta_task.take() {
                task.cancel();
            }
        }
        _ => {}
    }
}

/// Schedule the work the new state stands for.
fn on_entry(
    shared: &mut FsmShared,
    to: ReplicationState,
    context: &Arc<LogReplicationContext>,
    events_tx: &Sender<ReplicationEvent>,
    event: &ReplicationEvent,
) {
    match to {
        ReplicationState::InSnapshotSync => {
            let cancel = Arc::new(AtomicBool::new(false));
            shared.snapshot_task = Some(ActiveTask {
                sync_id: event.id,
                cancel: Arc::clone(&cancel),
            });
            let reader = SnapshotReader::new(
                Arc::clone(context),
                events_tx.clone(),
                event.id,
                cancel,
            );
            context.pool.submit(move || reader.run());
        }
        ReplicationState::InLogEntrySync => {
            let cancel = Arc::new(AtomicBool::new(false));
            shared.delta_task = Some(ActiveTask {
                sync_id: event.id,
                cancel: Arc::clone(&cancel),
            });
            let reader = LogEntryReader::new(
                Arc::clone(context),
                events_tx.clone(),
                event.id,
                cancel,
            );
            context.pool.submit(move || reader.run());
        }
        ReplicationState::Initialized
        | ReplicationState::InRequireSnapshotSync
        | ReplicationState::Stopped => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_matches_spec() {
        use ReplicationEventKind::*;
        use ReplicationState::*;

        // Stopped is terminal for every event.
        for event in [
            SnapshotSyncRequest,
            SnapshotSyncCancel,
            SnapshotSyncComplete,
            TrimmedException,
            LeadershipLost,
            StartLogEntrySync,
            LogReplicationStop,
        ] {
            assert_eq!(transition(Stopped, event), None);
        }

        assert_eq!(transition(Initialized, SnapshotSyncRequest), Some(InSnapshotSync));
        assert_eq!(transition(Initialized, StartLogEntrySync), Some(InLogEntrySync));
        assert_eq!(transition(Initialized, SnapshotSyncCancel), None);
        assert_eq!(transition(InSnapshotSync, SnapshotSyncRequest), Some(InSnapshotSync));
        assert_eq!(
            transition(InSnapshotSync, TrimmedException),
            Some(InRequireSnapshotSync)
        );
        assert_eq!(transition(InLogEntrySync, LeadershipLost), Some(Initialized));
        assert_eq!(
            transition(InRequireSnapshotSync, SnapshotSyncRequest),
            Some(InSnapshotSync)
        );
        assert_eq!(transition(InRequireSnapshotSync, StartLogEntrySync), None);
    }
}
