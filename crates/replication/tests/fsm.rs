//! Integration tests for the replication state machine

use crossbeam::channel::bounded;
use skein_common::{LogEntry, RuntimeSettings, StreamId};
use skein_engine::MockCluster;
use skein_protocol::{decode_frame, ReplicationEntryType};
use skein_replication::{
    channel_pair, InMemoryChannel, LogReplicationContext, LogReplicationFsm, ReplicationChannel,
    ReplicationEvent, ReplicationEventKind, ReplicationState, WorkerPool,
};
use skein_runtime::{LogRuntime, TokenGrant};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn fast_settings() -> RuntimeSettings {
    let mut settings = RuntimeSettings::default();
    settings.request_timeout = Duration::ZERO;
    settings.connection_retry_rate = Duration::from_millis(1);
    settings
}

struct Fixture {
    runtime: Arc<LogRuntime>,
    context: Arc<LogReplicationContext>,
    peer: InMemoryChannel,
    streams: Vec<StreamId>,
}

fn fixture(pool_threads: usize, stream_count: usize) -> Fixture {
    let cluster = Arc::new(MockCluster::new());
    let runtime = Arc::new(LogRuntime::connect(cluster, fast_settings()));
    let streams: Vec<StreamId> = (0..stream_count).map(|_| StreamId::new()).collect();
    let (ours, peer) = channel_pair();
    let pool = Arc::new(WorkerPool::new(pool_threads, "replication-worker-{}"));
    let context = Arc::new(LogReplicationContext::new(
        Arc::clone(&runtime),
        streams.clone(),
        Arc::new(ours),
        pool,
    ));
    Fixture {
        runtime,
        context,
        peer,
        streams,
    }
}

fn append(runtime: &LogRuntime, stream: StreamId, payload: &[u8]) -> i64 {
    let grant = runtime
        .sequencer()
        .token_request(1, BTreeSet::from([stream]), None)
        .unwrap();
    let token = match grant {
        TokenGrant::Granted(token) => token,
        other => panic!("unexpected grant: {:?}", other),
    };
    runtime.log().append(&token, payload.to_vec()).unwrap();
    token.global_address
}

fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Park the (single-threaded) worker pool behind a gate job; returns the
/// release handle.
fn gate_pool(context: &LogReplicationContext) -> crossbeam::channel::Sender<()> {
    let (release_tx, release_rx) = bounded::<()>(1);
    context.pool.submit(move || {
        let _ = release_rx.recv();
    });
    release_tx
}

#[test]
fn test_snapshot_sync_then_delta_follows_tail() {
    let fixture = fixture(2, 2);
    let mut written = Vec::new();
    for (i, &stream) in fixture.streams.iter().enumerate() {
        for j in 0..3 {
            written.push(append(
                &fixture.runtime,
                stream,
                format!("s{}-{}", i, j).as_bytes(),
            ));
        }
    }

    let fsm = LogReplicationFsm::start(Arc::clone(&fixture.context));
    fsm.submit(ReplicationEvent::new(ReplicationEventKind::SnapshotSyncRequest));
    wait_until("snapshot sync to complete", || {
        fsm.state() == ReplicationState::InLogEntrySync
    });

    // The peer saw one snapshot: Start, one message per entry, End.
    let mut snapshot_addresses = Vec::new();
    let mut starts = 0;
    let mut ends = 0;
    while let Some(message) = fixture.peer.try_receive() {
        match message.entry_type {
            ReplicationEntryType::SnapshotStart => starts += 1,
            ReplicationEntryType::SnapshotEnd => ends += 1,
            ReplicationEntryType::SnapshotMessage => {
                let (entry, _): (LogEntry, usize) = decode_frame(&message.payload).unwrap();
                assert_eq!(entry.global_address, message.timestamp);
                snapshot_addresses.push(message.timestamp);
            }
            other => panic!("unexpected message during snapshot: {:?}", other),
        }
    }
    assert_eq!(starts, 1);
    assert_eq!(ends, 1);
    snapshot_addresses.sort_unstable();
    let mut expected = written.clone();
    expected.sort_unstable();
    assert_eq!(snapshot_addresses, expected);

    // New writes now flow through delta sync, in address order.
    let late = append(&fixture.runtime, fixture.streams[0], b"late");
    wait_until("delta entry to arrive", || {
        matches!(
            fixture.peer.try_receive(),
            Some(message)
                if message.entry_type == ReplicationEntryType::LogEntry
                    && message.timestamp == late
        )
    });
    assert!(fixture.context.progress() >= late);

    fsm.stop();
}

#[test]
fn test_snapshot_retry_cancels_prior_reader() {
    let fixture = fixture(1, 1);
    append(&fixture.runtime, fixture.streams[0], b"v");

    // Hold the single worker so both snapshot tasks stay queued.
    let release = gate_pool(&fixture.context);

    let fsm = LogReplicationFsm::start(Arc::clone(&fixture.context));
    let first = ReplicationEvent::new(ReplicationEventKind::SnapshotSyncRequest);
    fsm.submit(first);
    wait_until("first request to land", || fsm.processed_events() == 1);
    assert_eq!(fsm.state(), ReplicationState::InSnapshotSync);
    assert_eq!(fsm.active_snapshot_sync(), Some(first.id));

    let second = ReplicationEvent::new(ReplicationEventKind::SnapshotSyncRequest);
    fsm.submit(second);
    wait_until("second request to land", || fsm.processed_events() == 2);
    // Re-entry: still in snapshot sync, but under the new sync id.
    assert_eq!(fsm.state(), ReplicationState::InSnapshotSync);
    assert_eq!(fsm.active_snapshot_sync(), Some(second.id));

    release.send(()).unwrap();
    wait_until("surviving snapshot to complete", || {
        fsm.state() == ReplicationState::InLogEntrySync
    });

    // Exactly one snapshot ran: the cancelled reader never sent a thing.
    let mut starts = 0;
    while let Some(message) = fixture.peer.try_receive() {
        if message.entry_type == ReplicationEntryType::SnapshotStart {
            starts += 1;
        }
    }
    assert_eq!(starts, 1);

    fsm.stop();
}

#[test]
fn test_leadership_loss_cancels_delta_follower() {
    let fixture = fixture(2, 1);
    append(&fixture.runtime, fixture.streams[0], b"v");

    let fsm = LogReplicationFsm::start(Arc::clone(&fixture.context));
    fsm.submit(ReplicationEvent::new(ReplicationEventKind::StartLogEntrySync));
    wait_until("delta sync to start replicating", || {
        fixture.peer.try_receive().is_some()
    });
    assert!(fsm.has_active_task());

    fsm.submit(ReplicationEvent::new(ReplicationEventKind::LeadershipLost));
    wait_until("leadership loss to land", || {
        fsm.state() == ReplicationState::Initialized
    });
    // The follower is cancelled and nothing remains scheduled.
    assert!(!fsm.has_active_task());

    // Once the follower has wound down, new writes are not replicated.
    std::thread::sleep(Duration::from_millis(20));
    while fixture.peer.try_receive().is_some() {}
    append(&fixture.runtime, fixture.streams[0], b"unreplicated");
    std::thread::sleep(Duration::from_millis(20));
    assert!(fixture.peer.try_receive().is_none());

    fsm.stop();
}

#[test]
fn test_trim_during_delta_requires_snapshot_sync() {
    let fixture = fixture(1, 1);
    let stream = fixture.streams[0];
    for _ in 0..3 {
        append(&fixture.runtime, stream, b"v");
    }

    // Gate the pool, then trim everything before the follower runs.
    let release = gate_pool(&fixture.context);
    let fsm = LogReplicationFsm::start(Arc::clone(&fixture.context));
    fsm.submit(ReplicationEvent::new(ReplicationEventKind::StartLogEntrySync));
    wait_until("delta sync to be scheduled", || {
        fsm.state() == ReplicationState::InLogEntrySync
    });
    fixture.runtime.log().trim(stream, 2).unwrap();
    release.send(()).unwrap();

    wait_until("trim to force snapshot sync", || {
        fsm.state() == ReplicationState::InRequireSnapshotSync
    });
    assert!(!fsm.has_active_task());

    fsm.stop();
}

#[test]
fn test_unknown_events_are_ignored() {
    let fixture = fixture(1, 0);
    let fsm = LogReplicationFsm::start(Arc::clone(&fixture.context));

    fsm.submit(ReplicationEvent::new(ReplicationEventKind::SnapshotSyncCancel));
    wait_until("event to be processed", || fsm.processed_events() == 1);
    assert_eq!(fsm.state(), ReplicationState::Initialized);

    fsm.submit(ReplicationEvent::new(ReplicationEventKind::TrimmedException));
    wait_until("event to be processed", || fsm.processed_events() == 2);
    assert_eq!(fsm.state(), ReplicationState::Initialized);

    fsm.stop();
}

#[test]
fn test_stale_snapshot_completion_is_ignored() {
    let fixture = fixture(1, 1);
    let release = gate_pool(&fixture.context);
    let fsm = LogReplicationFsm::start(Arc::clone(&fixture.context));

    let request = ReplicationEvent::new(ReplicationEventKind::SnapshotSyncRequest);
    fsm.submit(request);
    wait_until("request to land", || fsm.processed_events() == 1);

    // A completion from some other (long-cancelled) sync must not move
    // the machine.
    fsm.submit(ReplicationEvent::new(ReplicationEventKind::SnapshotSyncComplete));
    wait_until("stale completion to be processed", || {
        fsm.processed_events() == 2
    });
    assert_eq!(fsm.state(), ReplicationState::InSnapshotSync);
    assert_eq!(fsm.active_snapshot_sync(), Some(request.id));

    release.send(()).unwrap();
    fsm.stop();
}

#[test]
fn test_stop_is_terminal() {
    let fixture = fixture(1, 0);
    let fsm = LogReplicationFsm::start(Arc::clone(&fixture.context));
    fsm.submit(ReplicationEvent::new(ReplicationEventKind::LogReplicationStop));
    wait_until("stop to land", || fsm.state() == ReplicationState::Stopped);

    // The dispatcher is gone; further events are dropped on the floor.
    let processed = fsm.processed_events();
    fsm.submit(ReplicationEvent::new(ReplicationEventKind::SnapshotSyncRequest));
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(fsm.state(), ReplicationState::Stopped);
    assert_eq!(fsm.processed_events(), processed);
}
