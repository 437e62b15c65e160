//! Replication transport
//!
//! The state machine pushes `ReplicationEntry` messages through an
//! opaque duplex channel and reads acks back from it. A reconnecting
//! adapter keeps a connection alive until shutdown; callers wait on a
//! connection tracker whose pending state is replaced on every close,
//! so an awaiting caller always observes the disconnect.

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use skein_common::{Result, RuntimeError};
use skein_protocol::ReplicationEntry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Completion handle for one send.
pub struct SendCompletion {
    rx: Receiver<Result<()>>,
}

impl SendCompletion {
    /// A completion that already carries its outcome. Channel
    /// implementations whose sends finish inline build these directly.
    pub fn resolved(outcome: Result<()>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// Wait for the send to finish.
    pub fn wait(self, timeout: Duration) -> Result<()> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(_) => Err(RuntimeError::Timeout(timeout)),
        }
    }
}

/// An opaque duplex stream of replication entries.
pub trait ReplicationChannel: Send + Sync {
    /// Push one message toward the peer.
    fn send(&self, entry: ReplicationEntry) -> SendCompletion;

    /// Pull the next inbound message, if one arrived.
    fn try_receive(&self) -> Option<ReplicationEntry>;

    fn is_connected(&self) -> bool;

    fn close(&self);
}

/// One end of an in-memory duplex channel.
pub struct InMemoryChannel {
    outbound: Sender<ReplicationEntry>,
    inbound: Receiver<ReplicationEntry>,
    open: Arc<AtomicBool>,
}

/// Create a connected pair of channel ends.
pub fn channel_pair() -> (InMemoryChannel, InMemoryChannel) {
    let (a_to_b_tx, a_to_b_rx) = unbounded();
    let (b_to_a_tx, b_to_a_rx) = unbounded();
    let open = Arc::new(AtomicBool::new(true));
    (
        InMemoryChannel {
            outbound: a_to_b_tx,
            inbound: b_to_a_rx,
            open: Arc::clone(&open),
        },
        InMemoryChannel {
            outbound: b_to_a_tx,
            inbound: a_to_b_rx,
            open,
        },
    )
}

impl ReplicationChannel for InMemoryChannel {
    fn send(&self, entry: ReplicationEntry) -> SendCompletion {
        if !self.open.load(Ordering::SeqCst) {
            return SendCompletion::resolved(Err(RuntimeError::Network(
                "channel closed".to_string(),
            )));
        }
        match self.outbound.send(entry) {
            Ok(()) => SendCompletion::resolved(Ok(())),
            Err(_) => SendCompletion::resolved(Err(RuntimeError::Network(
                "peer hung up".to_string(),
            ))),
        }
    }

    fn try_receive(&self) -> Option<ReplicationEntry> {
        self.inbound.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

struct ConnectionState {
    connected: bool,
    /// Bumped on every close so waiters can tell one connection epoch
    /// from the next.
    generation: u64,
}

/// Observable connection status with replaceable pending futures.
pub struct ConnectionTracker {
    state: Mutex<ConnectionState>,
    changed: Condvar,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState {
                connected: false,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn mark_connected(&self) {
        self.state.lock().connected = true;
        self.changed.notify_all();
    }

    fn mark_disconnected(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.generation += 1;
        self.changed.notify_all();
    }

    /// Block until connected or the timeout elapses.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.connected {
            return true;
        }
        self.changed.wait_while_for(&mut state, |s| !s.connected, timeout);
        state.connected
    }

    /// Block until the current connection (if any) closes or the timeout
    /// elapses. Returns true if a disconnect was observed.
    pub fn wait_disconnected(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.connected {
            return true;
        }
        let generation = state.generation;
        self.changed
            .wait_while_for(&mut state, |s| s.connected && s.generation == generation, timeout);
        !state.connected || state.generation != generation
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

type Connector = Box<dyn Fn() -> Result<Box<dyn ReplicationChannel>> + Send + Sync>;

struct ReconnectingInner {
    current: Mutex<Option<Box<dyn ReplicationChannel>>>,
    tracker: ConnectionTracker,
    shutdown: AtomicBool,
}

/// Wraps a connector in a reconnect-until-shutdown loop.
pub struct ReconnectingChannel {
    inner: Arc<ReconnectingInner>,
    monitor: Option<std::thread::JoinHandle<()>>,
}

impl ReconnectingChannel {
    pub fn connect(connector: Connector, retry_rate: Duration) -> Self {
        let inner = Arc::new(ReconnectingInner {
            current: Mutex::new(None),
            tracker: ConnectionTracker::new(),
            shutdown: AtomicBool::new(false),
        });
        let monitor_inner = Arc::clone(&inner);
        let monitor = std::thread::Builder::new()
            .name("replication-reconnect".to_string())
            .spawn(move || Self::monitor_loop(monitor_inner, connector, retry_rate))
            .expect("failed to spawn reconnect thread");
        Self {
            inner,
            monitor: Some(monitor),
        }
    }

    fn monitor_loop(inner: Arc<ReconnectingInner>, connector: Connector, retry_rate: Duration) {
        while !inner.shutdown.load(Ordering::SeqCst) {
            let healthy = inner
                .current
                .lock()
                .as_ref()
                .map(|channel| channel.is_connected())
                .unwrap_or(false);
            if healthy {
                std::thread::sleep(retry_rate);
                continue;
            }
            // The previous connection (if any) is gone; every waiter on
            // the old future sees the disconnect before a new attempt.
            if inner.tracker.is_connected() {
                inner.tracker.mark_disconnected();
                *inner.current.lock() = None;
            }
            match connector() {
                Ok(channel) => {
                    tracing::info!("replication channel connected");
                    *inner.current.lock() = Some(channel);
                    inner.tracker.mark_connected();
                }
                Err(e) => {
                    tracing::warn!("replication connect failed, retrying: {}", e);
                    std::thread::sleep(retry_rate);
                }
            }
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.inner.tracker
    }

    /// Stop reconnecting and close the current connection.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(channel) = self.inner.current.lock().take() {
            channel.close();
        }
        self.inner.tracker.mark_disconnected();
    }
}

impl ReplicationChannel for ReconnectingChannel {
    fn send(&self, entry: ReplicationEntry) -> SendCompletion {
        match self.inner.current.lock().as_ref() {
            Some(channel) if channel.is_connected() => channel.send(entry),
            _ => SendCompletion::resolved(Err(RuntimeError::Network(
                "not connected".to_string(),
            ))),
        }
    }

    fn try_receive(&self) -> Option<ReplicationEntry> {
        self.inner
            .current
            .lock()
            .as_ref()
            .and_then(|channel| channel.try_receive())
    }

    fn is_connected(&self) -> bool {
        self.inner.tracker.is_connected()
    }

    fn close(&self) {
        self.shutdown();
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}
