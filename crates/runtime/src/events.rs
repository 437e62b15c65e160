//! Version event bus
//!
//! Object views subscribe to learn when the log position they materialize
//! from advances. The bus is owned by the runtime instance; dropping a
//! subscription unsubscribes it.

use parking_lot::Mutex;
use skein_common::GlobalAddress;
use std::sync::{Arc, Weak};

type Listener = Arc<dyn Fn(GlobalAddress) + Send + Sync>;

struct BusInner {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Registry of version listeners.
#[derive(Clone)]
pub struct VersionBus {
    inner: Arc<Mutex<BusInner>>,
}

impl VersionBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a listener. It stays registered for the lifetime of the
    /// returned subscription.
    pub fn subscribe(&self, listener: impl Fn(GlobalAddress) + Send + Sync + 'static) -> Subscription {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Notify every current listener. Listeners run on the caller thread
    /// against a snapshot of the registry.
    pub fn publish(&self, version: GlobalAddress) {
        let snapshot: Vec<Listener> = self
            .inner
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(version);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

impl Default for VersionBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered listener; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Weak<Mutex<BusInner>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.lock().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn test_publish_reaches_listeners() {
        let bus = VersionBus::new();
        let seen = Arc::new(AtomicI64::new(-1));
        let seen_by_listener = Arc::clone(&seen);
        let _subscription = bus.subscribe(move |version| {
            seen_by_listener.store(version, Ordering::SeqCst);
        });

        bus.publish(17);
        assert_eq!(seen.load(Ordering::SeqCst), 17);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = VersionBus::new();
        let subscription = bus.subscribe(|_| {});
        assert_eq!(bus.listener_count(), 1);
        drop(subscription);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_publish_with_no_listeners_is_fine() {
        VersionBus::new().publish(3);
    }
}
