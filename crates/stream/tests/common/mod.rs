//! Shared helpers for stream view integration tests

use skein_common::{GlobalAddress, RuntimeSettings, StreamId, Token};
use skein_engine::MockCluster;
use skein_runtime::{LogRuntime, TokenGrant};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Settings tuned for tests: hole-fill immediately, retry fast.
pub fn fast_settings() -> RuntimeSettings {
    let mut settings = RuntimeSettings::default();
    settings.request_timeout = Duration::ZERO;
    settings.connection_retry_rate = Duration::from_millis(1);
    settings
}

pub fn runtime() -> (Arc<MockCluster>, LogRuntime) {
    let cluster = Arc::new(MockCluster::new());
    let runtime = LogRuntime::connect(Arc::clone(&cluster), fast_settings());
    (cluster, runtime)
}

pub fn granted(grant: TokenGrant) -> Token {
    match grant {
        TokenGrant::Granted(token) => token,
        TokenGrant::Aborted { conflict_stream } => {
            panic!("unexpected abort, conflict on {:?}", conflict_stream)
        }
    }
}

/// Append one entry to the given streams and return its address.
pub fn append(runtime: &LogRuntime, streams: &[StreamId], payload: &[u8]) -> GlobalAddress {
    let token = granted(
        runtime
            .sequencer()
            .token_request(1, streams.iter().copied().collect::<BTreeSet<_>>(), None)
            .unwrap(),
    );
    runtime.log().append(&token, payload.to_vec()).unwrap();
    token.global_address
}

/// Addresses of every entry a fresh iteration of `view` yields.
pub fn yielded_addresses(view: &skein_stream::QueuedStreamView) -> Vec<GlobalAddress> {
    let mut addresses = Vec::new();
    while let Some(entry) = view.next().unwrap() {
        addresses.push(entry.global_address);
    }
    addresses
}
