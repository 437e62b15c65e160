//! Shared request plumbing for the log and sequencer clients

use crate::retry::IntervalRetry;
use skein_common::{Result, RuntimeError, RuntimeSettings};
use skein_engine::MockCluster;
use skein_protocol::{
    decode_frame, encode_frame, RequestBody, RequestEnvelope, ResponseEnvelope, WireStatus,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Highest epoch observed in any server response. Writes with an older
/// token epoch are rejected client-side before touching a log unit.
#[derive(Debug, Default)]
pub(crate) struct EpochTracker(AtomicU64);

impl EpochTracker {
    pub(crate) fn observe(&self, epoch: u64) {
        self.0.fetch_max(epoch, Ordering::SeqCst);
    }

    pub(crate) fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// One client's connection to the cluster.
#[derive(Clone)]
pub(crate) struct Endpoint {
    cluster: Arc<MockCluster>,
    settings: Arc<RuntimeSettings>,
    epoch: Arc<EpochTracker>,
}

impl Endpoint {
    pub(crate) fn new(
        cluster: Arc<MockCluster>,
        settings: Arc<RuntimeSettings>,
        epoch: Arc<EpochTracker>,
    ) -> Self {
        Self {
            cluster,
            settings,
            epoch,
        }
    }

    pub(crate) fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub(crate) fn epoch_tracker(&self) -> &EpochTracker {
        &self.epoch
    }

    /// Send one request and decode the response, retrying transient
    /// failures at the configured rate.
    pub(crate) fn exchange(&self, body: RequestBody) -> Result<ResponseEnvelope> {
        let envelope = RequestEnvelope {
            cluster_id: self.cluster.cluster_id(),
            client_id: self.settings.client_id,
            body,
        };
        let frame = encode_frame(&envelope)
            .map_err(|e| RuntimeError::Network(e.to_string()))?;

        let retry = IntervalRetry::new(
            self.settings.connection_retry_rate,
            self.settings.workflow_retry,
        );
        retry.run(|| {
            let bytes = self
                .cluster
                .dispatch(&frame)
                .map_err(|e| RuntimeError::Network(e.to_string()))?;
            let (response, _): (ResponseEnvelope, usize) =
                decode_frame(&bytes).map_err(|e| RuntimeError::Network(e.to_string()))?;
            match response {
                ResponseEnvelope::Error(WireStatus::NotReady) => {
                    Err(RuntimeError::ServerNotReady)
                }
                other => Ok(other),
            }
        })
    }
}

/// Map a terminal wire status to a runtime error. `client_epoch` is the
/// epoch the request was issued at.
pub(crate) fn wire_error(status: WireStatus, client_epoch: u64) -> RuntimeError {
    match status {
        WireStatus::WrongEpoch { server_epoch } => RuntimeError::WrongEpoch {
            client: client_epoch,
            server: server_epoch,
        },
        WireStatus::WrongClusterId { cluster_id } => RuntimeError::WrongCluster(cluster_id),
        WireStatus::NotReady => RuntimeError::ServerNotReady,
        WireStatus::Ack | WireStatus::Nack => {
            RuntimeError::Network(format!("unexpected wire status: {:?}", status))
        }
        WireStatus::ServerException { message } => RuntimeError::Network(message),
    }
}
