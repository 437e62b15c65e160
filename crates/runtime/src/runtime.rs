//! The runtime handle

use crate::events::VersionBus;
use crate::log::LogClient;
use crate::sequencer::SequencerClient;
use crate::wire::{Endpoint, EpochTracker};
use skein_common::RuntimeSettings;
use skein_engine::MockCluster;
use std::sync::Arc;

/// One client's connection to a cluster.
///
/// Owns the log client, the sequencer client, and the version bus. Stream
/// views and transactions borrow from here; the log client is shared by
/// reference, never duplicated.
pub struct LogRuntime {
    settings: Arc<RuntimeSettings>,
    cluster: Arc<MockCluster>,
    log: Arc<LogClient>,
    sequencer: SequencerClient,
    version_bus: VersionBus,
}

impl LogRuntime {
    /// Connect to a cluster with the given settings.
    pub fn connect(cluster: Arc<MockCluster>, settings: RuntimeSettings) -> Self {
        let settings = Arc::new(settings);
        let epoch = Arc::new(EpochTracker::default());
        let endpoint = Endpoint::new(Arc::clone(&cluster), Arc::clone(&settings), epoch);
        Self {
            settings,
            cluster,
            log: Arc::new(LogClient::new(endpoint.clone())),
            sequencer: SequencerClient::new(endpoint),
            version_bus: VersionBus::new(),
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn cluster(&self) -> &Arc<MockCluster> {
        &self.cluster
    }

    pub fn log(&self) -> &Arc<LogClient> {
        &self.log
    }

    pub fn sequencer(&self) -> &SequencerClient {
        &self.sequencer
    }

    pub fn version_bus(&self) -> &VersionBus {
        &self.version_bus
    }
}
