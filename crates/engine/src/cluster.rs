//! In-process cluster emulation
//!
//! Bundles a log unit and a sequencer behind the wire envelope, the way a
//! real deployment exposes them behind a router. Clients hand encoded
//! request frames to `dispatch` and get encoded response frames back, so
//! the full protocol path is exercised without a network.

use crate::log_unit::LogUnit;
use crate::sequencer::Sequencer;
use skein_common::{CheckpointRecord, GlobalAddress, LogEntry, StreamId, WriteStatus};
use skein_protocol::{
    decode_frame, encode_frame, LogUnitRequest, LogUnitResponse, ProtocolError, RequestBody,
    RequestEnvelope, ResponseEnvelope, SequencerRequest, SequencerResponse, WireStatus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// A log unit and a sequencer wired together under one cluster identity.
pub struct MockCluster {
    cluster_id: Uuid,
    log: LogUnit,
    sequencer: Sequencer,
    ready: AtomicBool,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::with_log(LogUnit::new())
    }

    /// A cluster whose log unit runs out of space at `capacity`.
    pub fn with_capacity(capacity: GlobalAddress) -> Self {
        Self::with_log(LogUnit::with_capacity(capacity))
    }

    fn with_log(log: LogUnit) -> Self {
        Self {
            cluster_id: Uuid::new_v4(),
            log,
            sequencer: Sequencer::new(),
            ready: AtomicBool::new(true),
        }
    }

    pub fn cluster_id(&self) -> Uuid {
        self.cluster_id
    }

    pub fn epoch(&self) -> u64 {
        self.sequencer.epoch()
    }

    /// Advance the epoch, invalidating outstanding tokens.
    pub fn bump_epoch(&self) -> u64 {
        self.sequencer.bump_epoch()
    }

    /// Toggle the `NotReady` wire status for every subsequent request.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Serve one encoded request frame and produce an encoded response
    /// frame.
    pub fn dispatch(&self, frame: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let (envelope, _): (RequestEnvelope, usize) = decode_frame(frame)?;
        let response = self.handle(envelope);
        encode_frame(&response)
    }

    fn handle(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        if !self.ready.load(Ordering::SeqCst) {
            return ResponseEnvelope::Error(WireStatus::NotReady);
        }
        if envelope.cluster_id != self.cluster_id {
            return ResponseEnvelope::Error(WireStatus::WrongClusterId {
                cluster_id: self.cluster_id,
            });
        }
        match envelope.body {
            RequestBody::Sequencer(bytes) => match SequencerRequest::decode(&bytes) {
                Ok(request) => ResponseEnvelope::Sequencer(self.sequencer.handle(request)),
                Err(e) => ResponseEnvelope::Error(WireStatus::ServerException {
                    message: e.to_string(),
                }),
            },
            RequestBody::LogUnit(request) => self.handle_log_unit(request),
        }
    }

    fn handle_log_unit(&self, request: LogUnitRequest) -> ResponseEnvelope {
        match request {
            LogUnitRequest::Read { address } => {
                ResponseEnvelope::LogUnit(LogUnitResponse::Entry(self.log.read(address)))
            }
            LogUnitRequest::Write {
                address,
                epoch,
                streams,
                backpointers,
                payload,
            } => {
                let server_epoch = self.sequencer.epoch();
                if epoch != server_epoch {
                    return ResponseEnvelope::Error(WireStatus::WrongEpoch { server_epoch });
                }
                let entry = LogEntry::data(address, streams, backpointers, payload);
                ResponseEnvelope::LogUnit(LogUnitResponse::Write(self.log.write(entry)))
            }
            LogUnitRequest::FillHole { address } => {
                self.log.fill_hole(address);
                ResponseEnvelope::LogUnit(LogUnitResponse::Ack)
            }
            LogUnitRequest::Trim { stream, address } => {
                self.log.trim(stream, address);
                ResponseEnvelope::LogUnit(LogUnitResponse::Ack)
            }
        }
    }

    /// Allocate one address on `stream` and write a checkpoint record
    /// there. Checkpoint writers are outside the runtime; this stands in
    /// for them.
    pub fn append_checkpoint_record(
        &self,
        stream: StreamId,
        record: CheckpointRecord,
        payload: Vec<u8>,
    ) -> GlobalAddress {
        let response = self
            .sequencer
            .handle(SequencerRequest::Stream { count: 1, stream });
        let token = match response {
            SequencerResponse::Token(token) => token,
            SequencerResponse::Aborted { .. } => {
                unreachable!("non-tx grants never abort")
            }
        };
        let address = token.global_address;
        let backpointer = token.backpointers[&stream];
        let entry = LogEntry::checkpoint(address, stream, backpointer, record, payload);
        let status = self.log.write(entry);
        assert_eq!(status, WriteStatus::Ok, "checkpoint slot already taken");
        address
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}
