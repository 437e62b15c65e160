//! Log client
//!
//! Reads and writes individual log slots. Reads are pure functions of the
//! address; `read_resolved` additionally forces progress on never-written
//! addresses by hole-filling them once the request timeout elapses.

use crate::wire::{wire_error, Endpoint};
use parking_lot::Mutex;
use skein_common::{
    DataType, GlobalAddress, LogEntry, Result, RuntimeError, StreamId, Token, WriteStatus,
};
use skein_protocol::{LogUnitRequest, LogUnitResponse, RequestBody, ResponseEnvelope};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// How long to sleep between polls of an empty address.
const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Client for the log-unit side of the cluster.
pub struct LogClient {
    endpoint: Endpoint,

    /// When each still-empty address was first observed, for the
    /// hole-fill timeout.
    empty_sightings: Mutex<HashMap<GlobalAddress, Instant>>,
}

impl LogClient {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            empty_sightings: Mutex::new(HashMap::new()),
        }
    }

    /// Read the record at `address`. Returns `Empty` records as-is and
    /// surfaces garbage-collected addresses as `Trimmed` errors.
    pub fn read(&self, address: GlobalAddress) -> Result<LogEntry> {
        let response = self
            .endpoint
            .exchange(RequestBody::LogUnit(LogUnitRequest::Read { address }))?;
        let entry = self.expect_entry(response)?;
        if entry.data_type == DataType::Trimmed {
            return Err(RuntimeError::Trimmed(address));
        }
        Ok(entry)
    }

    /// Read the record at `address`, hole-filling it if it stays empty
    /// past the request timeout so readers behind a hole make progress.
    pub fn read_resolved(&self, address: GlobalAddress) -> Result<LogEntry> {
        loop {
            let entry = self.read(address)?;
            if entry.data_type != DataType::Empty {
                self.empty_sightings.lock().remove(&address);
                return Ok(entry);
            }
            let first_seen = *self
                .empty_sightings
                .lock()
                .entry(address)
                .or_insert_with(Instant::now);
            if first_seen.elapsed() >= self.endpoint.settings().request_timeout {
                tracing::debug!("hole-filling empty address {} to force progress", address);
                self.fill_hole(address)?;
                self.empty_sightings.lock().remove(&address);
            } else {
                std::thread::sleep(EMPTY_POLL_INTERVAL);
            }
        }
    }

    /// Read many addresses with a parallel fan-out, returning entries in
    /// input order.
    pub fn read_all(&self, addresses: &[GlobalAddress]) -> Result<Vec<LogEntry>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.endpoint.settings().event_loop_threads.max(1);
        let chunk_size = addresses.len().div_ceil(workers);
        let slots: Mutex<Vec<Option<Result<LogEntry>>>> =
            Mutex::new(vec![None; addresses.len()]);

        std::thread::scope(|scope| {
            for (chunk_index, chunk) in addresses.chunks(chunk_size).enumerate() {
                let slots = &slots;
                scope.spawn(move || {
                    for (offset, &address) in chunk.iter().enumerate() {
                        let outcome = self.read_resolved(address);
                        slots.lock()[chunk_index * chunk_size + offset] = Some(outcome);
                    }
                });
            }
        });

        slots
            .into_inner()
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(RuntimeError::Network("parallel read lost".into())))
            })
            .collect()
    }

    /// Write a data entry at a granted address. The token's epoch is
    /// checked against the latest observed epoch before the log unit is
    /// contacted.
    pub fn write(
        &self,
        address: GlobalAddress,
        epoch: u64,
        streams: BTreeSet<StreamId>,
        backpointers: BTreeMap<StreamId, GlobalAddress>,
        payload: Vec<u8>,
    ) -> Result<WriteStatus> {
        let observed = self.endpoint.epoch_tracker().current();
        if epoch < observed {
            return Err(RuntimeError::WrongEpoch {
                client: epoch,
                server: observed,
            });
        }
        let response = self
            .endpoint
            .exchange(RequestBody::LogUnit(LogUnitRequest::Write {
                address,
                epoch,
                streams,
                backpointers,
                payload,
            }))?;
        match response {
            ResponseEnvelope::LogUnit(LogUnitResponse::Write(status)) => Ok(status),
            ResponseEnvelope::Error(status) => Err(wire_error(status, epoch)),
            other => Err(unexpected(other)),
        }
    }

    /// Write at a token's first address using the streams and
    /// backpointers minted into it.
    pub fn append(&self, token: &Token, payload: Vec<u8>) -> Result<WriteStatus> {
        self.write(
            token.global_address,
            token.epoch,
            token.backpointers.keys().copied().collect(),
            token.backpointers.clone(),
            payload,
        )
    }

    /// Explicitly fill a never-written address with a hole record.
    pub fn fill_hole(&self, address: GlobalAddress) -> Result<()> {
        let response = self
            .endpoint
            .exchange(RequestBody::LogUnit(LogUnitRequest::FillHole { address }))?;
        self.expect_ack(response)
    }

    /// Garbage-collect the prefix of `stream` up to `address`.
    pub fn trim(&self, stream: StreamId, address: GlobalAddress) -> Result<()> {
        let response = self
            .endpoint
            .exchange(RequestBody::LogUnit(LogUnitRequest::Trim {
                stream,
                address,
            }))?;
        self.expect_ack(response)
    }

    fn expect_entry(&self, response: ResponseEnvelope) -> Result<LogEntry> {
        match response {
            ResponseEnvelope::LogUnit(LogUnitResponse::Entry(entry)) => Ok(entry),
            ResponseEnvelope::Error(status) => {
                Err(wire_error(status, self.endpoint.epoch_tracker().current()))
            }
            other => Err(unexpected(other)),
        }
    }

    fn expect_ack(&self, response: ResponseEnvelope) -> Result<()> {
        match response {
            ResponseEnvelope::LogUnit(LogUnitResponse::Ack) => Ok(()),
            ResponseEnvelope::Error(status) => {
                Err(wire_error(status, self.endpoint.epoch_tracker().current()))
            }
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: ResponseEnvelope) -> RuntimeError {
    RuntimeError::Network(format!("unexpected response: {:?}", response))
}
