//! Request and response messages for the sequencer and log-unit servers

use crate::frame::ProtocolError;
use serde::{Deserialize, Serialize};
use skein_common::{
    GlobalAddress, LogEntry, StreamId, Token, TxResolutionInfo, WriteStatus,
};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// A token request, the heart of the log protocol.
///
/// On the wire this is a single kind byte followed by a CBOR body:
///
/// | kind | body |
/// |---|---|
/// | 0 Query | stream set |
/// | 1 Raw | count |
/// | 2 Stream | count, stream |
/// | 3 MultiStream | count, stream set |
/// | 4 Tx | count, stream set, resolution info |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerRequest {
    /// Peek at the global and per-stream tails without allocating.
    Query { streams: BTreeSet<StreamId> },
    /// Extend the global tail only.
    Raw { count: u64 },
    /// Extend the global tail and one stream tail.
    Stream { count: u64, stream: StreamId },
    /// Extend the global tail and each named stream tail.
    MultiStream {
        count: u64,
        streams: BTreeSet<StreamId>,
    },
    /// Run conflict resolution, then behave as `MultiStream`.
    Tx {
        count: u64,
        streams: BTreeSet<StreamId>,
        resolution: TxResolutionInfo,
    },
}

impl SequencerRequest {
    /// The wire tag of this request kind.
    pub fn kind(&self) -> u8 {
        match self {
            SequencerRequest::Query { .. } => 0,
            SequencerRequest::Raw { .. } => 1,
            SequencerRequest::Stream { .. } => 2,
            SequencerRequest::MultiStream { .. } => 3,
            SequencerRequest::Tx { .. } => 4,
        }
    }

    /// Encode as kind byte + CBOR body.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = vec![self.kind()];
        let result = match self {
            SequencerRequest::Query { streams } => write_body(&mut bytes, streams),
            SequencerRequest::Raw { count } => write_body(&mut bytes, count),
            SequencerRequest::Stream { count, stream } => {
                write_body(&mut bytes, &(count, stream))
            }
            SequencerRequest::MultiStream { count, streams } => {
                write_body(&mut bytes, &(count, streams))
            }
            SequencerRequest::Tx {
                count,
                streams,
                resolution,
            } => write_body(&mut bytes, &(count, streams, resolution)),
        };
        result.map(|_| bytes)
    }

    /// Decode a kind byte + CBOR body.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&kind, body) = bytes.split_first().ok_or(ProtocolError::Truncated {
            needed: 1,
            have: 0,
        })?;
        match kind {
            0 => read_body(body).map(|streams| SequencerRequest::Query { streams }),
            1 => read_body(body).map(|count| SequencerRequest::Raw { count }),
            2 => read_body(body)
                .map(|(count, stream)| SequencerRequest::Stream { count, stream }),
            3 => read_body(body)
                .map(|(count, streams)| SequencerRequest::MultiStream { count, streams }),
            4 => read_body(body).map(|(count, streams, resolution)| SequencerRequest::Tx {
                count,
                streams,
                resolution,
            }),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

fn write_body<T: Serialize>(bytes: &mut Vec<u8>, body: &T) -> Result<(), ProtocolError> {
    ciborium::ser::into_writer(body, bytes).map_err(|e| ProtocolError::Codec(e.to_string()))
}

fn read_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    ciborium::de::from_reader(body).map_err(|e| ProtocolError::Codec(e.to_string()))
}

/// Response to a `SequencerRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerResponse {
    /// The minted token (or, for `Query`, the current tails).
    Token(Token),
    /// Conflict resolution rejected the transactional request.
    Aborted { conflict_stream: Option<StreamId> },
}

/// Operations understood by a log unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogUnitRequest {
    /// Read the record at an address.
    Read { address: GlobalAddress },
    /// Write a data entry at a sequencer-granted address.
    Write {
        address: GlobalAddress,
        epoch: u64,
        streams: BTreeSet<StreamId>,
        backpointers: BTreeMap<StreamId, GlobalAddress>,
        payload: Vec<u8>,
    },
    /// Explicitly fill a never-written address with a hole record.
    FillHole { address: GlobalAddress },
    /// Garbage-collect the prefix of a stream up to an address.
    Trim {
        stream: StreamId,
        address: GlobalAddress,
    },
}

/// Response to a `LogUnitRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogUnitResponse {
    /// The record at the requested address; `Trimmed` and `Empty` records
    /// are reported in-band as entry types.
    Entry(LogEntry),
    /// Outcome of a write.
    Write(WriteStatus),
    /// Hole fill or trim acknowledged.
    Ack,
}

/// Request envelope carrying identity alongside the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub cluster_id: Uuid,
    pub client_id: Uuid,
    pub body: RequestBody,
}

/// Body of a request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// A byte-tagged `SequencerRequest` (see `SequencerRequest::encode`).
    Sequencer(Vec<u8>),
    LogUnit(LogUnitRequest),
}

/// Response envelope: either a payload or a wire status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseEnvelope {
    Sequencer(SequencerResponse),
    LogUnit(LogUnitResponse),
    Error(WireStatus),
}

/// Status and error codes carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireStatus {
    Ack,
    Nack,
    WrongEpoch { server_epoch: u64 },
    WrongClusterId { cluster_id: Uuid },
    NotReady,
    ServerException { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bytes_match_wire_table() {
        let stream = StreamId::new();
        let requests = [
            SequencerRequest::Query {
                streams: BTreeSet::new(),
            },
            SequencerRequest::Raw { count: 1 },
            SequencerRequest::Stream { count: 1, stream },
            SequencerRequest::MultiStream {
                count: 1,
                streams: BTreeSet::from([stream]),
            },
            SequencerRequest::Tx {
                count: 1,
                streams: BTreeSet::from([stream]),
                resolution: TxResolutionInfo {
                    read_timestamp: 0,
                    read_set: BTreeSet::new(),
                    write_set: BTreeSet::new(),
                },
            },
        ];
        for (expected, request) in requests.iter().enumerate() {
            assert_eq!(request.kind(), expected as u8);
            assert_eq!(request.encode().unwrap()[0], expected as u8);
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let stream = StreamId::new();
        let request = SequencerRequest::Tx {
            count: 2,
            streams: BTreeSet::from([stream]),
            resolution: TxResolutionInfo {
                read_timestamp: 100,
                read_set: BTreeSet::from([stream]),
                write_set: BTreeSet::new(),
            },
        };
        let decoded = SequencerRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(matches!(
            SequencerRequest::decode(&[9, 0, 0]),
            Err(ProtocolError::UnknownKind(9))
        ));
    }
}
