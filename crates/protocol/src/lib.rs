//! Wire protocol types for the skein distributed log
//!
//! Messages are split by the server that consumes them:
//! - `SequencerRequest`: token queries and allocations, encoded as a
//!   single kind byte followed by a CBOR body
//! - `LogUnitRequest`: reads, writes, hole fills, and trims
//! - `ReplicationEntry`: the cross-cluster replication stream
//!
//! Frames on the wire are length-prefixed CBOR.

mod frame;
mod messages;
mod replication;

pub use frame::{decode_frame, encode_frame, ProtocolError, MAX_FRAME_BYTES};
pub use messages::{
    LogUnitRequest, LogUnitResponse, RequestBody, RequestEnvelope, ResponseEnvelope,
    SequencerRequest, SequencerResponse, WireStatus,
};
pub use replication::{ReplicationEntry, ReplicationEntryType};
