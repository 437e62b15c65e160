//! Sequencer tokens and transaction resolution info

use crate::address::{GlobalAddress, NON_ADDRESS};
use crate::stream_id::StreamId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A sequencer-minted write permission.
///
/// Bundles the epoch the token was issued at, the first granted global
/// address, the backpointers the writer must embed (the previous tail of
/// each requested stream), and the stream tails after the grant. An epoch
/// increase invalidates all outstanding tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub epoch: u64,
    pub global_address: GlobalAddress,
    pub backpointers: BTreeMap<StreamId, GlobalAddress>,
    pub stream_tails: BTreeMap<StreamId, GlobalAddress>,
}

impl Token {
    /// The tail recorded for `stream`, or `NON_ADDRESS` if the stream was
    /// not part of the request.
    pub fn tail_for(&self, stream: StreamId) -> GlobalAddress {
        self.stream_tails.get(&stream).copied().unwrap_or(NON_ADDRESS)
    }
}

/// Conflict information attached to a transactional token request.
///
/// The sequencer aborts the request if any stream in `read_set` saw a
/// committed write after `read_timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResolutionInfo {
    pub read_timestamp: GlobalAddress,
    pub read_set: BTreeSet<StreamId>,
    pub write_set: BTreeSet<StreamId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_for_missing_stream() {
        let token = Token {
            epoch: 1,
            global_address: 10,
            backpointers: BTreeMap::new(),
            stream_tails: BTreeMap::new(),
        };
        assert_eq!(token.tail_for(StreamId::new()), NON_ADDRESS);
    }

    #[test]
    fn test_tail_for_known_stream() {
        let stream = StreamId::new();
        let token = Token {
            epoch: 1,
            global_address: 10,
            backpointers: BTreeMap::from([(stream, 4)]),
            stream_tails: BTreeMap::from([(stream, 10)]),
        };
        assert_eq!(token.tail_for(stream), 10);
    }
}
