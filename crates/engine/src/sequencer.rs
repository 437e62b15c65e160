//! Token sequencer
//!
//! All allocations are serialized by the inner lock, so arrival order at
//! the sequencer is the total order of tokens. Transactional requests run
//! conflict resolution against the stream tails before allocating.

use parking_lot::Mutex;
use skein_common::{
    GlobalAddress, StreamId, Token, TxResolutionInfo, NON_ADDRESS, NON_EXIST,
};
use skein_protocol::{SequencerRequest, SequencerResponse};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory sequencer with epoch and per-stream tail bookkeeping.
pub struct Sequencer {
    inner: Mutex<SequencerInner>,
}

struct SequencerInner {
    epoch: u64,

    /// The next address to grant; the global tail is one less.
    next_address: GlobalAddress,

    /// Last granted address per stream.
    stream_tails: BTreeMap<StreamId, GlobalAddress>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SequencerInner {
                epoch: 0,
                next_address: 0,
                stream_tails: BTreeMap::new(),
            }),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Advance the epoch, invalidating every outstanding token.
    pub fn bump_epoch(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        tracing::info!("sequencer epoch advanced to {}", inner.epoch);
        inner.epoch
    }

    /// Serve one token request.
    pub fn handle(&self, request: SequencerRequest) -> SequencerResponse {
        let mut inner = self.inner.lock();
        match request {
            SequencerRequest::Query { streams } => SequencerResponse::Token(inner.query(&streams)),
            SequencerRequest::Raw { count } => {
                SequencerResponse::Token(inner.grant(count, &BTreeSet::new()))
            }
            SequencerRequest::Stream { count, stream } => {
                SequencerResponse::Token(inner.grant(count, &BTreeSet::from([stream])))
            }
            SequencerRequest::MultiStream { count, streams } => {
                SequencerResponse::Token(inner.grant(count, &streams))
            }
            SequencerRequest::Tx {
                count,
                streams,
                resolution,
            } => match inner.check_conflicts(&resolution) {
                Some(stream) => {
                    tracing::debug!(
                        "tx token request aborted: stream {} advanced past read timestamp {}",
                        stream,
                        resolution.read_timestamp
                    );
                    SequencerResponse::Aborted {
                        conflict_stream: Some(stream),
                    }
                }
                None => SequencerResponse::Token(inner.grant(count, &streams)),
            },
        }
    }
}

impl SequencerInner {
    fn global_tail(&self) -> GlobalAddress {
        if self.next_address == 0 {
            NON_ADDRESS
        } else {
            self.next_address - 1
        }
    }

    fn query(&self, streams: &BTreeSet<StreamId>) -> Token {
        let stream_tails = streams
            .iter()
            .map(|&sid| (sid, self.stream_tails.get(&sid).copied().unwrap_or(NON_EXIST)))
            .collect();
        Token {
            epoch: self.epoch,
            global_address: self.global_tail(),
            backpointers: BTreeMap::new(),
            stream_tails,
        }
    }

    fn grant(&mut self, count: u64, streams: &BTreeSet<StreamId>) -> Token {
        let base = self.next_address;
        self.next_address += count as GlobalAddress;
        let tail = self.next_address - 1;

        let mut backpointers = BTreeMap::new();
        let mut stream_tails = BTreeMap::new();
        for &sid in streams {
            let previous = self.stream_tails.get(&sid).copied().unwrap_or(NON_EXIST);
            backpointers.insert(sid, previous);
            self.stream_tails.insert(sid, tail);
            stream_tails.insert(sid, tail);
        }

        Token {
            epoch: self.epoch,
            global_address: base,
            backpointers,
            stream_tails,
        }
    }

    /// The first stream of the read set whose tail moved past the read
    /// timestamp, if any.
    fn check_conflicts(&self, resolution: &TxResolutionInfo) -> Option<StreamId> {
        resolution.read_set.iter().copied().find(|sid| {
            self.stream_tails
                .get(sid)
                .is_some_and(|&tail| tail > resolution.read_timestamp)
        })
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
