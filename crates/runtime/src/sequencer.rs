//! Sequencer client
//!
//! Issues token queries and token requests. Every response epoch feeds
//! the shared epoch tracker so stale tokens are caught before they reach
//! a log unit.

use crate::wire::{wire_error, Endpoint};
use skein_common::{Result, RuntimeError, StreamId, Token, TxResolutionInfo};
use skein_protocol::{
    RequestBody, ResponseEnvelope, SequencerRequest, SequencerResponse,
};
use std::collections::BTreeSet;

/// Outcome of a token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    /// The sequencer minted a token.
    Granted(Token),
    /// Conflict resolution rejected the transactional request.
    Aborted { conflict_stream: Option<StreamId> },
}

/// Client for the sequencer side of the cluster.
#[derive(Clone)]
pub struct SequencerClient {
    endpoint: Endpoint,
}

impl SequencerClient {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    /// Peek at the global tail and the tails of `streams` without
    /// allocating anything.
    pub fn token_query(&self, streams: impl IntoIterator<Item = StreamId>) -> Result<Token> {
        let request = SequencerRequest::Query {
            streams: streams.into_iter().collect(),
        };
        match self.send(request)? {
            TokenGrant::Granted(token) => Ok(token),
            TokenGrant::Aborted { .. } => {
                Err(RuntimeError::Network("query cannot abort".into()))
            }
        }
    }

    /// Request `count` tokens over `streams`, optionally with
    /// transactional conflict resolution.
    pub fn token_request(
        &self,
        count: u64,
        streams: BTreeSet<StreamId>,
        txn: Option<TxResolutionInfo>,
    ) -> Result<TokenGrant> {
        let request = match (txn, streams.len()) {
            (Some(resolution), _) => SequencerRequest::Tx {
                count,
                streams,
                resolution,
            },
            (None, 0) => SequencerRequest::Raw { count },
            (None, 1) => SequencerRequest::Stream {
                count,
                stream: *streams.iter().next().unwrap_or(&StreamId::default()),
            },
            (None, _) => SequencerRequest::MultiStream { count, streams },
        };
        self.send(request)
    }

    fn send(&self, request: SequencerRequest) -> Result<TokenGrant> {
        let encoded = request
            .encode()
            .map_err(|e| RuntimeError::Network(e.to_string()))?;
        let response = self.endpoint.exchange(RequestBody::Sequencer(encoded))?;
        match response {
            ResponseEnvelope::Sequencer(SequencerResponse::Token(token)) => {
                self.endpoint.epoch_tracker().observe(token.epoch);
                Ok(TokenGrant::Granted(token))
            }
            ResponseEnvelope::Sequencer(SequencerResponse::Aborted { conflict_stream }) => {
                Ok(TokenGrant::Aborted { conflict_stream })
            }
            ResponseEnvelope::Error(status) => {
                Err(wire_error(status, self.endpoint.epoch_tracker().current()))
            }
            other => Err(RuntimeError::Network(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }
}
