//! The transaction context
//!
//! Collects read and write sets while the transaction runs, then drives
//! the commit protocol: one transactional token request carrying the
//! conflict information, followed by one multi-stream entry per buffered
//! write batch at the granted addresses.

use crate::error::{Result, TxnError};
use crate::types::{TxnState, TxnType};
use skein_common::{
    AbortCause, GlobalAddress, LogEntry, RuntimeError, StreamId, TxResolutionInfo, WriteStatus,
    NON_EXIST,
};
use skein_runtime::{LogRuntime, TokenGrant};
use skein_stream::QueuedStreamView;
use std::collections::{BTreeMap, BTreeSet};

struct WriteBatch {
    streams: BTreeSet<StreamId>,
    payload: Vec<u8>,
}

/// One transaction's state, passed explicitly to every operation.
pub struct TxnContext {
    txn_type: TxnType,
    state: TxnState,

    /// The log as of this address is what the transaction observes.
    snapshot_timestamp: GlobalAddress,

    read_set: BTreeSet<StreamId>,
    write_set: BTreeSet<StreamId>,
    write_batches: Vec<WriteBatch>,
}

impl TxnContext {
    /// Begin a transaction whose snapshot is the current global tail.
    pub fn begin(runtime: &LogRuntime, txn_type: TxnType) -> Result<Self> {
        let snapshot = runtime.sequencer().token_query([])?.global_address;
        Ok(Self::begin_at(txn_type, snapshot))
    }

    /// Begin a transaction at an explicit snapshot address.
    pub fn begin_at(txn_type: TxnType, snapshot_timestamp: GlobalAddress) -> Self {
        Self {
            txn_type,
            state: TxnState::Active,
            snapshot_timestamp,
            read_set: BTreeSet::new(),
            write_set: BTreeSet::new(),
            write_batches: Vec::new(),
        }
    }

    /// Begin a nested transaction sharing this one's snapshot. Its
    /// effects land in this context when it calls `commit_into`.
    pub fn begin_nested(&self) -> Result<TxnContext> {
        self.ensure_active()?;
        Ok(Self::begin_at(self.txn_type, self.snapshot_timestamp))
    }

    pub fn txn_type(&self) -> TxnType {
        self.txn_type
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn snapshot_timestamp(&self) -> GlobalAddress {
        self.snapshot_timestamp
    }

    pub fn read_set(&self) -> &BTreeSet<StreamId> {
        &self.read_set
    }

    pub fn write_set(&self) -> &BTreeSet<StreamId> {
        &self.write_set
    }

    /// Read the next entry of `view` as of the transaction snapshot,
    /// recording the stream in the read set.
    pub fn read_next(&mut self, view: &QueuedStreamView) -> Result<Option<LogEntry>> {
        self.ensure_active()?;
        self.read_set.insert(view.stream_id());
        match view.next_up_to(self.snapshot_timestamp) {
            Ok(entry) => Ok(entry),
            Err(e) => Err(self.abort_on(e)),
        }
    }

    /// Buffer one entry to be written to `streams` at commit.
    pub fn write(
        &mut self,
        streams: impl IntoIterator<Item = StreamId>,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.ensure_active()?;
        if self.txn_type == TxnType::Snapshot {
            return Err(TxnError::WritesNotPermitted);
        }
        let streams: BTreeSet<StreamId> = streams.into_iter().collect();
        self.write_set.extend(streams.iter().copied());
        self.write_batches.push(WriteBatch { streams, payload });
        Ok(())
    }

    /// Merge this nested transaction into its parent. Commit against the
    /// sequencer happens only at the outermost boundary.
    pub fn commit_into(mut self, parent: &mut TxnContext) -> Result<()> {
        self.ensure_active()?;
        parent.ensure_active()?;
        self.state = TxnState::Committed;
        parent.read_set.extend(self.read_set.iter().copied());
        parent.write_set.extend(self.write_set.iter().copied());
        parent.write_batches.append(&mut self.write_batches);
        Ok(())
    }

    /// Abort explicitly. The context becomes terminal.
    pub fn abort(&mut self) {
        self.state = TxnState::Aborted;
    }

    /// Commit the transaction. Returns the commit address: the address of
    /// the last written entry, or the snapshot for read-only commits.
    pub fn commit(&mut self, runtime: &LogRuntime) -> Result<GlobalAddress> {
        self.ensure_active()?;
        self.state = TxnState::Committing;

        if self.write_batches.is_empty() {
            self.state = TxnState::Committed;
            return Ok(self.snapshot_timestamp);
        }

        let resolution = TxResolutionInfo {
            read_timestamp: self.snapshot_timestamp,
            read_set: match self.txn_type {
                TxnType::WriteAfterWrite => self.write_set.clone(),
                TxnType::Optimistic | TxnType::Snapshot => self.read_set.clone(),
            },
            write_set: self.write_set.clone(),
        };
        let all_streams: BTreeSet<StreamId> = self.write_set.clone();
        let batches = std::mem::take(&mut self.write_batches);
        let count = batches.len() as u64;

        let mut attempts = runtime.settings().workflow_retry.max(1);
        loop {
            let grant = runtime
                .sequencer()
                .token_request(count, all_streams.clone(), Some(resolution.clone()))
                .map_err(|e| self.abort_on(e))?;
            let token = match grant {
                TokenGrant::Granted(token) => token,
                TokenGrant::Aborted { conflict_stream } => {
                    self.state = TxnState::Aborted;
                    return Err(TxnError::Aborted(AbortCause::Conflict {
                        stream: conflict_stream,
                    }));
                }
            };

            match self.write_batches_at(runtime, &token, &batches)? {
                Some(commit_address) => {
                    self.state = TxnState::Committed;
                    return Ok(commit_address);
                }
                None => {
                    // Lost the first slot to a competitor; re-token and
                    // re-run conflict resolution.
                    attempts -= 1;
                    if attempts == 0 {
                        self.state = TxnState::Aborted;
                        return Err(TxnError::Aborted(AbortCause::Conflict { stream: None }));
                    }
                    tracing::debug!(
                        "commit overwrite at {}, retrying with a fresh token",
                        token.global_address
                    );
                }
            }
        }
    }

    /// Write every batch at consecutive token addresses, chaining
    /// backpointers per stream. Returns the last address on success, or
    /// `None` if the first write was overwritten and the commit can be
    /// retried wholesale.
    fn write_batches_at(
        &mut self,
        runtime: &LogRuntime,
        token: &skein_common::Token,
        batches: &[WriteBatch],
    ) -> Result<Option<GlobalAddress>> {
        let mut last_written: BTreeMap<StreamId, GlobalAddress> = token.backpointers.clone();
        let mut written_any = false;
        let mut commit_address = token.global_address;

        for (offset, batch) in batches.iter().enumerate() {
            let address = token.global_address + offset as GlobalAddress;
            let backpointers: BTreeMap<StreamId, GlobalAddress> = batch
                .streams
                .iter()
                .map(|&sid| (sid, last_written.get(&sid).copied().unwrap_or(NON_EXIST)))
                .collect();
            let status = runtime
                .log()
                .write(
                    address,
                    token.epoch,
                    batch.streams.clone(),
                    backpointers,
                    batch.payload.clone(),
                )
                .map_err(|e| self.abort_on(e))?;
            match status {
                WriteStatus::Ok => {
                    for &sid in &batch.streams {
                        last_written.insert(sid, address);
                    }
                    written_any = true;
                    commit_address = address;
                }
                WriteStatus::Overwrite if !written_any => return Ok(None),
                WriteStatus::Overwrite => {
                    // Part of the commit is already durable; it cannot be
                    // retried at a new address.
                    self.state = TxnState::Aborted;
                    return Err(TxnError::Aborted(AbortCause::Conflict { stream: None }));
                }
                WriteStatus::Trimmed => {
                    self.state = TxnState::Aborted;
                    return Err(TxnError::Aborted(AbortCause::TrimmedRead));
                }
                WriteStatus::OutOfSpace => {
                    self.state = TxnState::Aborted;
                    return Err(TxnError::Runtime(RuntimeError::OutOfSpace(address)));
                }
            }
        }
        Ok(Some(commit_address))
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxnState::Active {
            return Err(TxnError::NotActive(self.state));
        }
        Ok(())
    }

    /// Map a runtime failure to the matching abort and go terminal.
    fn abort_on(&mut self, error: RuntimeError) -> TxnError {
        self.state = TxnState::Aborted;
        let cause = match &error {
            RuntimeError::Trimmed(_) => AbortCause::TrimmedRead,
            RuntimeError::WrongEpoch { .. } => AbortCause::StaleEpoch,
            RuntimeError::Network(_) | RuntimeError::ServerNotReady | RuntimeError::Timeout(_) => {
                AbortCause::NetworkFailure
            }
            _ => return TxnError::Runtime(error),
        };
        tracing::debug!("transaction aborted: {} ({})", cause, error);
        TxnError::Aborted(cause)
    }
}
