//! The queued stream view
//!
//! An ordered, per-stream iterator over the globally ordered log. All
//! mutators run under the per-view lock; log reads happen while holding
//! it, so callers must not re-enter the same view from callbacks.

use crate::checkpoint::CheckpointFilter;
use crate::context::StreamContext;
use crate::discovery::{AddressDiscovery, BackpointerDiscovery, LinearScanDiscovery};
use crate::options::{DiscoveryMode, StreamOptions, TrimPolicy};
use parking_lot::Mutex;
use skein_common::{
    is_address, DataType, GlobalAddress, LogEntry, Result, RuntimeError, StreamId, MAX_ADDRESS,
    NEVER_READ, NON_ADDRESS, NOT_FOUND,
};
use skein_runtime::{LogClient, LogRuntime, SequencerClient, VersionBus};
use std::sync::Arc;

/// Direction of a `find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    ForwardInclusive,
    Backward,
    BackwardInclusive,
}

impl SearchDirection {
    fn is_forward(self) -> bool {
        matches!(
            self,
            SearchDirection::Forward | SearchDirection::ForwardInclusive
        )
    }

    fn is_inclusive(self) -> bool {
        matches!(
            self,
            SearchDirection::ForwardInclusive | SearchDirection::BackwardInclusive
        )
    }
}

/// A view of one stream, implemented over a queue of candidate addresses.
pub struct QueuedStreamView {
    stream_id: StreamId,
    options: StreamOptions,
    log: Arc<LogClient>,
    sequencer: SequencerClient,
    version_bus: VersionBus,
    discovery: Box<dyn AddressDiscovery>,
    state: Mutex<StreamContext>,
}

impl QueuedStreamView {
    /// Create a view of `stream_id` over the runtime's log.
    pub fn new(runtime: &LogRuntime, stream_id: StreamId, options: StreamOptions) -> Self {
        let discovery: Box<dyn AddressDiscovery> = match options.discovery {
            DiscoveryMode::Backpointer => Box::new(BackpointerDiscovery),
            DiscoveryMode::LinearScan => Box::new(LinearScanDiscovery),
        };
        Self {
            stream_id,
            options,
            log: Arc::clone(runtime.log()),
            sequencer: runtime.sequencer().clone(),
            version_bus: runtime.version_bus().clone(),
            discovery,
            state: Mutex::new(StreamContext::new(stream_id)),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// The address of the last entry surfaced, or `NEVER_READ`.
    pub fn position(&self) -> GlobalAddress {
        self.state.lock().global_pointer
    }

    /// The next stream entry, if any exists yet.
    pub fn next(&self) -> Result<Option<LogEntry>> {
        self.next_up_to(MAX_ADDRESS)
    }

    /// The next stream entry at or below `max_global`.
    pub fn next_up_to(&self, max_global: GlobalAddress) -> Result<Option<LogEntry>> {
        let mut ctx = self.state.lock();
        self.next_locked(&mut ctx, max_global)
    }

    /// Every remaining entry up to and including `max_global`.
    pub fn remaining_up_to(&self, max_global: GlobalAddress) -> Result<Vec<LogEntry>> {
        let mut ctx = self.state.lock();
        self.drain_locked(&mut ctx, max_global)
    }

    /// Bulk variant of `next`: resolve everything up to `max_global` with
    /// one parallel read. If `context_fn` matches an entry, the batch is
    /// cut off just after it.
    pub fn next_batch(
        &self,
        max_global: GlobalAddress,
        context_fn: Option<&dyn Fn(&LogEntry) -> bool>,
    ) -> Result<Vec<LogEntry>> {
        let mut ctx = self.state.lock();
        if !self.fill_read_queue(&mut ctx, max_global)? {
            return Ok(Vec::new());
        }
        match ctx.read_queue.iter().next() {
            Some(&first) if first <= max_global => {}
            _ => return Ok(Vec::new()),
        }

        let selected: Vec<GlobalAddress> =
            ctx.read_queue.range(..=max_global).copied().collect();
        let entries = match self.log.read_all(&selected) {
            Err(RuntimeError::Trimmed(address))
                if self.options.trim_policy == TrimPolicy::EndOfStream =>
            {
                tracing::warn!(
                    "next_batch[{}]: ignoring trimmed address {}",
                    self.stream_id,
                    address
                );
                return Ok(Vec::new());
            }
            other => other?,
        };

        let mut batch: Vec<LogEntry> = entries
            .into_iter()
            .filter(|e| e.data_type == DataType::Data && e.contains_stream(self.stream_id))
            .collect();

        let mut context_switched = false;
        if let Some(context_fn) = context_fn {
            if let Some(pos) = batch.iter().position(|e| context_fn(e)) {
                tracing::trace!(
                    "next_batch[{}]: context switch at {}",
                    self.stream_id,
                    batch[pos].global_address
                );
                batch.truncate(pos + 1);
                context_switched = true;
            }
        }

        // Consume the addresses this batch covered; on a context switch
        // everything past the switch entry stays queued.
        let consumed_up_to = if context_switched {
            batch.last().map(|e| e.global_address).unwrap_or(max_global)
        } else {
            max_global
        };
        for address in selected {
            if address <= consumed_up_to {
                ctx.read_queue.remove(&address);
            }
        }

        for entry in &batch {
            ctx.add_to_resolved(entry.global_address);
        }
        if let Some(last) = batch.last() {
            ctx.global_pointer = last.global_address;
            self.version_bus.publish(last.global_address);
        }
        Ok(batch)
    }

    /// Step back to the entry preceding the current position.
    pub fn previous(&self) -> Result<Option<LogEntry>> {
        let mut ctx = self.state.lock();
        tracing::trace!(
            "previous[{}] max={} min={}",
            self.stream_id,
            ctx.max_resolution,
            ctx.min_resolution
        );
        if ctx.global_pointer == NEVER_READ {
            return Ok(None);
        }

        let mut prev = resolved_below(&ctx, ctx.global_pointer);
        // If the candidate sits at or below the resolution floor, the
        // addresses underneath may never have been discovered. Re-resolve
        // down to the floor, then retry.
        if (prev.is_none() && ctx.min_resolution != NON_ADDRESS)
            || prev.is_some_and(|p| p <= ctx.min_resolution)
        {
            let old_pointer = ctx.global_pointer;
            ctx.global_pointer = match prev {
                Some(p) => p - 1,
                None => NEVER_READ,
            };
            let floor = ctx.min_resolution;
            ctx.min_resolution = NON_ADDRESS;
            self.drain_locked(&mut ctx, floor)?;
            ctx.global_pointer = old_pointer;
            prev = resolved_below(&ctx, ctx.global_pointer);
        }

        let Some(prev) = prev else {
            return Ok(None);
        };
        // Requeue the current position so forward iteration resumes here.
        let current = ctx.global_pointer;
        ctx.read_queue.insert(current);
        ctx.global_pointer = prev;
        self.read_entry(prev)
    }

    /// The entry at the current position, or `None` before the first
    /// `next`.
    pub fn current(&self) -> Result<Option<LogEntry>> {
        let ctx = self.state.lock();
        if ctx.global_pointer == NEVER_READ {
            return Ok(None);
        }
        self.read_entry(ctx.global_pointer)
    }

    /// Search the resolved address space around `global_address`. Returns
    /// `NOT_FOUND` if nothing matches.
    pub fn find(
        &self,
        global_address: GlobalAddress,
        direction: SearchDirection,
    ) -> Result<GlobalAddress> {
        let mut ctx = self.state.lock();
        if ctx.max_resolution < global_address {
            self.drain_locked(&mut ctx, global_address + 1)?;
        }
        if direction.is_inclusive() && ctx.resolved_queue.contains(&global_address) {
            return Ok(global_address);
        }
        let found = if direction.is_forward() {
            ctx.resolved_queue
                .range(global_address + 1..)
                .next()
                .copied()
        } else {
            resolved_below(&ctx, global_address)
        };
        Ok(found.unwrap_or(NOT_FOUND))
    }

    /// Move the position so the next entry surfaced is the first stream
    /// entry at or above `global_address`.
    pub fn seek(&self, global_address: GlobalAddress) {
        self.state.lock().seek(global_address);
    }

    /// Forget all iteration state.
    pub fn reset(&self) {
        self.state.lock().reset();
    }

    fn next_locked(
        &self,
        ctx: &mut StreamContext,
        max_global: GlobalAddress,
    ) -> Result<Option<LogEntry>> {
        if ctx.read_queue.is_empty()
            && ctx.read_cp_queue.is_empty()
            && !self.fill_read_queue(ctx, max_global)?
        {
            return Ok(None);
        }

        // Checkpoint records drain first. They do not enter the resolved
        // queue; once the whole sequence has drained the pointer jumps to
        // the checkpoint end so the subsumed prefix is never re-walked.
        if let Some(&cp_address) = ctx.read_cp_queue.iter().next() {
            ctx.read_cp_queue.remove(&cp_address);
            let entry = self.read_entry(cp_address)?;
            if ctx.read_cp_queue.is_empty() && ctx.read_queue.is_empty() {
                if let Some(checkpoint) = &ctx.checkpoint {
                    ctx.global_pointer = ctx.global_pointer.max(checkpoint.end_address);
                }
            }
            return Ok(entry);
        }

        while let Some(&address) = ctx.read_queue.iter().next() {
            if address > max_global {
                return Ok(None);
            }
            ctx.read_queue.remove(&address);
            let Some(entry) = self.read_entry(address)? else {
                return Ok(None);
            };
            if entry.contains_stream(self.stream_id) {
                ctx.global_pointer = address;
                ctx.add_to_resolved(address);
                self.version_bus.publish(address);
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn drain_locked(
        &self,
        ctx: &mut StreamContext,
        max_global: GlobalAddress,
    ) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_locked(ctx, max_global)? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Discover candidate addresses up to the stream tail. Returns true
    /// if either queue holds anything afterwards.
    fn fill_read_queue(&self, ctx: &mut StreamContext, max_global: GlobalAddress) -> Result<bool> {
        let token = self.sequencer.token_query([self.stream_id])?;
        let tail = token.tail_for(self.stream_id);
        tracing::trace!(
            "fill[{}] tail={} pointer={} max_global={}",
            self.stream_id,
            tail,
            ctx.global_pointer,
            max_global
        );
        if !is_address(tail) || tail <= ctx.global_pointer {
            return Ok(self.queues_nonempty(ctx));
        }
        // Everything up to the tail has been discovered already; whatever
        // should be re-surfaced is in the read queue.
        if tail <= ctx.max_resolution {
            return Ok(self.queues_nonempty(ctx));
        }

        let stop = ctx.global_pointer.max(
            ctx.checkpoint
                .map(|c| c.start_address)
                .unwrap_or(NON_ADDRESS),
        );
        let mut filter = CheckpointFilter::new(ctx.checkpoint);
        self.discovery.discover_address_space(
            &self.log,
            ctx,
            &mut filter,
            tail,
            stop,
            self.options.trim_policy,
        )?;

        if ctx.checkpoint.is_none() {
            if let Some(success) = filter.take_success() {
                tracing::debug!(
                    "fill[{}]: checkpoint {} wins, snapshot at {}",
                    self.stream_id,
                    success.id,
                    success.snapshot_address
                );
                ctx.checkpoint = Some(success);
            } else if filter.saw_partial() {
                // The sequence never completed; its records must not be
                // drained as a checkpoint.
                ctx.read_cp_queue.clear();
            }
        }
        Ok(self.queues_nonempty(ctx))
    }

    fn queues_nonempty(&self, ctx: &StreamContext) -> bool {
        !ctx.read_queue.is_empty() || !ctx.read_cp_queue.is_empty()
    }

    /// Read an address through the view's trim policy. `None` means the
    /// address was trimmed and the policy treats that as end-of-stream.
    fn read_entry(&self, address: GlobalAddress) -> Result<Option<LogEntry>> {
        match self.log.read_resolved(address) {
            Ok(entry) => Ok(Some(entry)),
            Err(RuntimeError::Trimmed(_))
                if self.options.trim_policy == TrimPolicy::EndOfStream =>
            {
                tracing::warn!(
                    "read[{}]: address {} trimmed, treating as end of stream",
                    self.stream_id,
                    address
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn resolved_below(ctx: &StreamContext, bound: GlobalAddress) -> Option<GlobalAddress> {
    ctx.resolved_queue.range(..bound).next_back().copied()
}
