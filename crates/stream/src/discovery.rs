//! Address discovery strategies
//!
//! Discovery walks the log backwards from the stream tail, pushing the
//! addresses of stream entries into the context queues until it reaches
//! the stop address. The walk reads through the log client while the
//! view lock is held.

use crate::checkpoint::CheckpointFilter;
use crate::context::StreamContext;
use crate::options::TrimPolicy;
use skein_common::{is_address, DataType, GlobalAddress, LogEntry, Result, RuntimeError, NON_EXIST};
use skein_runtime::LogClient;

/// Strategy deciding how the backward walk moves between addresses.
pub trait AddressDiscovery: Send + Sync {
    /// Walk from `start` down to (exclusive) `stop`, queueing discovered
    /// addresses in `ctx`. Returns true if anything was queued.
    fn discover_address_space(
        &self,
        log: &LogClient,
        ctx: &mut StreamContext,
        filter: &mut CheckpointFilter,
        start: GlobalAddress,
        stop: GlobalAddress,
        trim_policy: TrimPolicy,
    ) -> Result<bool>;
}

/// Visit one entry: run the checkpoint filter and queue the address.
/// Returns true if the walk should stop here.
fn visit(ctx: &mut StreamContext, filter: &mut CheckpointFilter, entry: &LogEntry) -> bool {
    if !entry.contains_stream(ctx.stream_id) {
        return false;
    }
    let op = filter.observe(entry);
    if op.includes() {
        let queue = if entry.data_type == DataType::Checkpoint {
            &mut ctx.read_cp_queue
        } else {
            &mut ctx.read_queue
        };
        queue.insert(entry.global_address);
    }
    op.stops()
}

/// Read one address during the walk, honoring the trim policy. `None`
/// means the walk hit the trimmed region and must stop.
fn read_for_walk(
    log: &LogClient,
    address: GlobalAddress,
    trim_policy: TrimPolicy,
    ctx: &StreamContext,
) -> Result<Option<LogEntry>> {
    match log.read_resolved(address) {
        Ok(entry) => Ok(Some(entry)),
        Err(RuntimeError::Trimmed(_)) if trim_policy == TrimPolicy::EndOfStream => {
            tracing::warn!(
                "ignoring trimmed address {} on stream {}",
                address,
                ctx.stream_id
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Jump via backpointers; single-step across entries that carry none.
pub struct BackpointerDiscovery;

impl AddressDiscovery for BackpointerDiscovery {
    fn discover_address_space(
        &self,
        log: &LogClient,
        ctx: &mut StreamContext,
        filter: &mut CheckpointFilter,
        start: GlobalAddress,
        stop: GlobalAddress,
        trim_policy: TrimPolicy,
    ) -> Result<bool> {
        tracing::trace!(
            "discover[{}] start={} stop={}",
            ctx.stream_id,
            start,
            stop
        );
        let before = ctx.read_queue.len() + ctx.read_cp_queue.len();
        let mut current = start;
        let mut single_stepping = false;

        while current > stop && is_address(current) {
            let Some(entry) = read_for_walk(log, current, trim_policy, ctx)? else {
                break;
            };
            if visit(ctx, filter, &entry) {
                break;
            }

            let mut single_step = true;
            if let Some(backpointer) = entry.backpointer(ctx.stream_id) {
                if is_address(backpointer) || backpointer == NON_EXIST {
                    current = backpointer;
                    single_step = false;
                    if single_stepping {
                        tracing::info!(
                            "discover[{}]: backpointer found at {}, leaving single-step scan",
                            ctx.stream_id,
                            current
                        );
                        single_stepping = false;
                    }
                }
            }
            if single_step {
                if !single_stepping {
                    single_stepping = true;
                    tracing::info!(
                        "discover[{}]: no backpointer at {}, entering single-step scan",
                        ctx.stream_id,
                        current
                    );
                }
                current -= 1;
            }
        }

        Ok(ctx.read_queue.len() + ctx.read_cp_queue.len() > before)
    }
}

/// Always single-step. Slower, but immune to damaged backpointers; the
/// output is identical to `BackpointerDiscovery`.
pub struct LinearScanDiscovery;

impl AddressDiscovery for LinearScanDiscovery {
    fn discover_address_space(
        &self,
        log: &LogClient,
        ctx: &mut StreamContext,
        filter: &mut CheckpointFilter,
        start: GlobalAddress,
        stop: GlobalAddress,
        trim_policy: TrimPolicy,
    ) -> Result<bool> {
        let before = ctx.read_queue.len() + ctx.read_cp_queue.len();
        let mut current = start;
        while current > stop && is_address(current) {
            let Some(entry) = read_for_walk(log, current, trim_policy, ctx)? else {
                break;
            };
            if visit(ctx, filter, &entry) {
                break;
            }
            current -= 1;
        }
        Ok(ctx.read_queue.len() + ctx.read_cp_queue.len() > before)
    }
}
