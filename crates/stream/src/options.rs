//! Per-view options

/// What a view does when it reads a garbage-collected address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimPolicy {
    /// Surface the trim to the caller.
    #[default]
    Propagate,
    /// Treat the trimmed region as the end of the stream: discovery stops
    /// there and `next` yields nothing past it.
    EndOfStream,
}

/// How the view discovers the addresses of its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryMode {
    /// Follow backpointers, downgrading to a single-step scan where they
    /// are missing.
    #[default]
    Backpointer,
    /// Always single-step. Produces the same output as backpointers.
    LinearScan,
}

/// Options fixed at view creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    pub trim_policy: TrimPolicy,
    pub discovery: DiscoveryMode,
}

impl StreamOptions {
    pub const DEFAULT: StreamOptions = StreamOptions {
        trim_policy: TrimPolicy::Propagate,
        discovery: DiscoveryMode::Backpointer,
    };

    /// Convert trims into end-of-stream instead of surfacing them.
    pub fn ignore_trimmed(mut self) -> Self {
        self.trim_policy = TrimPolicy::EndOfStream;
        self
    }

    /// Force the pure linear scan strategy.
    pub fn without_backpointers(mut self) -> Self {
        self.discovery = DiscoveryMode::LinearScan;
        self
    }
}
