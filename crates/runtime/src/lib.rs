//! Client runtime for the skein distributed log
//!
//! The runtime handle owns the pieces every view and transaction needs:
//! a log client for reads and writes, a sequencer client for tokens, the
//! runtime settings, and the version bus that object views subscribe to.

mod events;
mod log;
mod retry;
mod runtime;
mod sequencer;
mod wire;

pub use events::{Subscription, VersionBus};
pub use log::LogClient;
pub use retry::IntervalRetry;
pub use runtime::LogRuntime;
pub use sequencer::{SequencerClient, TokenGrant};
