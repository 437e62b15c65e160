//! Client-side transactions over the skein distributed log
//!
//! Transactions are a wrapper over the sequencer and the stream views.
//! A context collects the streams a transaction reads and writes; commit
//! hands that conflict information to the sequencer with a transactional
//! token request, then writes the buffered entries at the granted
//! addresses. The context is an explicit value passed to every operation
//! rather than ambient thread state.

mod context;
mod error;
mod types;

pub use context::TxnContext;
pub use error::{Result, TxnError};
pub use types::{TxnState, TxnType};
