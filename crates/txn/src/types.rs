//! Transaction kinds and lifecycle states

/// Concurrency control flavor of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnType {
    /// Conflicts computed over the read set at commit time.
    #[default]
    Optimistic,
    /// Pinned read timestamp, no writes permitted.
    Snapshot,
    /// Conflicts computed over the write set only; read-read conflicts
    /// are ignored.
    WriteAfterWrite,
}

/// Lifecycle state of a transaction context.
///
/// `Active → Committing → {Committed | Aborted}`, or `Active → Aborted`
/// on explicit abort. Terminal states accept no further operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committing,
    Committed,
    Aborted,
}

impl TxnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TxnState::Active.is_terminal());
        assert!(!TxnState::Committing.is_terminal());
        assert!(TxnState::Committed.is_terminal());
        assert!(TxnState::Aborted.is_terminal());
    }
}
