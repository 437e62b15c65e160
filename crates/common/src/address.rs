//! Global address primitives
//!
//! Every slot in the shared log is identified by a 64-bit global address
//! assigned by the sequencer. Negative values are reserved sentinels and
//! never name a log slot.

/// A sequencer-assigned ordinal of a log slot.
pub type GlobalAddress = i64;

/// A pointer that has not read anything yet.
pub const NEVER_READ: GlobalAddress = -1;

/// Backpointer value marking the start of a stream.
pub const NON_EXIST: GlobalAddress = -2;

/// Search result when no matching address exists.
pub const NOT_FOUND: GlobalAddress = -3;

/// A value that is known not to be an address at all.
pub const NON_ADDRESS: GlobalAddress = -4;

/// The largest possible address, used as the "no upper bound" argument.
pub const MAX_ADDRESS: GlobalAddress = i64::MAX;

/// True iff `x` names an actual log slot.
pub fn is_address(x: GlobalAddress) -> bool {
    x >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_not_addresses() {
        for sentinel in [NEVER_READ, NON_EXIST, NOT_FOUND, NON_ADDRESS] {
            assert!(!is_address(sentinel));
        }
    }

    #[test]
    fn test_sentinels_are_distinct() {
        let mut values = [NEVER_READ, NON_EXIST, NOT_FOUND, NON_ADDRESS];
        values.sort_unstable();
        values.windows(2).for_each(|w| assert_ne!(w[0], w[1]));
    }

    #[test]
    fn test_zero_is_an_address() {
        assert!(is_address(0));
        assert!(is_address(MAX_ADDRESS));
    }
}
