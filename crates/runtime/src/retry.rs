//! Fixed-interval retry
//!
//! Re-runs a fallible operation at a fixed interval while it fails
//! transiently. Logical failures pass through untouched on the first
//! occurrence.

use skein_common::{Result, RuntimeError};
use std::time::Duration;

/// A basic interval-based retry policy.
#[derive(Debug, Clone, Copy)]
pub struct IntervalRetry {
    interval: Duration,
    max_attempts: u32,
}

impl IntervalRetry {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `f`, sleeping `interval` between attempts, until it succeeds,
    /// fails non-transiently, or the attempt budget runs out.
    pub fn run<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    attempt += 1;
                    tracing::debug!("retrying after transient failure: {}", e);
                    std::thread::sleep(self.interval);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = IntervalRetry::new(Duration::ZERO, 5).run(|| {
            calls += 1;
            if calls < 3 {
                Err(RuntimeError::ServerNotReady)
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_logical_failure_is_not_retried() {
        let mut calls = 0;
        let result: Result<()> = IntervalRetry::new(Duration::ZERO, 5).run(|| {
            calls += 1;
            Err(RuntimeError::Trimmed(4))
        });
        assert_eq!(result, Err(RuntimeError::Trimmed(4)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_budget_exhaustion_returns_last_error() {
        let mut calls = 0;
        let result: Result<()> = IntervalRetry::new(Duration::ZERO, 3).run(|| {
            calls += 1;
            Err(RuntimeError::ServerNotReady)
        });
        assert_eq!(result, Err(RuntimeError::ServerNotReady));
        assert_eq!(calls, 3);
    }
}
