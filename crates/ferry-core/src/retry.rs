//! Bounded attempts with linear backoff.

use std::time::Duration;

/// Maximum number of attempts per adapter operation.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before retrying after a failed `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt))
}

/// Sleep for [`backoff_delay`] of `attempt`.
pub async fn sleep(attempt: u32) {
    tokio::time::sleep(backoff_delay(attempt)).await;
}

/// Per-call attempt counter.
///
/// Never shared between calls. [`Attempts::refund`] gives back the current
/// attempt without consuming the budget.
#[derive(Debug, Clone)]
pub struct Attempts {
    current: u32,
    max: u32,
}

impl Attempts {
    pub fn new() -> Self {
        Self::with_max(MAX_ATTEMPTS)
    }

    pub fn with_max(max: u32) -> Self {
        Self {
            current: 0,
            max: max.max(1),
        }
    }

    /// Begin the next attempt and return its 1-based number.
    pub fn start(&mut self) -> u32 {
        self.current += 1;
        self.current
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// True once the attempt in progress is the last one allowed.
    pub fn is_final(&self) -> bool {
        self.current >= self.max
    }

    /// Do not count the attempt in progress.
    pub fn refund(&mut self) {
        self.current = self.current.saturating_sub(1);
    }
}

impl Default for Attempts {
    fn default() -> Self {
        Self::new()
    }
}
