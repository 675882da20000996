//! Retry and wall-clock budgets for the pipeline.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Global retry budget shared by every failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_retries: u32,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// True once no further retry may be scheduled.
    ///
    /// `retry_count >= max_retries - 1`; a zero budget is always exhausted.
    pub fn exhausted(self, retry_count: u32) -> bool {
        retry_count.saturating_add(1) >= self.max_retries
    }
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("run timed out"));
    }
    Ok(remaining)
}
