use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

/// Cheap local stages: staging pre-clean.
pub const LIGHT: RetryPolicy = RetryPolicy {
    attempts: 5,
    backoff_min_secs: 30,
    backoff_max_secs: 90,
};

/// Expensive remote transfer stages: account package, homedir sync.
pub const REMOTE: RetryPolicy = RetryPolicy {
    attempts: 5,
    backoff_min_secs: 60,
    backoff_max_secs: 180,
};

/// The whole-database stream, heaviest of all.
pub const STREAM: RetryPolicy = RetryPolicy {
    attempts: 3,
    backoff_min_secs: 120,
    backoff_max_secs: 240,
};

/// Bounded retry with randomized backoff around a soft-failing stage.
///
/// A stage signals a retryable failure by returning `Ok(false)`; an `Err` is
/// terminal and propagates immediately. Exhausting all attempts yields the
/// last `false` to the caller, which owns the escalation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
}

impl RetryPolicy {
    pub async fn run<F, Fut>(&self, stage: &str, mut op: F) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        for attempt in 1..=self.attempts {
            if op().await? {
                return Ok(true);
            }
            if attempt < self.attempts {
                let wait = rand::rng().random_range(self.backoff_min_secs..=self.backoff_max_secs);
                warn!(
                    "{stage}: attempt {attempt}/{} failed, retrying in {wait}s",
                    self.attempts
                );
                sleep(Duration::from_secs(wait)).await;
            }
        }
        Ok(false)
    }
}
