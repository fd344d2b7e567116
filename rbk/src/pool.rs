use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use common::Account;
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info};

use crate::report::{Outcome, RunReport};

/// Fixed small cap bounding simultaneous load on both hosts; deliberately
/// not derived from CPU count.
pub const DEFAULT_WORKER_CAP: usize = 2;

/// Run every account of one partition through `job`, at most `cap` in
/// flight.
///
/// Admission is FIFO in inventory order; completions are harvested in
/// completion order into the shared report, so every admitted account ends
/// up with an elapsed time and an outcome, panicked workers included.
pub async fn run_partition<F, Fut>(
    partition: &str,
    accounts: Vec<Account>,
    cap: usize,
    report: Arc<RunReport>,
    job: F,
) where
    F: Fn(Account) -> Fut,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let cap = cap.max(1);
    let total = accounts.len();
    let mut inflight: JoinSet<(String, Duration, Outcome)> = JoinSet::new();

    for (index, account) in accounts.into_iter().enumerate() {
        while inflight.len() >= cap {
            harvest(&mut inflight, &report).await;
        }

        info!(
            "[{}/{total}] [{partition}] Processing account: {}",
            index + 1,
            account.user
        );

        let user = account.user.clone();
        let fut = job(account);
        inflight.spawn(async move {
            let start = Instant::now();
            let outcome = AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or(Outcome::Failed);
            (user, start.elapsed(), outcome)
        });
    }

    while !inflight.is_empty() {
        harvest(&mut inflight, &report).await;
    }
}

async fn harvest(
    inflight: &mut JoinSet<(String, Duration, Outcome)>,
    report: &RunReport,
) {
    match inflight.join_next().await {
        Some(Ok((user, elapsed, outcome))) => report.record(&user, elapsed, outcome),
        Some(Err(e)) => error!("Backup worker failed to join: {e}"),
        None => {}
    }
}
