use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How one account's pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Suspended account, materialized purely by linking the prior snapshot.
    Linked,
    /// Package and homedir stages both succeeded.
    Full,
    /// The snapshot is viable but one stage was lost after retries.
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportEntry {
    pub elapsed_secs: u64,
    pub outcome: Outcome,
}

/// Shared run report: account → elapsed time and outcome.
///
/// Workers only ever write their own account's key, once; the map is read
/// after the join barrier.
#[derive(Debug, Default)]
pub struct RunReport {
    entries: Mutex<BTreeMap<String, ReportEntry>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, user: &str, elapsed: Duration, outcome: Outcome) {
        let mut entries = self.entries.lock().expect("report lock poisoned");
        entries.entry(user.to_string()).or_insert(ReportEntry {
            elapsed_secs: elapsed.as_secs(),
            outcome,
        });
    }

    pub fn snapshot(&self) -> BTreeMap<String, ReportEntry> {
        self.entries.lock().expect("report lock poisoned").clone()
    }

    pub fn summary(&self) -> Summary {
        let entries = self.entries.lock().expect("report lock poisoned");
        let mut summary = Summary::default();
        for entry in entries.values() {
            summary.total += 1;
            match entry.outcome {
                Outcome::Linked => summary.linked += 1,
                Outcome::Full => summary.full += 1,
                Outcome::Degraded => summary.degraded += 1,
                Outcome::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        let rendered = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, rendered)
            .with_context(|| format!("writing run report to {}", path.display()))
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct Summary {
    pub total: usize,
    pub linked: usize,
    pub full: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} accounts ({} full, {} linked, {} degraded, {} failed)",
            self.total, self.full, self.linked, self.degraded, self.failed
        )
    }
}
