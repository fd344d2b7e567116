use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use common::RetentionTier;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::paths::list_dirs;

lazy_static! {
    static ref GENERATION_NAME: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
}

const SECS_PER_DAY: i64 = 86_400;

/// Collect the date-named generations under `root` that are strictly older
/// than `now - age_limit_days`.
///
/// Nothing is collected while the tier holds `min_count` generations or
/// fewer, so a thin history is never deleted no matter how old it is.
/// Names that do not look like `YYYY-MM-DD` are ignored entirely; names
/// that match the shape but do not parse as a real date are skipped with a
/// warning, never deleted.
pub fn collect_outdated(
    root: &Path,
    tier: RetentionTier,
    now: DateTime<Utc>,
) -> Vec<PathBuf> {
    let generations: Vec<String> = list_dirs(root)
        .into_iter()
        .filter(|name| GENERATION_NAME.is_match(name))
        .collect();

    if generations.len() as i64 <= tier.min_count {
        debug!(
            "{}: {} generations at or below the floor of {}, cleanup skipped",
            root.display(),
            generations.len(),
            tier.min_count
        );
        return Vec::new();
    }

    let cutoff = now.timestamp() - tier.age_limit_days * SECS_PER_DAY;
    let mut outdated = Vec::new();

    for name in generations {
        match NaiveDate::parse_from_str(&name, "%Y-%m-%d") {
            Ok(date) => {
                let stamp = date.and_time(NaiveTime::MIN).and_utc().timestamp();
                if stamp < cutoff {
                    outdated.push(root.join(&name));
                }
            }
            Err(e) => warn!("Could not parse generation date '{name}': {e}"),
        }
    }

    outdated
}
