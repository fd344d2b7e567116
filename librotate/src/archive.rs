use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};

use crate::paths::{list_dirs, list_files};

/// Configured archive lifetimes below six months are treated as a
/// misconfiguration and refuse the whole eviction pass.
pub const MIN_ARCHIVE_TTL_SECS: i64 = 15_778_463;

lazy_static! {
    static ref ARCHIVE_NAME: Regex =
        Regex::new(r"^\w+\.\w+\.(\d{4}-\d{2}-\d{2})\.tar\.gz$").unwrap();
}

/// `{tag}.{user}.{date}.tar.gz`
pub fn archive_file_name(tag: &str, user: &str, date: &str) -> String {
    format!("{tag}.{user}.{date}.tar.gz")
}

/// Only names of this exact shape are ever touched by eviction.
pub fn is_archive_name(name: &str) -> bool {
    ARCHIVE_NAME.is_match(name)
}

/// The date embedded in a well-formed archive name.
pub fn archive_date(name: &str) -> Option<NaiveDate> {
    let captures = ARCHIVE_NAME.captures(name)?;
    NaiveDate::parse_from_str(&captures[1], "%Y-%m-%d").ok()
}

/// Accounts present in the previous generation but missing from the current
/// one. `None` when either listing is empty: an empty side means "cannot
/// determine", not "everything was removed".
pub fn removed_accounts(previous: &Path, current: &Path) -> Option<BTreeSet<String>> {
    let previous_users: BTreeSet<String> = list_dirs(previous).into_iter().collect();
    let current_users: BTreeSet<String> = list_dirs(current).into_iter().collect();

    if previous_users.is_empty() || current_users.is_empty() {
        error!(
            "No accounts found in one of the generations, diff abandoned. {}: {} {}: {}",
            previous.display(),
            previous_users.len(),
            current.display(),
            current_users.len()
        );
        return None;
    }

    Some(&previous_users - &current_users)
}

#[derive(Debug, PartialEq, Eq)]
pub enum EvictOutcome {
    /// The configured lifetime was below the safety floor; nothing was
    /// deleted and the caller should escalate.
    Refused { ttl_secs: i64 },
    Removed(Vec<PathBuf>),
}

/// Delete well-named archives under `root` whose embedded date is older than
/// `now - ttl_secs`. The whole pass is refused when `ttl_secs` is below the
/// six-month floor.
pub fn evict_outdated(root: &Path, ttl_secs: i64, now: DateTime<Utc>) -> EvictOutcome {
    if ttl_secs < MIN_ARCHIVE_TTL_SECS {
        error!(
            "Archive lifetime of {ttl_secs}s is below the six-month floor ({MIN_ARCHIVE_TTL_SECS}s), eviction refused"
        );
        return EvictOutcome::Refused { ttl_secs };
    }

    let cutoff = now.timestamp() - ttl_secs;
    let mut removed = Vec::new();

    for name in list_files(root, Some(".tar.gz")) {
        let Some(date) = archive_date(&name) else {
            continue;
        };
        let stamp = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        if stamp < cutoff {
            let path = root.join(&name);
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed outdated archive {}", path.display());
                    removed.push(path);
                }
                Err(e) => warn!("Could not remove archive {}: {e}", path.display()),
            }
        }
    }

    EvictOutcome::Removed(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_archive_name_round_trip() {
        let name = archive_file_name("srv", "bob", "2024-03-01");
        assert_eq!(name, "srv.bob.2024-03-01.tar.gz");
        assert!(is_archive_name(&name));
        assert_eq!(
            archive_date(&name),
            Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
    }

    #[test]
    fn test_archive_name_pattern_is_strict() {
        assert!(!is_archive_name("srv.bob.tar.gz"));
        assert!(!is_archive_name("srv.bob.2024-3-1.tar.gz"));
        assert!(!is_archive_name("srv.bob.2024-03-01.tar"));
        assert!(!is_archive_name("srv.bob.2024-03-01.tar.gz.tmp"));
        assert!(!is_archive_name("srv.2024-03-01.tar.gz"));
    }

    #[test]
    fn test_removed_accounts_diff() {
        let prev = tempdir().unwrap();
        let cur = tempdir().unwrap();
        for user in ["a", "b", "c"] {
            fs::create_dir(prev.path().join(user)).unwrap();
        }
        for user in ["a", "c"] {
            fs::create_dir(cur.path().join(user)).unwrap();
        }

        let removed = removed_accounts(prev.path(), cur.path()).unwrap();
        assert_eq!(removed.into_iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_empty_listing_is_undetermined() {
        let prev = tempdir().unwrap();
        let cur = tempdir().unwrap();
        for user in ["a", "b", "c"] {
            fs::create_dir(prev.path().join(user)).unwrap();
        }

        // an empty current listing must not read as "all accounts removed"
        assert_eq!(removed_accounts(prev.path(), cur.path()), None);
        assert_eq!(removed_accounts(cur.path(), prev.path()), None);
    }

    #[test]
    fn test_eviction_refuses_short_ttl() {
        let dir = tempdir().unwrap();
        for name in ["srv.bob.2001-01-01.tar.gz", "srv.eve.2002-02-02.tar.gz"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let outcome = evict_outdated(dir.path(), 1000, now);
        assert_eq!(outcome, EvictOutcome::Refused { ttl_secs: 1000 });
        // ancient archives survive a refused pass untouched
        assert!(dir.path().join("srv.bob.2001-01-01.tar.gz").exists());
        assert!(dir.path().join("srv.eve.2002-02-02.tar.gz").exists());
    }

    #[test]
    fn test_eviction_removes_only_old_well_named_archives() {
        let dir = tempdir().unwrap();
        let old = "srv.bob.2020-01-01.tar.gz";
        let fresh = "srv.eve.2024-03-01.tar.gz";
        let odd = "srv.bob.tar.gz";
        for name in [old, fresh, odd] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let outcome = evict_outdated(dir.path(), MIN_ARCHIVE_TTL_SECS, now);

        assert_eq!(outcome, EvictOutcome::Removed(vec![dir.path().join(old)]));
        assert!(!dir.path().join(old).exists());
        assert!(dir.path().join(fresh).exists());
        assert!(dir.path().join(odd).exists());
    }
}
