use std::fs;
use std::path::{Path, PathBuf};

use common::RunContext;
use tracing::warn;

/// How far back the incremental-link search goes. Accounts backed up less
/// often than this fall back to a full copy.
pub const LOOKBACK_DAYS: u64 = 9;

fn generation_path(
    root: &Path,
    date: &str,
    user: Option<&str>,
    subdir: Option<&str>,
) -> PathBuf {
    let mut path = root.join(date);
    if let Some(user) = user {
        path.push(user);
    }
    if let Some(subdir) = subdir {
        path.push(subdir);
    }
    path
}

/// Today's snapshot path: `{root}/{today}/[{user}/][{subdir}]`.
pub fn today_path(
    root: &Path,
    ctx: &RunContext,
    user: Option<&str>,
    subdir: Option<&str>,
) -> PathBuf {
    generation_path(root, &ctx.today(), user, subdir)
}

/// The most recent existing snapshot among `{root}/{today-1}..{today-9}`,
/// scanning most-recent-first. `None` when the whole window is empty.
pub fn lookback_path(
    root: &Path,
    ctx: &RunContext,
    user: Option<&str>,
    subdir: Option<&str>,
) -> Option<PathBuf> {
    (1..=LOOKBACK_DAYS)
        .map(|days| generation_path(root, &ctx.days_back(days), user, subdir))
        .find(|path| path.is_dir())
}

/// Names of the immediate subdirectories of `path`; empty with a warning
/// when the directory is absent or unreadable.
pub fn list_dirs(path: &Path) -> Vec<String> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Directory not accessible: {}: {e}", path.display());
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect()
}

/// Names of the files in `path`, optionally filtered by a name suffix.
pub fn list_files(path: &Path, suffix: Option<&str>) -> Vec<String> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Directory not accessible: {}: {e}", path.display());
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| suffix.is_none_or(|s| name.ends_with(s)))
        .collect()
}
