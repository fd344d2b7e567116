use std::path::Path;

use anyhow::{Context, Result, bail};
use nix::sys::statvfs::statvfs;
use tracing::info;

/// Format a byte count with binary units.
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KiB", "MiB", "GiB", "TiB", "PiB"] {
        if value < 1024.0 {
            return format!("{value:.1}{unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1}EiB")
}

/// Abort the run early when the snapshot filesystem is close to full; a
/// nightly cycle that runs out of space mid-pipeline leaves much worse state
/// than one that never starts.
pub fn check_free_space(path: &Path, min_free_percent: u8) -> Result<()> {
    let stat = statvfs(path)
        .with_context(|| format!("statvfs failed for {}", path.display()))?;

    let fragment = stat.fragment_size() as u64;
    let total = stat.blocks() as u64 * fragment;
    let free = stat.blocks_available() as u64 * fragment;
    let free_percent = if total == 0 { 0 } else { free * 100 / total };

    if free_percent < min_free_percent as u64 {
        bail!(
            "only {} ({free_percent}%) free on {}, at least {min_free_percent}% required",
            human_size(free),
            path.display()
        );
    }

    info!(
        "Free space check passed for {}: {} of {} free ({free_percent}%)",
        path.display(),
        human_size(free),
        human_size(total)
    );
    Ok(())
}
