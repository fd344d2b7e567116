use std::fs;
use std::path::Path;

use chrono::Utc;
use librotate::archive::{self, EvictOutcome};
use librotate::paths;
use tracing::{error, info};

use crate::exec::run_local;
use crate::run::Runtime;

/// Archive every account that was present in the newest prior generation
/// but is missing from today's.
pub async fn archive_removed_accounts(rt: &Runtime) {
    if let Err(e) = fs::create_dir_all(&rt.cfg.roots.archive) {
        error!(
            "Could not create archive root {}: {e}",
            rt.cfg.roots.archive.display()
        );
        rt.notifier
            .notify(&format!("could not create the archive root: {e}"))
            .await;
        return;
    }

    let Some(prior) = paths::lookback_path(&rt.cfg.roots.daily, &rt.ctx, None, None) else {
        error!("No prior generation found, removed-account archiving skipped");
        return;
    };
    let today = paths::today_path(&rt.cfg.roots.daily, &rt.ctx, None, None);

    // an empty listing on either side means "cannot determine", not "all
    // accounts were removed"; removed_accounts already logged it
    let Some(removed) = archive::removed_accounts(&prior, &today) else {
        return;
    };

    if !removed.is_empty() {
        info!("Found {} removed accounts to archive", removed.len());
    }
    for user in removed {
        create_account_archive(rt, &prior, &user).await;
    }
}

/// Tar up one removed account's last known snapshot content.
async fn create_account_archive(rt: &Runtime, prior: &Path, user: &str) {
    let source = prior.join(user);
    if !source.is_dir() {
        error!(
            "Archive source {} is not a directory, skipping {user}",
            source.display()
        );
        rt.notifier
            .notify(&format!("archive source for {user} is missing"))
            .await;
        return;
    }

    let name = archive::archive_file_name(&rt.cfg.archive.server_tag, user, &rt.ctx.today());
    let dest = rt.cfg.roots.archive.join(name);

    let result = run_local(&tar_cmd(&source, &dest), rt.cfg.archive.tar_timeout_secs).await;
    if !result.success {
        error!(
            "Archiving {user} from {} failed. stderr: {}",
            prior.display(),
            result.stderr
        );
        rt.notifier
            .notify(&format!("archiving removed account {user} failed"))
            .await;
    } else {
        info!("Archived removed account {user} to {}", dest.display());
    }
}

fn tar_cmd(source: &Path, dest: &Path) -> String {
    // -C parent keeps the account name as the single top-level entry;
    // unreadable files are skipped rather than failing the whole archive
    let parent = source.parent().unwrap_or(source);
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "tar czf {} --ignore-failed-read -C {} {base}",
        dest.display(),
        parent.display()
    )
}

/// Age out long-term archives, refusing entirely below the six-month floor.
pub async fn evict_outdated_archives(rt: &Runtime) {
    match archive::evict_outdated(
        &rt.cfg.roots.archive,
        rt.cfg.archive.lifetime_secs,
        Utc::now(),
    ) {
        EvictOutcome::Refused { ttl_secs } => {
            rt.notifier
                .notify(&format!(
                    "archive lifetime of {ttl_secs}s is below the six-month floor, eviction refused"
                ))
                .await;
        }
        EvictOutcome::Removed(removed) => {
            if !removed.is_empty() {
                info!("Evicted {} outdated archives", removed.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tar_cmd() {
        let cmd = tar_cmd(
            Path::new("/backup/daily/2024-03-09/carol"),
            Path::new("/backup/archive/bk1.carol.2024-03-10.tar.gz"),
        );
        assert_eq!(
            cmd,
            "tar czf /backup/archive/bk1.carol.2024-03-10.tar.gz \
             --ignore-failed-read -C /backup/daily/2024-03-09 carol"
        );
    }
}
