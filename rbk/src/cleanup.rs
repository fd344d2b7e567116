use std::path::PathBuf;

use chrono::{DateTime, Utc};
use common::RetentionTier;
use librotate::retention::collect_outdated;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::exec::spawn_detached;
use crate::run::Runtime;

/// Union the outdated generations across every tier.
pub fn collect_all_outdated(cfg: &Config, now: DateTime<Utc>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    dirs.extend(collect_outdated(&cfg.roots.db_dump, cfg.retention.db_dump, now));
    // staging generations are transient, every one is always eligible
    dirs.extend(collect_outdated(&cfg.roots.staging, RetentionTier::REMOVE_ALL, now));
    dirs.extend(collect_outdated(&cfg.roots.daily, cfg.retention.daily, now));
    dirs.extend(collect_outdated(&cfg.roots.weekly(), cfg.retention.weekly, now));
    dirs.extend(collect_outdated(&cfg.roots.monthly(), cfg.retention.monthly, now));
    dirs
}

/// Delete the collected generations in one detached batch.
///
/// Permission bits inherited through hardlinks can block the delete, so the
/// script removes, repairs owner permissions once, and removes again. The
/// repair round happens exactly once, never in a loop, and the whole batch
/// runs nohup'd so a huge delete cannot stall the rest of the run.
pub async fn cleanup_outdated_backups(rt: &Runtime) {
    let dirs = collect_all_outdated(&rt.cfg, Utc::now());
    if dirs.is_empty() {
        debug!("No outdated generations to remove");
        return;
    }

    let list = dirs
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    info!("Removing outdated generations: {list}");

    let script = removal_script(&list);
    let log_path = rt.cfg.log_dir.join("remove_error.log");
    if !spawn_detached(&script, &log_path).await {
        error!("Could not launch the detached removal batch");
    }
}

fn removal_script(list: &str) -> String {
    let remove = format!("/bin/ionice -c3 /bin/rm -rf {list}");
    let fix_dirs = format!(
        "/bin/find {list} -type d \\( ! -perm -200 -o ! -perm -100 \\) -exec chmod u+rwx {{}} +"
    );
    let fix_files = format!("/bin/find {list} -type f ! -perm -200 -exec chmod u+rw {{}} +");
    format!("{remove}; {fix_dirs}; {fix_files}; {remove}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_removal_script_repairs_then_retries_once() {
        let script = removal_script("/backup/daily/2024-01-01 /backup/upload/2024-03-10");

        assert_eq!(
            script.matches("/bin/ionice -c3 /bin/rm -rf").count(),
            2,
            "delete must run before and after the single repair round"
        );
        assert!(script.contains("-type d \\( ! -perm -200 -o ! -perm -100 \\) -exec chmod u+rwx"));
        assert!(script.contains("-type f ! -perm -200 -exec chmod u+rw"));
    }

    #[test]
    fn test_collect_all_outdated_spans_tiers() {
        let root = tempdir().unwrap();
        let daily = root.path().join("daily");
        let staging = root.path().join("upload");
        fs::create_dir_all(daily.join("2020-01-01")).unwrap();
        fs::create_dir_all(staging.join("2024-03-09")).unwrap();
        fs::create_dir_all(staging.join("2024-03-10")).unwrap();

        let yaml = format!(
            r#"
remote: {{ host: prod }}
roots:
  daily: {daily}
  staging: {staging}
  archive: {root}/archive
  db_dump: {root}/mysql
archive: {{ server_tag: bk1, lifetime_secs: 31556926 }}
retention:
  daily: {{ age_limit_days: 5, min_count: 0 }}
staging: {{ endpoint: backup, export: {staging}, mount_dir: /mnt/upload }}
inventory: {{ list_command: list-accounts }}
"#,
            daily = daily.display(),
            staging = staging.display(),
            root = root.path().display(),
        );
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let mut dirs = collect_all_outdated(&cfg, now);
        dirs.sort();

        // the old daily generation plus every staging generation, fresh or not
        assert_eq!(
            dirs,
            vec![
                daily.join("2020-01-01"),
                staging.join("2024-03-09"),
                staging.join("2024-03-10"),
            ]
        );
    }
}
