use std::path::Path;

use anyhow::Result;
use common::Account;
use librotate::paths::{self, LOOKBACK_DAYS};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::exec::{RemoteHost, run_local};
use crate::report::Outcome;
use crate::retry;
use crate::run::Runtime;

/// Run one account's full pipeline. Failures never escape: whatever happens
/// inside is logged, notified and folded into the outcome, so one account
/// can never abort its siblings.
pub async fn run_account_backup(rt: &Runtime, account: &Account) -> Outcome {
    let start = Instant::now();
    debug!("Account backup started for {}", account.user);

    let outcome = match backup_account(rt, account).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Account backup failed for {}: {e:#}", account.user);
            rt.notifier
                .notify(&format!("account backup for {} failed: {e:#}", account.user))
                .await;
            Outcome::Failed
        }
    };

    debug!(
        "Account backup finished for {} in {:.0?}",
        account.user,
        start.elapsed()
    );
    outcome
}

async fn backup_account(rt: &Runtime, account: &Account) -> Result<Outcome> {
    // A suspended account is assumed static: yesterday's snapshot linked
    // forward is the whole backup. When that is impossible the account
    // falls through to the regular path.
    if account.suspended && link_suspended(rt, account).await? {
        return Ok(Outcome::Linked);
    }

    let package_ok = retry::REMOTE
        .run("package stage", || package_account(rt, account))
        .await?;
    if package_ok {
        link_package_into_daily(rt, account).await?;
    } else {
        warn!(
            "Package stage lost for {} after retries, continuing with homedir sync",
            account.user
        );
    }

    // Homedir data is independently valuable, so this stage runs even after
    // a lost package stage.
    let homedir_ok = retry::REMOTE
        .run("homedir sync", || sync_homedir(rt, account))
        .await?;

    Ok(match (package_ok, homedir_ok) {
        (true, true) => Outcome::Full,
        (false, false) => Outcome::Failed,
        _ => Outcome::Degraded,
    })
}

/// Materialize today's snapshot for a suspended account purely by linking
/// against its most recent prior snapshot, with delete-mirroring.
async fn link_suspended(rt: &Runtime, account: &Account) -> Result<bool> {
    let Some(prior) =
        paths::lookback_path(&rt.cfg.roots.daily, &rt.ctx, Some(&account.user), None)
    else {
        warn!(
            "No snapshot within {LOOKBACK_DAYS} days to link suspended account {} from",
            account.user
        );
        return Ok(false);
    };

    let dest = paths::today_path(&rt.cfg.roots.daily, &rt.ctx, Some(&account.user), None);
    let result = run_local(
        &suspended_link_cmd(&prior, &dest),
        rt.cfg.pipeline.link_timeout_secs,
    )
    .await;

    if !result.tolerated(&rt.cfg.pipeline.suspended_tolerated_codes) {
        error!(
            "Suspended link for {} failed. stdout: {} stderr: {}",
            account.user, result.stdout, result.stderr
        );
        rt.notifier
            .notify(&format!(
                "suspended link for {} failed: {}",
                account.user, result.stderr
            ))
            .await;
        return Ok(false);
    }
    Ok(true)
}

fn suspended_link_cmd(prior: &Path, dest: &Path) -> String {
    format!(
        "rsync -a --delete --link-dest={prior} {prior}/ {dest}/",
        prior = prior.display(),
        dest = dest.display()
    )
}

/// Remove stale staging data for the account before a package attempt; a
/// leftover from a failed night would poison the incremental link.
async fn pre_clean_staging(rt: &Runtime, account: &Account) -> Result<bool> {
    let target = paths::today_path(&rt.cfg.roots.staging, &rt.ctx, Some(&account.user), None);
    let result = run_local(
        &format!("/bin/rm -rf {}", target.display()),
        rt.cfg.pipeline.preclean_timeout_secs,
    )
    .await;

    if !result.success {
        error!(
            "Staging pre-clean for {} failed. stdout: {} stderr: {}",
            account.user, result.stdout, result.stderr
        );
        rt.notifier
            .notify(&format!(
                "staging pre-clean for {} failed: {}",
                account.user, result.stderr
            ))
            .await;
        return Ok(false);
    }
    Ok(true)
}

/// Produce the account package on the production host, writing into the
/// staging export mounted there.
async fn package_account(rt: &Runtime, account: &Account) -> Result<bool> {
    retry::LIGHT
        .run("staging pre-clean", || pre_clean_staging(rt, account))
        .await?;

    let dest = format!("{}/{}/", rt.cfg.staging.mount_dir.display(), rt.ctx.today());
    let timeout = rt.cfg.pipeline.package_timeout_secs;
    let command = format!(
        "/bin/timeout {timeout} {}",
        package_cmd(&rt.cfg.pipeline.package_command, &account.user, &dest)
    );
    let result = rt.cfg.remote.run(&command, timeout).await;

    if !result.success {
        error!(
            "Package stage for {} failed. stdout: {} stderr: {}",
            account.user, result.stdout, result.stderr
        );
        rt.notifier
            .notify(&format!(
                "package stage for {} failed: {}",
                account.user, result.stderr
            ))
            .await;
        return Ok(false);
    }

    info!("Package stage finished for {}", account.user);
    Ok(true)
}

fn package_cmd(template: &str, user: &str, dest: &str) -> String {
    template.replace("{user}", user).replace("{dest}", dest)
}

/// Move the staged package into the permanent daily tree, hardlinking
/// unchanged files against yesterday's generation. The homedir subtree is
/// excluded here, it has its own stage.
async fn link_package_into_daily(rt: &Runtime, account: &Account) -> Result<()> {
    let link_dest = rt
        .cfg
        .roots
        .daily
        .join(rt.ctx.days_back(1))
        .join(&account.user);
    let src = paths::today_path(&rt.cfg.roots.staging, &rt.ctx, Some(&account.user), None);
    let dest = paths::today_path(&rt.cfg.roots.daily, &rt.ctx, Some(&account.user), None);

    let result = run_local(
        &package_link_cmd(&link_dest, &src, &dest),
        rt.cfg.pipeline.link_timeout_secs,
    )
    .await;

    if !result.success {
        error!(
            "Package link for {} failed. stdout: {} stderr: {}",
            account.user, result.stdout, result.stderr
        );
        rt.notifier
            .notify(&format!(
                "package link for {} failed: {}",
                account.user, result.stderr
            ))
            .await;
    } else {
        info!("Package link finished for {}", account.user);
    }
    Ok(())
}

fn package_link_cmd(link_dest: &Path, src: &Path, dest: &Path) -> String {
    format!(
        "rsync -rlpgoD -c --delete --link-dest={} --exclude=homedir {}/ {}/",
        link_dest.display(),
        src.display(),
        dest.display()
    )
}

/// Pull the account's home directory straight from production into today's
/// snapshot, linked against the nearest prior homedir generation.
async fn sync_homedir(rt: &Runtime, account: &Account) -> Result<bool> {
    let link_dest = paths::lookback_path(
        &rt.cfg.roots.daily,
        &rt.ctx,
        Some(&account.user),
        Some("homedir"),
    );
    let exclude_from = rt.cfg.pipeline.exclude_from.get(&account.user);
    let dest = paths::today_path(
        &rt.cfg.roots.daily,
        &rt.ctx,
        Some(&account.user),
        Some("homedir"),
    );

    let command = homedir_sync_cmd(
        &rt.cfg.remote,
        account,
        link_dest.as_deref(),
        exclude_from.map(|p| p.as_path()),
        &dest,
    );
    let result = run_local(&command, rt.cfg.pipeline.homedir_timeout_secs).await;

    if !result.tolerated(&rt.cfg.pipeline.homedir_tolerated_codes) {
        error!(
            "Homedir sync for {} failed. stdout: {} stderr: {}",
            account.user, result.stdout, result.stderr
        );
        rt.notifier
            .notify(&format!(
                "homedir sync for {} failed: {}",
                account.user, result.stderr
            ))
            .await;
        return Ok(false);
    }
    Ok(true)
}

fn homedir_sync_cmd(
    remote: &RemoteHost,
    account: &Account,
    link_dest: Option<&Path>,
    exclude_from: Option<&Path>,
    dest: &Path,
) -> String {
    let exclude = exclude_from
        .map(|p| format!("--exclude-from={} ", p.display()))
        .unwrap_or_default();
    let link = link_dest
        .map(|p| format!("--link-dest={} ", p.display()))
        .unwrap_or_default();
    format!(
        "/usr/bin/rsync -a --delete -e '{transport}' {exclude}{link}{host}:/{partition}/{user}/ {dest}/",
        transport = remote.rsync_transport(),
        host = remote.host,
        partition = account.partition,
        user = account.user,
        dest = dest.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            user: "bob".into(),
            partition: "home2".into(),
            suspended: false,
            uid: 1001,
        }
    }

    #[test]
    fn test_suspended_link_cmd() {
        let cmd = suspended_link_cmd(
            Path::new("/backup/daily/2024-03-09/bob"),
            Path::new("/backup/daily/2024-03-10/bob"),
        );
        assert_eq!(
            cmd,
            "rsync -a --delete --link-dest=/backup/daily/2024-03-09/bob \
             /backup/daily/2024-03-09/bob/ /backup/daily/2024-03-10/bob/"
        );
    }

    #[test]
    fn test_package_cmd_template() {
        let cmd = package_cmd(
            "/usr/local/cpanel/scripts/pkgacct --backup --incremental {user} {dest}",
            "bob",
            "/mnt/backup-upload/2024-03-10/",
        );
        assert_eq!(
            cmd,
            "/usr/local/cpanel/scripts/pkgacct --backup --incremental bob \
             /mnt/backup-upload/2024-03-10/"
        );
    }

    #[test]
    fn test_package_link_cmd_excludes_homedir() {
        let cmd = package_link_cmd(
            Path::new("/backup/daily/2024-03-09/bob"),
            Path::new("/backup/upload/2024-03-10/bob"),
            Path::new("/backup/daily/2024-03-10/bob"),
        );
        assert_eq!(
            cmd,
            "rsync -rlpgoD -c --delete --link-dest=/backup/daily/2024-03-09/bob \
             --exclude=homedir /backup/upload/2024-03-10/bob/ /backup/daily/2024-03-10/bob/"
        );
    }

    #[test]
    fn test_homedir_sync_cmd_full() {
        let remote = RemoteHost::new("backup@prod.example.net", 2222);
        let cmd = homedir_sync_cmd(
            &remote,
            &account(),
            Some(Path::new("/backup/daily/2024-03-09/bob/homedir")),
            Some(Path::new("/etc/rbk/exclude-bob.txt")),
            Path::new("/backup/daily/2024-03-10/bob/homedir"),
        );
        assert_eq!(
            cmd,
            "/usr/bin/rsync -a --delete -e 'ssh -p 2222' \
             --exclude-from=/etc/rbk/exclude-bob.txt \
             --link-dest=/backup/daily/2024-03-09/bob/homedir \
             backup@prod.example.net:/home2/bob/ /backup/daily/2024-03-10/bob/homedir/"
        );
    }

    #[test]
    fn test_homedir_sync_cmd_first_backup() {
        let remote = RemoteHost::new("prod", 22);
        let cmd = homedir_sync_cmd(
            &remote,
            &account(),
            None,
            None,
            Path::new("/backup/daily/2024-03-10/bob/homedir"),
        );
        assert_eq!(
            cmd,
            "/usr/bin/rsync -a --delete -e 'ssh -p 22' \
             prod:/home2/bob/ /backup/daily/2024-03-10/bob/homedir/"
        );
    }
}
