use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::RunContext;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::Config;
use crate::notify::Notifier;
use crate::report::RunReport;
use crate::{archive, cleanup, dbdump, disk, inventory, mirror, pipeline, pool, remote};

/// Everything a stage needs for one run: the configuration, the fixed date
/// anchor and the notifier.
pub struct Runtime {
    pub cfg: Config,
    pub ctx: RunContext,
    pub notifier: Notifier,
}

impl Runtime {
    pub fn new(cfg: Config, ctx: RunContext) -> Self {
        let notifier = Notifier::from_config(&cfg.notify);
        Self { cfg, ctx, notifier }
    }
}

/// The full nightly cycle.
pub async fn run(cfg: Config) -> Result<()> {
    let started = Instant::now();
    let rt = Arc::new(Runtime::new(cfg, RunContext::capture()));
    info!("Backup run starting for {}", rt.ctx.today());

    create_run_dirs(&rt)?;

    if let Err(e) = disk::check_free_space(&rt.cfg.roots.daily, rt.cfg.disk.min_free_percent) {
        rt.notifier
            .notify(&format!("not enough free space for the backup run: {e:#}"))
            .await;
        return Err(e);
    }

    remote::mount_staging(&rt).await?;

    let partitions = match inventory::fetch_accounts(&rt.cfg.inventory, &rt.cfg.remote).await {
        Ok(partitions) => partitions,
        Err(e) => {
            rt.notifier
                .notify(&format!("account inventory failed, run aborted: {e:#}"))
                .await;
            return Err(e);
        }
    };

    let report = Arc::new(RunReport::new());

    // one pool per partition, each capped independently; the loop below is
    // the join barrier the lifecycle passes rely on
    let mut pools = JoinSet::new();
    info!("Starting a worker pool for each of the {} partitions", partitions.len());
    for (partition, accounts) in partitions {
        let rt = rt.clone();
        let report = report.clone();
        pools.spawn(async move {
            let cap = rt.cfg.pipeline.worker_cap;
            let job_rt = rt.clone();
            pool::run_partition(&partition, accounts, cap, report, move |account| {
                let rt = job_rt.clone();
                async move { pipeline::run_account_backup(&rt, &account).await }
            })
            .await;
        });
    }
    while let Some(joined) = pools.join_next().await {
        if let Err(e) = joined {
            error!("Partition pool failed to join: {e}");
        }
    }

    run_additional_copies(&rt).await;

    archive::archive_removed_accounts(&rt).await;
    archive::evict_outdated_archives(&rt).await;
    cleanup::cleanup_outdated_backups(&rt).await;

    let summary = report.summary();
    let report_path = rt.cfg.report_path();
    if let Err(e) = report.write_json(&report_path) {
        error!("Could not write the run report: {e:#}");
    }

    info!(
        "Backup run finished in {:.0?}: {summary}",
        started.elapsed()
    );
    rt.notifier
        .notify(&format!("backup run finished: {summary}"))
        .await;

    remote::unmount_staging(&rt).await;
    Ok(())
}

/// Only the lifecycle passes: removed-account archiving, archive eviction
/// and retention cleanup.
pub async fn run_cleanup(cfg: Config) -> Result<()> {
    let rt = Runtime::new(cfg, RunContext::capture());

    archive::archive_removed_accounts(&rt).await;
    archive::evict_outdated_archives(&rt).await;
    cleanup::cleanup_outdated_backups(&rt).await;
    Ok(())
}

fn create_run_dirs(rt: &Runtime) -> Result<()> {
    let daily = rt.cfg.roots.daily.join(rt.ctx.today());
    fs::create_dir_all(&daily)
        .with_context(|| format!("creating today's generation {}", daily.display()))?;

    let staging = rt.cfg.roots.staging.join(rt.ctx.today());
    fs::create_dir_all(&staging)
        .with_context(|| format!("creating today's staging dir {}", staging.display()))?;

    fs::create_dir_all(&rt.cfg.log_dir)
        .with_context(|| format!("creating log dir {}", rt.cfg.log_dir.display()))?;
    Ok(())
}

/// Date-gated extras after the per-account pipelines: the database stream
/// every third day, the weekly mirror on Sundays, the monthly mirror on the
/// first of the month.
async fn run_additional_copies(rt: &Runtime) {
    if rt.ctx.day_of_month() % 3 == 0 {
        let _ = dbdump::create_database_dump(rt).await;
    }

    if rt.ctx.is_sunday() && mirror::create_weekly_copy(rt).await {
        info!("Weekly copy complete");
    }

    if rt.ctx.day_of_month() == 1 && mirror::create_monthly_copy(rt).await {
        info!("Monthly copy complete");
    }
}
