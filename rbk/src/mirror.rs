use std::fs;
use std::path::Path;

use tracing::{debug, error, info};

use crate::exec::run_local;
use crate::run::Runtime;

/// Hardlink-mirror today's completed daily generation into the weekly tier.
pub async fn create_weekly_copy(rt: &Runtime) -> bool {
    mirror_generation(rt, "weekly", &rt.cfg.roots.weekly()).await
}

/// Same for the monthly tier.
pub async fn create_monthly_copy(rt: &Runtime) -> bool {
    mirror_generation(rt, "monthly", &rt.cfg.roots.monthly()).await
}

async fn mirror_generation(rt: &Runtime, tier: &str, tier_root: &Path) -> bool {
    if let Err(e) = fs::create_dir_all(tier_root) {
        error!("Could not create {tier} root {}: {e}", tier_root.display());
        rt.notifier
            .notify(&format!("could not create the {tier} mirror root: {e}"))
            .await;
        return false;
    }

    let source = rt.cfg.roots.daily.join(rt.ctx.today());
    let dest = tier_root.join(rt.ctx.today());
    let command = mirror_cmd(&source, &dest);

    info!("Creating {tier} copy of {}", source.display());
    let result = run_local(&command, rt.cfg.pipeline.link_timeout_secs).await;

    if !result.success {
        error!("{tier} copy failed. stderr: {}", result.stderr);
        rt.notifier
            .notify(&format!("{tier} copy failed: {}", result.stderr))
            .await;
        return false;
    }

    debug!("{tier} copy finished");
    true
}

fn mirror_cmd(source: &Path, dest: &Path) -> String {
    // trailing slashes matter: copy the generation's contents, not the dir
    format!(
        "rsync -a --delete --link-dest={source} {source}/ {dest}/",
        source = source.display(),
        dest = dest.display()
    )
}
