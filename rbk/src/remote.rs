use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::run::Runtime;

/// Mount this server's staging export on the production host so the package
/// stage can write straight into the upload tree. Aborts the run on failure:
/// without the mount every package stage is doomed.
pub async fn mount_staging(rt: &Runtime) -> Result<()> {
    let staging = &rt.cfg.staging;
    let mount_dir = staging.mount_dir.display();
    info!("Mounting staging export on {}", rt.cfg.remote.host);

    let mkdir = rt
        .cfg
        .remote
        .run(&format!("/bin/mkdir -p {mount_dir}"), 60)
        .await;
    if !mkdir.success {
        rt.notifier
            .notify(&format!(
                "could not create staging mount dir {mount_dir} on production"
            ))
            .await;
        bail!("could not create staging mount dir {mount_dir} on production");
    }

    if is_staging_mounted(rt).await {
        info!("Staging export already mounted");
        return Ok(());
    }

    let command = format!(
        "sshfs {endpoint}:{export} {mount_dir} -p {port} -o nonempty",
        endpoint = staging.endpoint,
        export = staging.export.display(),
        port = staging.port,
    );
    let result = rt.cfg.remote.run(&command, 120).await;
    if !result.success {
        rt.notifier
            .notify(&format!("staging mount failed: {}", result.stderr))
            .await;
        bail!("staging mount failed: {}", result.stderr);
    }

    info!("Staging export mounted");
    Ok(())
}

pub async fn is_staging_mounted(rt: &Runtime) -> bool {
    rt.cfg
        .remote
        .run(
            &format!("mountpoint -q {}", rt.cfg.staging.mount_dir.display()),
            60,
        )
        .await
        .success
}

/// Best-effort unmount at the end of the run.
pub async fn unmount_staging(rt: &Runtime) -> bool {
    info!("Unmounting staging export");

    if !is_staging_mounted(rt).await {
        warn!("Staging export already unmounted");
        return true;
    }

    let result = rt
        .cfg
        .remote
        .run(
            &format!("fusermount -u {}", rt.cfg.staging.mount_dir.display()),
            60,
        )
        .await;
    if !result.success {
        warn!("Staging unmount failed: {}", result.stderr);
        return false;
    }
    true
}
