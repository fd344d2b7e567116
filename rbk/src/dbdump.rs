use std::fs;
use std::path::Path;

use anyhow::Result;
use tracing::{error, info};

use crate::exec::{RemoteHost, run_local};
use crate::retry;
use crate::run::Runtime;

/// Stream a whole-database physical backup from production into today's
/// dump generation. Returns `None` when the stage was skipped (disabled or
/// preconditions unmet), otherwise whether the stream succeeded.
pub async fn create_database_dump(rt: &Runtime) -> Option<bool> {
    let db = &rt.cfg.database;

    if !db.enabled {
        info!("Database dump disabled in configuration");
        return None;
    }

    if !rt.cfg.remote.dir_exists(&db.data_dir).await {
        error!(
            "{} does not exist on the production host, database dump skipped",
            db.data_dir
        );
        rt.notifier
            .notify(&format!(
                "{} does not exist on production, database dump skipped",
                db.data_dir
            ))
            .await;
        return None;
    }

    let dump_dir = rt.cfg.roots.db_dump.join(rt.ctx.today());
    if let Err(e) = fs::create_dir_all(&dump_dir) {
        error!("Could not create dump dir {}: {e}", dump_dir.display());
        rt.notifier
            .notify(&format!(
                "could not create database dump dir {}: {e}",
                dump_dir.display()
            ))
            .await;
        return None;
    }

    let ok = retry::STREAM
        .run("database stream", || stream_dump(rt, &dump_dir))
        .await
        .unwrap_or(false);

    if !ok {
        error!("Database dump failed after retries");
        rt.notifier.notify("database dump failed").await;
    } else {
        info!("Database dump finished");
    }
    Some(ok)
}

async fn stream_dump(rt: &Runtime, dump_dir: &Path) -> Result<bool> {
    let command = dump_stream_cmd(
        &rt.cfg.remote,
        &rt.cfg.database.data_dir,
        &rt.cfg.database.options,
        dump_dir,
    );
    let result = run_local(&command, rt.cfg.database.stream_timeout_secs).await;

    if !result.success {
        error!("Database stream failed. stderr: {}", result.stderr);
        return Ok(false);
    }
    Ok(true)
}

/// Remote compressed stream piped into the local extractor, as one shell
/// pipeline.
fn dump_stream_cmd(remote: &RemoteHost, data_dir: &str, options: &str, dump_dir: &Path) -> String {
    let options = if options.is_empty() {
        String::new()
    } else {
        format!(" {options}")
    };
    format!(
        "ssh -p {port} {host} \"/usr/bin/mariabackup --backup --compress \
         --compress-threads=8{options} --stream=xbstream --datadir={data_dir}\" \
         | /usr/bin/mbstream -x -C {dump_dir}",
        port = remote.port,
        host = remote.host,
        dump_dir = dump_dir.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_stream_cmd() {
        let remote = RemoteHost::new("backup@prod.example.net", 2222);
        let cmd = dump_stream_cmd(
            &remote,
            "/var/lib/mysql",
            "",
            Path::new("/backup/mysql/2024-03-10"),
        );
        assert_eq!(
            cmd,
            "ssh -p 2222 backup@prod.example.net \"/usr/bin/mariabackup --backup \
             --compress --compress-threads=8 --stream=xbstream \
             --datadir=/var/lib/mysql\" | /usr/bin/mbstream -x -C /backup/mysql/2024-03-10"
        );
    }

    #[test]
    fn test_dump_stream_cmd_with_options() {
        let remote = RemoteHost::new("prod", 22);
        let cmd = dump_stream_cmd(
            &remote,
            "/var/lib/mysql",
            "--parallel=4",
            Path::new("/backup/mysql/2024-03-10"),
        );
        assert!(cmd.contains("--compress-threads=8 --parallel=4 --stream=xbstream"));
    }
}
