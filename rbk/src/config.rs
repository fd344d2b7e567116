use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::RetentionTier;
use serde::Deserialize;

use crate::exec::RemoteHost;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Production host the accounts are pulled from.
    pub remote: RemoteHost,
    pub roots: Roots,
    #[serde(default)]
    pub retention: Retention,
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub staging: StagingConfig,
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Where the JSON run report lands; defaults to `{log_dir}/report.json`.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Config {
    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .clone()
            .unwrap_or_else(|| self.log_dir.join("report.json"))
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/rbk")
}

/// Local snapshot tree roots.
#[derive(Debug, Clone, Deserialize)]
pub struct Roots {
    pub daily: PathBuf,
    pub staging: PathBuf,
    pub archive: PathBuf,
    pub db_dump: PathBuf,
}

impl Roots {
    pub fn weekly(&self) -> PathBuf {
        self.daily.join("weekly")
    }

    pub fn monthly(&self) -> PathBuf {
        self.daily.join("monthly")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub daily: RetentionTier,
    pub weekly: RetentionTier,
    pub monthly: RetentionTier,
    pub db_dump: RetentionTier,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            daily: RetentionTier::new(5, 6),
            weekly: RetentionTier::new(8, 4),
            monthly: RetentionTier::new(28, 3),
            db_dump: RetentionTier::new(1, 2),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Tag embedded in archive file names, usually the backup server name.
    pub server_tag: String,
    pub lifetime_secs: i64,
    #[serde(default = "default_tar_timeout")]
    pub tar_timeout_secs: u64,
}

fn default_tar_timeout() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub worker_cap: usize,
    pub package_command: String,
    pub package_timeout_secs: u64,
    pub preclean_timeout_secs: u64,
    pub link_timeout_secs: u64,
    pub homedir_timeout_secs: u64,
    /// rsync exit codes treated as success for the suspended link step.
    pub suspended_tolerated_codes: Vec<i32>,
    /// rsync exit codes treated as success for the homedir sync.
    pub homedir_tolerated_codes: Vec<i32>,
    /// Per-account `--exclude-from` list files.
    pub exclude_from: HashMap<String, PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_cap: crate::pool::DEFAULT_WORKER_CAP,
            package_command:
                "/usr/local/cpanel/scripts/pkgacct --skiphomedir --skipquota --skiplogs \
                 --skipbwdata --backup --incremental {user} {dest}"
                    .to_string(),
            package_timeout_secs: 10_800,
            preclean_timeout_secs: 600,
            link_timeout_secs: 36_000,
            homedir_timeout_secs: 36_000,
            // 24: source files vanished mid-transfer
            suspended_tolerated_codes: vec![24],
            // 23: partial transfer, 24: vanished files
            homedir_tolerated_codes: vec![23, 24],
            exclude_from: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub data_dir: String,
    pub options: String,
    pub stream_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_dir: "/var/lib/mysql".to_string(),
            options: String::new(),
            stream_timeout_secs: 36_000,
        }
    }
}

/// The staging export this server offers to production for package uploads.
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    /// How production addresses this backup server.
    pub endpoint: String,
    #[serde(default = "default_staging_port")]
    pub port: u16,
    /// Directory exported to production (maps onto `roots.staging`).
    pub export: PathBuf,
    /// Mount point on the production host.
    pub mount_dir: PathBuf,
}

fn default_staging_port() -> u16 {
    22
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    /// Command run on production that prints a JSON array of accounts.
    pub list_command: String,
    #[serde(default = "default_inventory_timeout")]
    pub timeout_secs: u64,
}

fn default_inventory_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    /// Command line the quoted message is appended to.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub min_free_percent: u8,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self { min_free_percent: 6 }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}
