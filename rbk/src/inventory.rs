use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use common::{Account, group_by_partition};
use tracing::info;

use crate::config::InventoryConfig;
use crate::exec::RemoteHost;

/// Decode an inventory payload: a JSON array of account objects, grouped by
/// partition. An empty inventory is an error; a run that sees no accounts
/// must not proceed to archive "removed" ones.
pub fn parse_inventory(payload: &str) -> Result<BTreeMap<String, Vec<Account>>> {
    let accounts: Vec<Account> =
        serde_json::from_str(payload).context("decoding inventory JSON")?;
    let grouped = group_by_partition(accounts);

    let total: usize = grouped.values().map(Vec::len).sum();
    if total == 0 {
        bail!("inventory returned no accounts");
    }
    Ok(grouped)
}

/// Fetch the account inventory from the production host.
pub async fn fetch_accounts(
    cfg: &InventoryConfig,
    remote: &RemoteHost,
) -> Result<BTreeMap<String, Vec<Account>>> {
    info!("Fetching account inventory from {}", remote.host);

    let result = remote.run(&cfg.list_command, cfg.timeout_secs).await;
    if !result.success {
        bail!("inventory command failed: {}", result.stderr);
    }

    let grouped = parse_inventory(&result.stdout)?;
    let total: usize = grouped.values().map(Vec::len).sum();
    info!("Found {total} accounts across {} partitions", grouped.len());
    Ok(grouped)
}
