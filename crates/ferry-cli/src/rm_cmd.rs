//! `ferry rm`: remove a file.

use anyhow::{Context, Result};

use ferry_core::store::{Endpoint, RemoteStore, Store};

use crate::config::FerryConfig;

/// Execute `ferry rm <addr>`.
pub async fn run_rm(address: &str, config: &FerryConfig) -> Result<()> {
    let endpoint: Endpoint = address.parse()?;
    let store = Store::connect_default(&endpoint, &config.store)
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;

    store
        .remove(&endpoint.address)
        .await
        .with_context(|| format!("failed to remove {endpoint}"))?;
    tracing::info!(address = %endpoint, "removed");
    Ok(())
}
