//! `ferry ls`: list files below an address.

use anyhow::{Context, Result};

use ferry_core::store::{Endpoint, FileKind, ListFilter, RemoteStore, Store};

use crate::config::FerryConfig;

/// Execute `ferry ls <addr>`, printing one relative path per line.
pub async fn run_ls(address: &str, kind: FileKind, name: &str, config: &FerryConfig) -> Result<()> {
    let endpoint: Endpoint = address.parse()?;
    let store = Store::connect_default(&endpoint, &config.store)
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;

    let entries = store
        .list(&endpoint.address, &ListFilter::new(kind, name))
        .await
        .with_context(|| format!("failed to list {endpoint}"))?;

    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}
