//! `ferry cp`: copy a file, or a tree of files, between endpoints.

use std::sync::Arc;

use anyhow::{Context, Result, bail};

use ferry_core::store::{Endpoint, RemoteStore, Store};
use ferry_core::transfer;
use ferry_core::{EventSink, TracingSink};

use crate::config::FerryConfig;

/// Execute `ferry cp <src> <dst>`.
pub async fn run_cp(src: &str, dst: &str, recursive: bool, config: &FerryConfig) -> Result<()> {
    let source: Endpoint = src.parse()?;
    let destination: Endpoint = dst.parse()?;

    let events: Arc<dyn EventSink> = Arc::new(TracingSink);
    let src_store = Store::connect(&source, &config.store, Arc::clone(&events))
        .await
        .with_context(|| format!("failed to connect to {source}"))?;
    let dst_store = Store::connect(&destination, &config.store, events)
        .await
        .with_context(|| format!("failed to connect to {destination}"))?;

    if !recursive {
        let job = transfer::plan_single(&source, &destination);
        transfer::copy(&src_store, &job.source, &dst_store, &job.destination)
            .await
            .with_context(|| format!("failed to copy {source} to {destination}"))?;
        tracing::info!(from = %source, to = %destination, "copy complete");
        return Ok(());
    }

    let jobs = transfer::plan_recursive(&src_store, &source, &destination)
        .await
        .with_context(|| format!("failed to list {source}"))?;
    if jobs.is_empty() {
        tracing::warn!(from = %source, "no files to copy");
        return Ok(());
    }

    let total = jobs.len();
    tracing::info!(from = %source, to = %destination, files = total, parallel = config.parallel, "copying");
    let src_store: Arc<dyn RemoteStore> = Arc::new(src_store);
    let dst_store: Arc<dyn RemoteStore> = Arc::new(dst_store);
    let outcomes = transfer::copy_many(src_store, dst_store, jobs, config.parallel).await;

    // Jobs without an outcome never ran.
    let mut failed = total.saturating_sub(outcomes.len());
    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            failed += 1;
            eprintln!("{} -> {}: {e}", outcome.job.source, outcome.job.destination);
        }
    }
    if failed > 0 {
        bail!("{failed} of {total} files failed to copy");
    }

    tracing::info!(files = total, "copy complete");
    Ok(())
}
