//! Copying between two stores.
//!
//! A copy pipes the source adapter's `read` into the destination adapter's
//! `write` through a bounded in-memory pipe. Both halves run concurrently,
//! so the payload is never held in memory as a whole.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::address::basename;
use crate::error::TransferError;
use crate::store::{Endpoint, ListFilter, RemoteStore};

/// Capacity of the pipe between reader and writer.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Copy the file at `src_addr` in `src` to `dst_addr` in `dst`.
///
/// The source path is handed to the destination as the source name, so a
/// destination naming a container or bucket receives the source basename.
/// The first failure of either half is returned and the other half is
/// abandoned; the destination may hold partial data in that case.
pub async fn copy(
    src: &dyn RemoteStore,
    src_addr: &str,
    dst: &dyn RemoteStore,
    dst_addr: &str,
) -> Result<(), TransferError> {
    let (mut reader, writer) = tokio::io::duplex(PIPE_CAPACITY);

    let download = async move {
        let mut writer = writer;
        let result = src.read(src_addr, &mut writer).await;
        // Dropping the write half is what ends the destination's input.
        drop(writer);
        result
    };
    let upload = dst.write(dst_addr, &mut reader, Some(src_addr));

    tokio::try_join!(download, upload)?;
    tracing::debug!(
        src = %src.name(),
        src_addr,
        dst = %dst.name(),
        dst_addr,
        "copied"
    );
    Ok(())
}

/// One file to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    pub source: String,
    pub destination: String,
}

impl CopyJob {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Result of one [`CopyJob`].
#[derive(Debug)]
pub struct CopyOutcome {
    pub job: CopyJob,
    pub result: Result<(), TransferError>,
}

/// Run `jobs` with at most `parallel` copies in flight.
///
/// Every job runs to completion regardless of the others; outcomes come
/// back in job order, one per job. A copy task that panics is reported as
/// a failed outcome for its job.
pub async fn copy_many(
    src: Arc<dyn RemoteStore>,
    dst: Arc<dyn RemoteStore>,
    jobs: Vec<CopyJob>,
    parallel: usize,
) -> Vec<CopyOutcome> {
    let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
    let mut tasks: Vec<(CopyJob, JoinHandle<Result<(), TransferError>>)> =
        Vec::with_capacity(jobs.len());

    for job in jobs {
        // The semaphore is never closed.
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let src = Arc::clone(&src);
        let dst = Arc::clone(&dst);
        let source = job.source.clone();
        let destination = job.destination.clone();

        let handle = tokio::spawn(async move {
            let result = copy(src.as_ref(), &source, dst.as_ref(), &destination).await;
            drop(permit);
            result
        });
        tasks.push((job, handle));
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    for (job, handle) in tasks {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::Transport {
                message: format!("copy task failed: {e}"),
            }),
        };
        if let Err(e) = &result {
            tracing::debug!(source = %job.source, destination = %job.destination, error = %e, "copy failed");
        }
        outcomes.push(CopyOutcome { job, result });
    }
    outcomes
}

/// Jobs copying every file below `source` to the same relative path below
/// `destination`.
pub async fn plan_recursive(
    src: &dyn RemoteStore,
    source: &Endpoint,
    destination: &Endpoint,
) -> Result<Vec<CopyJob>, TransferError> {
    let files = src.list(&source.address, &ListFilter::default()).await?;
    Ok(files
        .iter()
        .map(|relative| {
            CopyJob::new(
                source.join(relative).address,
                destination.join(relative).address,
            )
        })
        .collect())
}

/// Job for a single-file copy. A destination ending in `/` gets the
/// source basename appended.
pub fn plan_single(source: &Endpoint, destination: &Endpoint) -> CopyJob {
    let dst = if destination.address.ends_with('/') {
        destination.join(basename(&source.address)).address
    } else {
        destination.address.clone()
    };
    CopyJob::new(source.address.clone(), dst)
}
