//! Files on the machine running ferry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{FileKind, ListFilter, RemoteStore};
use crate::address::basename;
use crate::error::TransferError;

/// Local filesystem adapter.
#[derive(Debug, Default, Clone)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the file a write to `address` lands in.
    ///
    /// Writing to an existing directory, or to a path ending in `/`, stores
    /// the file under the source's basename.
    async fn write_target(address: &str, source_name: Option<&str>) -> PathBuf {
        let name = source_name.map(basename).filter(|n| !n.is_empty());
        let is_dir = address.ends_with('/')
            || tokio::fs::metadata(address)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
        match name {
            Some(name) if is_dir => Path::new(address).join(name),
            _ => PathBuf::from(address),
        }
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn list(&self, address: &str, filter: &ListFilter) -> Result<Vec<String>, TransferError> {
        let matcher = name_matcher(&filter.name_pattern)?;
        let root = PathBuf::from(address);
        let mut found = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| TransferError::io(format!("failed to list {}", dir.display()), e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| TransferError::io(format!("failed to list {}", dir.display()), e))?
            {
                let file_type = entry.file_type().await.map_err(|e| {
                    TransferError::io(format!("failed to stat {}", entry.path().display()), e)
                })?;
                let path = entry.path();
                let kind = if file_type.is_dir() {
                    pending.push(path.clone());
                    FileKind::Directory
                } else {
                    FileKind::File
                };
                if kind == filter.kind && matcher.is_match(entry.file_name()) {
                    if let Ok(relative) = path.strip_prefix(&root) {
                        found.push(format!("/{}", relative.to_string_lossy()));
                    }
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn read(
        &self,
        address: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), TransferError> {
        let mut file = tokio::fs::File::open(address)
            .await
            .map_err(|e| TransferError::io(format!("failed to open {address}"), e))?;
        tokio::io::copy(&mut file, sink)
            .await
            .map_err(|e| TransferError::io(format!("failed to read {address}"), e))?;
        sink.flush()
            .await
            .map_err(|e| TransferError::io("failed to flush download sink", e))?;
        Ok(())
    }

    async fn write(
        &self,
        address: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        source_name: Option<&str>,
    ) -> Result<(), TransferError> {
        let target = Self::write_target(address, source_name).await;
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TransferError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }

        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|e| TransferError::io(format!("failed to create {}", target.display()), e))?;
        tokio::io::copy(source, &mut file)
            .await
            .map_err(|e| TransferError::io(format!("failed to write {}", target.display()), e))?;
        file.flush()
            .await
            .map_err(|e| TransferError::io(format!("failed to flush {}", target.display()), e))?;
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<(), TransferError> {
        tokio::fs::remove_file(address)
            .await
            .map_err(|e| TransferError::io(format!("failed to remove {address}"), e))
    }
}

/// Compile a `find -name` style pattern.
pub(crate) fn name_matcher(pattern: &str) -> Result<GlobMatcher, TransferError> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| TransferError::config(format!("invalid name pattern {pattern:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_read_and_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.txt");
        let address = path.to_str().unwrap();
        let store = LocalStore::new();

        let mut source: &[u8] = b"hello\n";
        store.write(address, &mut source, None).await.unwrap();

        let mut sink = Vec::new();
        store.read(address, &mut sink).await.unwrap();
        assert_eq!(sink, b"hello\n");

        store.remove(address).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn write_into_directory_uses_source_basename() {
        let dir = TempDir::new().unwrap();
        let address = dir.path().to_str().unwrap();
        let store = LocalStore::new();

        let mut source: &[u8] = b"data";
        store
            .write(address, &mut source, Some("/x/y/report.tgz"))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("report.tgz")).unwrap(),
            b"data"
        );
    }

    #[tokio::test]
    async fn list_filters_by_kind_and_name() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.log"), "a").unwrap();
        std::fs::write(dir.path().join("sub/b.log"), "b").unwrap();
        std::fs::write(dir.path().join("c.txt"), "c").unwrap();
        let store = LocalStore::new();
        let address = dir.path().to_str().unwrap();

        let files = store
            .list(address, &ListFilter::new(FileKind::File, "*.log"))
            .await
            .unwrap();
        assert_eq!(files, vec!["/a.log", "/sub/b.log"]);

        let dirs = store
            .list(address, &ListFilter::new(FileKind::Directory, "*"))
            .await
            .unwrap();
        assert_eq!(dirs, vec!["/sub"]);
    }

    #[tokio::test]
    async fn read_missing_file_is_io_error() {
        let store = LocalStore::new();
        let mut sink = Vec::new();
        let err = store
            .read("/definitely/not/here/ferry", &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io { .. }));
    }
}
