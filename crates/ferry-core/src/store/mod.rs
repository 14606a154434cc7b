//! Store adapters: the `{list, read, write, remove}` capability set.
//!
//! Every endpoint a transfer can touch implements [`RemoteStore`]. The CLI
//! binds one source and one destination by parsing an [`Endpoint`] and
//! connecting a [`Store`], which dispatches on its variant.

pub mod container;
pub mod local;
pub mod swift;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransferError;
use crate::events::{EventSink, TracingSink};
use crate::exec::KubeTransport;

pub use container::{ContainerOptions, ContainerStore};
pub use local::LocalStore;
pub use swift::{SwiftCredentials, SwiftSettings, SwiftStore};

/// File type selector for [`RemoteStore::list`], as understood by `find -type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileKind {
    #[default]
    File,
    Directory,
}

impl FileKind {
    /// The `find -type` argument.
    pub fn find_flag(self) -> &'static str {
        match self {
            FileKind::File => "f",
            FileKind::Directory => "d",
        }
    }
}

impl FromStr for FileKind {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f" | "file" => Ok(FileKind::File),
            "d" | "dir" | "directory" => Ok(FileKind::Directory),
            other => Err(TransferError::config(format!(
                "unknown file kind {other:?} (expected \"f\" or \"d\")"
            ))),
        }
    }
}

/// Filter applied by [`RemoteStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    pub kind: FileKind,
    /// Shell glob matched against the file name, like `find -name`.
    pub name_pattern: String,
}

impl ListFilter {
    pub fn new(kind: FileKind, name_pattern: impl Into<String>) -> Self {
        Self {
            kind,
            name_pattern: name_pattern.into(),
        }
    }
}

impl Default for ListFilter {
    fn default() -> Self {
        Self::new(FileKind::File, "*")
    }
}

/// Operations every endpoint supports.
///
/// Addresses are scheme-less; each adapter applies its own grammar.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short adapter name used in logs (e.g. "k8s").
    fn name(&self) -> &str;

    /// Paths under `address` matching `filter`, relative to `address`.
    async fn list(&self, address: &str, filter: &ListFilter) -> Result<Vec<String>, TransferError>;

    /// Stream the file at `address` into `sink`.
    async fn read(
        &self,
        address: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), TransferError>;

    /// Store everything `source` yields at `address`.
    ///
    /// `source_name` is the path the bytes came from; its basename is used
    /// when `address` names a container or bucket instead of a file.
    async fn write(
        &self,
        address: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        source_name: Option<&str>,
    ) -> Result<(), TransferError>;

    /// Delete the file at `address`.
    async fn remove(&self, address: &str) -> Result<(), TransferError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn RemoteStore) {}
};

/// Which adapter an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Kubernetes,
    Swift,
    Local,
}

impl Scheme {
    pub fn prefix(self) -> &'static str {
        match self {
            Scheme::Kubernetes => "k8s://",
            Scheme::Swift => "swift://",
            Scheme::Local => "file://",
        }
    }
}

/// An address with its adapter selected.
///
/// `k8s://ns/pod/container/path`, `swift://bucket/key`, `file:///path` or a
/// bare local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub address: String,
}

impl Endpoint {
    pub fn new(scheme: Scheme, address: impl Into<String>) -> Self {
        Self {
            scheme,
            address: address.into(),
        }
    }

    /// The same endpoint with `relative` appended to its address.
    pub fn join(&self, relative: &str) -> Self {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return self.clone();
        }
        Self::new(
            self.scheme,
            format!("{}/{}", self.address.trim_end_matches('/'), relative),
        )
    }
}

impl FromStr for Endpoint {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for scheme in [Scheme::Kubernetes, Scheme::Swift, Scheme::Local] {
            if let Some(rest) = s.strip_prefix(scheme.prefix()) {
                return Ok(Self::new(scheme, rest));
            }
        }
        if let Some((scheme, _)) = s.split_once("://") {
            return Err(TransferError::config(format!(
                "unsupported scheme {scheme:?} in {s:?} (expected k8s, swift or file)"
            )));
        }
        if s.is_empty() {
            return Err(TransferError::bad_address(s));
        }
        Ok(Self::new(Scheme::Local, s))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.scheme.prefix(), self.address)
    }
}

/// Settings needed to connect any of the stores.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub container: ContainerOptions,
    pub swift: SwiftSettings,
}

/// A connected store, one variant per adapter.
pub enum Store {
    Container(ContainerStore<KubeTransport>),
    Swift(SwiftStore),
    Local(LocalStore),
}

impl Store {
    /// Connect the adapter for `endpoint`, reporting events to `events`.
    ///
    /// Object-store bootstrap verifies that the bucket named by the address
    /// exists; missing credentials or a missing bucket fail here.
    pub async fn connect(
        endpoint: &Endpoint,
        config: &StoreConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, TransferError> {
        match endpoint.scheme {
            Scheme::Kubernetes => {
                let transport = KubeTransport::connect().await?;
                Ok(Store::Container(
                    ContainerStore::new(transport, config.container.clone()).with_events(events),
                ))
            }
            Scheme::Swift => {
                let credentials = config.swift.clone().into_credentials()?;
                let bucket = crate::address::parse_object_path(&endpoint.address)?.bucket;
                Ok(Store::Swift(
                    SwiftStore::connect(&credentials, &bucket)
                        .await?
                        .with_events(events),
                ))
            }
            Scheme::Local => Ok(Store::Local(LocalStore::new())),
        }
    }

    /// Connect with events going to `tracing`.
    pub async fn connect_default(
        endpoint: &Endpoint,
        config: &StoreConfig,
    ) -> Result<Self, TransferError> {
        Self::connect(endpoint, config, Arc::new(TracingSink)).await
    }

    fn inner(&self) -> &dyn RemoteStore {
        match self {
            Store::Container(store) => store,
            Store::Swift(store) => store,
            Store::Local(store) => store,
        }
    }
}

#[async_trait]
impl RemoteStore for Store {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn list(&self, address: &str, filter: &ListFilter) -> Result<Vec<String>, TransferError> {
        self.inner().list(address, filter).await
    }

    async fn read(
        &self,
        address: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), TransferError> {
        self.inner().read(address, sink).await
    }

    async fn write(
        &self,
        address: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        source_name: Option<&str>,
    ) -> Result<(), TransferError> {
        self.inner().write(address, source, source_name).await
    }

    async fn remove(&self, address: &str) -> Result<(), TransferError> {
        self.inner().remove(address).await
    }
}
