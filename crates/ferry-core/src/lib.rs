//! Copy files between Kubernetes containers, Swift object storage and the
//! local filesystem.
//!
//! Each endpoint is a [`RemoteStore`] with the same four operations. Files in
//! containers are reached by running short processes over the cluster's exec
//! API, optionally through `gpg` when the namespace carries a passphrase
//! secret. [`transfer::copy`] streams one store's `read` into another store's
//! `write`.

pub mod address;
pub mod crypto;
pub mod error;
pub mod events;
pub mod exec;
pub mod retry;
pub mod store;
pub mod stream;
pub mod transfer;

pub use address::{ContainerPath, ObjectPath};
pub use crypto::{Encryption, EncryptionPolicy, ReadCipherMode};
pub use error::TransferError;
pub use events::{EventSink, RecordingSink, TracingSink, TransferEvent};
pub use exec::{ExecError, ExecTarget, ExecTransport, KubeTransport, SecretSource};
pub use store::{
    ContainerOptions, ContainerStore, Endpoint, FileKind, ListFilter, LocalStore, RemoteStore,
    Scheme, Store, StoreConfig, SwiftSettings, SwiftStore,
};
pub use transfer::{CopyJob, CopyOutcome, copy, copy_many};
