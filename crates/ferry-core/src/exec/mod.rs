//! Remote-exec transport abstraction.
//!
//! The container adapter only ever needs two things from the cluster:
//! running a process inside a container with its standard streams attached,
//! and reading a secret. [`ExecTransport`] and [`SecretSource`] capture those
//! so tests can swap the real cluster for an in-memory one.
//!
//! ```text
//! ContainerStore
//!     |
//!     | exec(target, argv, stdin?, stdout?)
//!     v
//! ExecTransport --(pods/exec, websocket)--> container process
//!     |
//!     '--> Result<stderr bytes, ExecError { message, stderr }>
//! ```

pub mod kubernetes;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransferError;

pub use kubernetes::KubeTransport;

/// Coordinates of a container to run a process in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ExecTarget {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// A failed exec session.
///
/// `stderr` holds whatever the process wrote to standard error before the
/// failure was observed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExecError {
    pub message: String,
    pub stderr: Vec<u8>,
}

impl ExecError {
    pub fn new(message: impl Into<String>, stderr: Vec<u8>) -> Self {
        Self {
            message: message.into(),
            stderr,
        }
    }
}

/// Runs processes inside containers.
#[async_trait]
pub trait ExecTransport: Send + Sync {
    /// Run `argv` in `target` and return everything written to stderr.
    ///
    /// `stdin` is consumed lazily by the remote process and `stdout`
    /// receives bytes as they arrive. Standard error is always captured.
    /// No TTY is allocated.
    async fn exec(
        &self,
        target: &ExecTarget,
        argv: &[String],
        stdin: Option<&mut (dyn AsyncRead + Send + Unpin)>,
        stdout: Option<&mut (dyn AsyncWrite + Send + Unpin)>,
    ) -> Result<Vec<u8>, ExecError>;
}

/// Reads secrets from the cluster.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Return the decoded key/value pairs of the secret `name`.
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, TransferError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ExecTransport, _: &dyn SecretSource) {}
};
