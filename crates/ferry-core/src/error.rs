//! Error type shared by every store adapter.

use thiserror::Error;

use crate::exec::ExecError;

/// Errors surfaced by address parsing, the exec transport and the store
/// adapters.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The address does not satisfy the grammar of its adapter.
    #[error("illegal path: {address}")]
    BadAddress { address: String },

    /// The exec session could not be established or a stream failed.
    #[error("{message}")]
    Transport { message: String },

    /// The remote process wrote to standard error.
    #[error("STDERR: {}", String::from_utf8_lossy(.stderr))]
    Remote { stderr: Vec<u8> },

    /// An object store request failed.
    #[error("object store: {message}")]
    ObjectStore { message: String, retryable: bool },

    /// Missing credentials, missing object store container and the like.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A local stream or file failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A write had to be restarted after more of the source was consumed
    /// than the replay window holds.
    #[error("cannot restart write: {consumed} bytes already read from the source exceed the replay window")]
    ReplayExhausted { consumed: u64 },
}

impl TransferError {
    pub fn bad_address(address: impl Into<String>) -> Self {
        Self::BadAddress {
            address: address.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the adapters' retry loop may try the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Transport { .. } | TransferError::Remote { .. } => true,
            TransferError::ObjectStore { retryable, .. } => *retryable,
            TransferError::BadAddress { .. }
            | TransferError::Config { .. }
            | TransferError::Io { .. }
            | TransferError::ReplayExhausted { .. } => false,
        }
    }
}

impl From<ExecError> for TransferError {
    /// Standard error wins over the transport message when both are present.
    fn from(err: ExecError) -> Self {
        if err.stderr.is_empty() {
            TransferError::Transport {
                message: err.message,
            }
        } else {
            TransferError::Remote { stderr: err.stderr }
        }
    }
}
