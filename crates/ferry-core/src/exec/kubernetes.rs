//! Kubernetes `pods/exec` transport.
//!
//! Opens one websocket exec session per call through the `kube` client and
//! wires the caller's streams straight into it. No session outlives the
//! call that opened it.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ExecError, ExecTarget, ExecTransport, SecretSource};
use crate::error::TransferError;

/// Chunk size used when feeding the remote process's stdin.
const STDIN_CHUNK: usize = 32 * 1024;

/// [`ExecTransport`] and [`SecretSource`] backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeTransport {
    client: Client,
}

impl KubeTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient credentials.
    ///
    /// Uses the kubeconfig at `$KUBECONFIG` (or `~/.kube/config`) when that
    /// file exists and falls back to the in-cluster service account.
    pub async fn connect() -> Result<Self, TransferError> {
        let config = match kubeconfig_path().filter(|path| path.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using kubeconfig");
                let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
                    TransferError::config(format!(
                        "failed to read kubeconfig {}: {e}",
                        path.display()
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        TransferError::config(format!(
                            "invalid kubeconfig {}: {e}",
                            path.display()
                        ))
                    })?
            }
            None => {
                tracing::debug!("no kubeconfig found, using in-cluster configuration");
                Config::incluster().map_err(|e| {
                    TransferError::config(format!("in-cluster configuration unavailable: {e}"))
                })?
            }
        };

        let client = Client::try_from(config)
            .map_err(|e| TransferError::config(format!("failed to build kube client: {e}")))?;
        Ok(Self::new(client))
    }
}

/// Location of the kubeconfig file: `$KUBECONFIG`, else `~/.kube/config`.
pub fn kubeconfig_path() -> Option<PathBuf> {
    match std::env::var_os("KUBECONFIG") {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => dirs::home_dir().map(|home| home.join(".kube").join("config")),
    }
}

#[async_trait]
impl ExecTransport for KubeTransport {
    async fn exec(
        &self,
        target: &ExecTarget,
        argv: &[String],
        stdin: Option<&mut (dyn AsyncRead + Send + Unpin)>,
        stdout: Option<&mut (dyn AsyncWrite + Send + Unpin)>,
    ) -> Result<Vec<u8>, ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let params = AttachParams::default()
            .container(target.container.as_str())
            .stdin(stdin.is_some())
            .stdout(stdout.is_some())
            .stderr(true)
            .tty(false);

        let mut process = pods
            .exec(&target.pod, argv.to_vec(), &params)
            .await
            .map_err(|e| ExecError::new(format!("error while creating executor: {e}"), Vec::new()))?;

        let remote_stdin = process.stdin();
        let remote_stdout = process.stdout();
        let remote_stderr = process.stderr();
        let status = process.take_status();

        let mut stderr = Vec::new();
        let (stdin_result, stdout_result, stderr_result) = tokio::join!(
            async {
                match (stdin, remote_stdin) {
                    (Some(source), Some(mut remote)) => pump_stdin(source, &mut remote).await,
                    _ => Ok(()),
                }
            },
            async {
                match (stdout, remote_stdout) {
                    (Some(sink), Some(mut remote)) => {
                        tokio::io::copy(&mut remote, sink).await.map(|_| ())
                    }
                    _ => Ok(()),
                }
            },
            async {
                match remote_stderr {
                    Some(mut remote) => remote.read_to_end(&mut stderr).await.map(|_| ()),
                    None => Ok(()),
                }
            },
        );

        let exit_status = match status {
            Some(status) => status.await,
            None => None,
        };
        let joined = process.join().await;

        let failure = if let Err(e) = stdin_result {
            Some(format!("error reading input stream: {e}"))
        } else if let Err(e) = stdout_result {
            Some(format!("error in stream: {e}"))
        } else if let Err(e) = stderr_result {
            Some(format!("error in stream: {e}"))
        } else if let Err(e) = joined {
            Some(format!("error in stream: {e}"))
        } else {
            exit_status.and_then(failure_message)
        };

        match failure {
            Some(message) => {
                tracing::debug!(
                    target_container = %target,
                    command = ?argv.first(),
                    error = %message,
                    "exec failed"
                );
                Err(ExecError::new(message, stderr))
            }
            None => Ok(stderr),
        }
    }
}

#[async_trait]
impl SecretSource for KubeTransport {
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, TransferError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(name).await.map_err(|e| TransferError::Transport {
            message: format!("failed to read secret {namespace}/{name}: {e}"),
        })?;

        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }
}

/// Copy `source` into the remote stdin, then close it.
///
/// A write failure means the remote process stopped reading (it exited or
/// closed stdin); its stderr and exit status tell the real story, so that
/// is not an error here. Read failures on `source` are.
async fn pump_stdin<W>(source: &mut (dyn AsyncRead + Send + Unpin), remote: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; STDIN_CHUNK];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Err(e) = remote.write_all(&buf[..n]).await {
            tracing::debug!(error = %e, "remote stdin closed early");
            return Ok(());
        }
    }
    if let Err(e) = remote.shutdown().await {
        tracing::debug!(error = %e, "failed to close remote stdin");
    }
    Ok(())
}

/// Turn a non-success exec status into an error message.
fn failure_message(status: Status) -> Option<String> {
    if status.status.as_deref() == Some("Success") {
        return None;
    }

    let exit_code = status
        .details
        .as_ref()
        .and_then(|details| details.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|cause| cause.message.clone());

    Some(match (exit_code, status.message) {
        (Some(code), _) => format!("command terminated with exit code {code}"),
        (None, Some(message)) => format!("command terminated: {message}"),
        (None, None) => "command terminated with unknown status".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};

    use std::sync::Mutex;

    // Serializes tests that modify environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn kubeconfig_env_var_wins() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let orig = std::env::var_os("KUBECONFIG");
        unsafe { std::env::set_var("KUBECONFIG", "/etc/ferry/kubeconfig") };

        let path = kubeconfig_path();

        match orig {
            Some(v) => unsafe { std::env::set_var("KUBECONFIG", v) },
            None => unsafe { std::env::remove_var("KUBECONFIG") },
        }
        assert_eq!(path, Some(PathBuf::from("/etc/ferry/kubeconfig")));
    }

    #[test]
    fn kubeconfig_defaults_to_home() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let orig = std::env::var_os("KUBECONFIG");
        unsafe { std::env::remove_var("KUBECONFIG") };

        let path = kubeconfig_path();

        if let Some(v) = orig {
            unsafe { std::env::set_var("KUBECONFIG", v) };
        }
        if let Some(path) = path {
            assert!(path.ends_with(".kube/config"), "unexpected: {}", path.display());
        }
    }

    #[test]
    fn success_status_is_not_a_failure() {
        let status = Status {
            status: Some("Success".to_string()),
            ..Default::default()
        };
        assert_eq!(failure_message(status), None);
    }

    #[test]
    fn failure_status_reports_exit_code() {
        let status = Status {
            status: Some("Failure".to_string()),
            message: Some("command terminated with non-zero exit code".to_string()),
            reason: Some("NonZeroExitCode".to_string()),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some("ExitCode".to_string()),
                    message: Some("2".to_string()),
                    field: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            failure_message(status).as_deref(),
            Some("command terminated with exit code 2")
        );
    }

    #[tokio::test]
    async fn pump_stdin_copies_and_closes() {
        let mut source: &[u8] = b"payload";
        let mut sink = Vec::new();
        pump_stdin(&mut source, &mut sink).await.unwrap();
        assert_eq!(sink, b"payload");
    }
}
