//! Files inside a running container, reached through an exec transport.
//!
//! Every operation is a short sequence of processes run in the target
//! container (`find`, `cat`, `mkdir`, `touch`, `cp`, `rm`, optionally
//! `gpg`). An attempt fails when the transport reports an error or the
//! process writes anything to stderr; failed attempts are retried up to
//! [`MAX_ATTEMPTS`](crate::retry::MAX_ATTEMPTS) times with linear backoff.
//!
//! Streams cannot be rewound, so:
//! - a read is not retried once any byte has reached the sink;
//! - a write replays the source from a bounded in-memory window and gives
//!   up retrying once more than the window was consumed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{ListFilter, RemoteStore};
use crate::address::ContainerPath;
use crate::crypto::{
    self, Encryption, EncryptionPolicy, ReadCipherMode, decrypt_write_command, plain_copy_command,
};
use crate::error::TransferError;
use crate::events::{EventSink, TracingSink, TransferEvent};
use crate::exec::{ExecError, ExecTarget, ExecTransport, SecretSource};
use crate::retry::{self, Attempts};
use crate::stream::{CountingWriter, DEFAULT_REPLAY_WINDOW, ReplayReader};

/// Tunables for [`ContainerStore`].
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    pub encryption: EncryptionPolicy,
    pub read_mode: ReadCipherMode,
    /// Source bytes kept so a failed write can be retried.
    pub replay_window: usize,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            encryption: EncryptionPolicy::default(),
            read_mode: ReadCipherMode::default(),
            replay_window: DEFAULT_REPLAY_WINDOW,
        }
    }
}

/// Container-file adapter over any [`ExecTransport`].
pub struct ContainerStore<E> {
    transport: E,
    options: ContainerOptions,
    events: Arc<dyn EventSink>,
}

/// Result of a single exec step, before retry policy is applied.
enum Step {
    Done,
    Failed(TransferError),
}

impl<E> ContainerStore<E>
where
    E: ExecTransport + SecretSource,
{
    pub fn new(transport: E, options: ContainerOptions) -> Self {
        Self {
            transport,
            options,
            events: Arc::new(TracingSink),
        }
    }

    /// Send events to `events` instead of `tracing`.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn transport(&self) -> &E {
        &self.transport
    }

    /// Resolve the encryption setting for `namespace`.
    pub async fn encryption_for(&self, namespace: &str) -> Encryption {
        self.options
            .encryption
            .resolve(&self.transport, namespace)
            .await
    }

    /// List files below the address with `find`.
    ///
    /// Output lines have the searched root removed (first occurrence only),
    /// so `/var/log/a.log` under `ns/pod/c/var/log` comes back as `/a.log`.
    pub async fn list_files(
        &self,
        address: &str,
        filter: &ListFilter,
    ) -> Result<Vec<String>, TransferError> {
        let path = ContainerPath::parse(address)?;
        let target = path.target();
        let argv = find_command(&path.path, filter);

        let mut attempts = Attempts::new();
        loop {
            attempts.start();
            let mut output = Vec::new();
            let result = self
                .transport
                .exec(&target, &argv, None, Some(&mut output))
                .await;
            match check(result) {
                Step::Done => return Ok(parse_find_output(&output, &path.path)),
                Step::Failed(err) => self.backoff_or_fail(address, &attempts, err).await?,
            }
        }
    }

    /// Stream the file at `address` to `sink`, through gpg when encryption
    /// is on for the namespace.
    pub async fn read_file(
        &self,
        address: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), TransferError> {
        let path = ContainerPath::parse(address)?;
        let target = path.target();
        let encryption = self.encryption_for(&path.namespace).await;
        let argv = crypto::read_command(&path.path, &encryption, self.options.read_mode);

        let mut sink = CountingWriter::new(sink);
        let mut attempts = Attempts::new();
        loop {
            attempts.start();
            let result = self
                .transport
                .exec(&target, &argv, None, Some(&mut sink))
                .await;
            match check(result) {
                Step::Done => {
                    sink.flush()
                        .await
                        .map_err(|e| TransferError::io("failed to flush download sink", e))?;
                    return Ok(());
                }
                Step::Failed(err) if sink.written() > 0 => {
                    tracing::debug!(
                        address,
                        written = sink.written(),
                        "read failed after output was delivered, not retrying"
                    );
                    return Err(err);
                }
                Step::Failed(err) => self.backoff_or_fail(address, &attempts, err).await?,
            }
        }
    }

    /// Write `source` to the address.
    ///
    /// Each attempt runs `mkdir -p <dir>`, then `touch <path>`, then the copy
    /// step with `source` on stdin. With encryption on the copy step is a
    /// decrypting gpg; if gpg reports that the input is not OpenPGP data the
    /// call switches to a plain `cp` for good and restarts without spending
    /// an attempt.
    pub async fn write_file(
        &self,
        address: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        source_name: Option<&str>,
    ) -> Result<(), TransferError> {
        let path = ContainerPath::parse_for_write(address, source_name)?;
        let target = path.target();
        let mut decrypt = match self.encryption_for(&path.namespace).await {
            Encryption::On { passphrase } => Some(passphrase),
            Encryption::Off => None,
        };

        let mkdir = vec!["mkdir".to_string(), "-p".to_string(), path.parent_dir()];
        let touch = vec!["touch".to_string(), path.path.clone()];
        let mut source = ReplayReader::new(source, self.options.replay_window);

        let mut attempts = Attempts::new();
        loop {
            attempts.start();

            if let Step::Failed(err) = self.run(&target, &mkdir).await {
                self.backoff_or_fail(address, &attempts, err).await?;
                continue;
            }
            if let Step::Failed(err) = self.run(&target, &touch).await {
                self.backoff_or_fail(address, &attempts, err).await?;
                continue;
            }

            let copy = match &decrypt {
                Some(passphrase) => decrypt_write_command(&path.path, passphrase),
                None => plain_copy_command(&path.path),
            };
            let result = self
                .transport
                .exec(&target, &copy, Some(&mut source), None)
                .await;

            if decrypt.is_some() && is_downgrade(&result) {
                decrypt = None;
                attempts.refund();
                self.events.emit(TransferEvent::DecryptionDowngraded {
                    address: address.to_string(),
                });
                if !source.rewind() {
                    return Err(TransferError::ReplayExhausted {
                        consumed: source.consumed(),
                    });
                }
                continue;
            }

            match check(result) {
                Step::Done => return Ok(()),
                Step::Failed(err) => {
                    if !source.rewind() {
                        tracing::debug!(
                            address,
                            consumed = source.consumed(),
                            "write failed past the replay window, not retrying"
                        );
                        return Err(err);
                    }
                    self.backoff_or_fail(address, &attempts, err).await?;
                }
            }
        }
    }

    /// Delete the file at `address` with `rm`.
    pub async fn remove_file(&self, address: &str) -> Result<(), TransferError> {
        let path = ContainerPath::parse(address)?;
        let target = path.target();
        let argv = vec!["rm".to_string(), path.path.clone()];

        let mut attempts = Attempts::new();
        loop {
            attempts.start();
            match self.run(&target, &argv).await {
                Step::Done => return Ok(()),
                Step::Failed(err) => self.backoff_or_fail(address, &attempts, err).await?,
            }
        }
    }

    /// Run a command without stdin or stdout.
    async fn run(&self, target: &ExecTarget, argv: &[String]) -> Step {
        check(self.transport.exec(target, argv, None, None).await)
    }

    /// Surface `err` on the final attempt, otherwise sleep before the next.
    async fn backoff_or_fail(
        &self,
        address: &str,
        attempts: &Attempts,
        err: TransferError,
    ) -> Result<(), TransferError> {
        if attempts.is_final() {
            return Err(err);
        }
        let attempt = attempts.current();
        self.events.emit(TransferEvent::RetryScheduled {
            address: address.to_string(),
            attempt,
            delay: retry::backoff_delay(attempt),
            reason: err.to_string(),
        });
        retry::sleep(attempt).await;
        Ok(())
    }
}

#[async_trait]
impl<E> RemoteStore for ContainerStore<E>
where
    E: ExecTransport + SecretSource,
{
    fn name(&self) -> &str {
        "k8s"
    }

    async fn list(&self, address: &str, filter: &ListFilter) -> Result<Vec<String>, TransferError> {
        self.list_files(address, filter).await
    }

    async fn read(
        &self,
        address: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), TransferError> {
        self.read_file(address, sink).await
    }

    async fn write(
        &self,
        address: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        source_name: Option<&str>,
    ) -> Result<(), TransferError> {
        self.write_file(address, source, source_name).await
    }

    async fn remove(&self, address: &str) -> Result<(), TransferError> {
        self.remove_file(address).await
    }
}

/// Either signal alone is a failure: a transport error or any stderr.
fn check(result: Result<Vec<u8>, ExecError>) -> Step {
    match result {
        Ok(stderr) if stderr.is_empty() => Step::Done,
        Ok(stderr) => Step::Failed(TransferError::Remote { stderr }),
        Err(err) => Step::Failed(err.into()),
    }
}

fn is_downgrade(result: &Result<Vec<u8>, ExecError>) -> bool {
    let stderr = match result {
        Ok(stderr) => stderr,
        Err(err) => &err.stderr,
    };
    crypto::is_downgrade_signal(stderr)
}

/// `find <root> -type <kind> -name <pattern>`.
pub fn find_command(root: &str, filter: &ListFilter) -> Vec<String> {
    vec![
        "find".to_string(),
        root.to_string(),
        "-type".to_string(),
        filter.kind.find_flag().to_string(),
        "-name".to_string(),
        filter.name_pattern.clone(),
    ]
}

/// Split `find` output into paths relative to `root`.
pub fn parse_find_output(output: &[u8], root: &str) -> Vec<String> {
    String::from_utf8_lossy(output)
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| line.replacen(root, "", 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileKind;

    #[test]
    fn find_command_shape() {
        let filter = ListFilter::new(FileKind::File, "*.log");
        assert_eq!(
            find_command("/var/log", &filter),
            vec!["find", "/var/log", "-type", "f", "-name", "*.log"]
        );
    }

    #[test]
    fn find_output_is_relative_to_root() {
        let out = b"/var/log/a.log\n/var/log/sub/b.log\n";
        assert_eq!(
            parse_find_output(out, "/var/log"),
            vec!["/a.log", "/sub/b.log"]
        );
    }

    #[test]
    fn find_output_drops_blank_lines_and_strips_once() {
        let out = b"\n/data/x/data/y\n\n";
        assert_eq!(parse_find_output(out, "/data"), vec!["/x/data/y"]);
    }

    #[test]
    fn check_treats_stderr_as_failure() {
        assert!(matches!(check(Ok(Vec::new())), Step::Done));
        assert!(matches!(
            check(Ok(b"busy".to_vec())),
            Step::Failed(TransferError::Remote { .. })
        ));
        assert!(matches!(
            check(Err(ExecError::new("reset", Vec::new()))),
            Step::Failed(TransferError::Transport { .. })
        ));
    }

    #[test]
    fn downgrade_detected_on_either_signal() {
        let token = crypto::DOWNGRADE_TOKEN.as_bytes().to_vec();
        assert!(is_downgrade(&Ok(token.clone())));
        assert!(is_downgrade(&Err(ExecError::new("exit code 2", token))));
        assert!(!is_downgrade(&Ok(Vec::new())));
    }
}
