//! Shared test utilities for ferry integration tests.
//!
//! [`FakeCluster`] stands in for a Kubernetes cluster: it implements
//! [`ExecTransport`] and [`SecretSource`] over an in-memory filesystem per
//! container and understands the handful of commands the container adapter
//! runs (`mkdir -p`, `touch`, `cp /dev/stdin`, `cat`, `find`, `rm`, `gpg`).
//!
//! Every exec is recorded. Failures are scripted with [`Fault`]s, which
//! are consumed in order by the first call to the matching program.
//!
//! The fake `gpg` does no cryptography. Ciphertext is the plaintext behind
//! a `FAKEPGP:<passphrase>` header line; see [`encrypt`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ferry_core::crypto::DOWNGRADE_TOKEN;
use ferry_core::exec::{ExecError, ExecTarget, ExecTransport, SecretSource};
use ferry_core::TransferError;
use globset::Glob;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CIPHER_HEADER: &str = "FAKEPGP:";

/// Fake ciphertext for `data` under `passphrase`.
pub fn encrypt(passphrase: &str, data: &[u8]) -> Vec<u8> {
    let mut out = format!("{CIPHER_HEADER}{passphrase}\n").into_bytes();
    out.extend_from_slice(data);
    out
}

/// Inverse of [`encrypt`]. `None` if `data` is not fake ciphertext.
fn decrypt(data: &[u8]) -> Option<(String, Vec<u8>)> {
    let rest = data.strip_prefix(CIPHER_HEADER.as_bytes())?;
    let newline = rest.iter().position(|b| *b == b'\n')?;
    let passphrase = String::from_utf8_lossy(&rest[..newline]).into_owned();
    Some((passphrase, rest[newline + 1..].to_vec()))
}

/// One exec the fake received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: ExecTarget,
    pub argv: Vec<String>,
    /// Bytes read from stdin, if any was attached.
    pub stdin: Option<Vec<u8>>,
}

/// A scripted failure for the next call to `program`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub program: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Report a transport error with this message instead of a clean exit.
    pub transport: Option<String>,
    /// Drain stdin before failing.
    pub consume_stdin: bool,
}

impl Fault {
    /// The call exits cleanly but writes `stderr`.
    pub fn stderr(program: &str, stderr: &str) -> Self {
        Self {
            program: program.to_string(),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
            transport: None,
            consume_stdin: false,
        }
    }

    /// The exec session breaks with `message`.
    pub fn transport(program: &str, message: &str) -> Self {
        Self {
            transport: Some(message.to_string()),
            ..Self::stderr(program, "")
        }
    }

    /// Deliver `stdout` before failing.
    pub fn with_stdout(mut self, stdout: &[u8]) -> Self {
        self.stdout = stdout.to_vec();
        self
    }

    pub fn consuming_stdin(mut self) -> Self {
        self.consume_stdin = true;
        self
    }
}

#[derive(Debug, Default)]
struct Filesystem {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl Filesystem {
    fn new() -> Self {
        let mut fs = Self::default();
        fs.dirs.insert("/".to_string());
        fs
    }

    fn mkdir_all(&mut self, path: &str) {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.dirs.insert(current.clone());
        }
    }

    fn parent_exists(&self, path: &str) -> bool {
        self.dirs.contains(&parent(path))
    }
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<ExecTarget, Filesystem>,
    secrets: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
    calls: Vec<Call>,
    faults: VecDeque<Fault>,
    gpg_verbose: bool,
}

impl State {
    fn fs(&mut self, target: &ExecTarget) -> &mut Filesystem {
        self.containers
            .entry(target.clone())
            .or_insert_with(Filesystem::new)
    }

    fn take_fault(&mut self, program: &str) -> Option<Fault> {
        let idx = self.faults.iter().position(|f| f.program == program)?;
        self.faults.remove(idx)
    }
}

/// What a command produced.
struct Outcome {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<u32>,
}

impl Outcome {
    fn ok() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
        }
    }

    fn stdout(stdout: Vec<u8>) -> Self {
        Self {
            stdout,
            ..Self::ok()
        }
    }

    fn fail(code: u32, stderr: String) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into_bytes(),
            exit_code: Some(code),
        }
    }
}

/// In-memory cluster. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `data` at `path`, creating parent directories.
    pub fn put_file(&self, target: &ExecTarget, path: &str, data: &[u8]) {
        let mut state = self.lock();
        let fs = state.fs(target);
        fs.mkdir_all(&parent(path));
        fs.files.insert(path.to_string(), data.to_vec());
    }

    pub fn file(&self, target: &ExecTarget, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .containers
            .get(target)
            .and_then(|fs| fs.files.get(path).cloned())
    }

    pub fn has_dir(&self, target: &ExecTarget, path: &str) -> bool {
        self.lock()
            .containers
            .get(target)
            .is_some_and(|fs| fs.dirs.contains(path))
    }

    pub fn set_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
        self.lock()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
    }

    /// Install the default backup secret with `passphrase` in `namespace`.
    pub fn set_passphrase(&self, namespace: &str, passphrase: &str) {
        let data = BTreeMap::from([(
            ferry_core::crypto::DEFAULT_SECRET_KEY.to_string(),
            passphrase.as_bytes().to_vec(),
        )]);
        self.set_secret(namespace, ferry_core::crypto::DEFAULT_SECRET_NAME, data);
    }

    pub fn push_fault(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Argument vectors of every call so far.
    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.lock().calls.iter().map(|c| c.argv.clone()).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make successful `gpg --decrypt` runs print the informational lines
    /// real gpg writes to stderr.
    pub fn set_gpg_verbose(&self, verbose: bool) {
        self.lock().gpg_verbose = verbose;
    }

    fn run(&self, target: &ExecTarget, argv: &[String], stdin: Option<&[u8]>) -> Outcome {
        let mut state = self.lock();
        let gpg_verbose = state.gpg_verbose;
        let fs = state.fs(target);
        let program = argv.first().map(String::as_str).unwrap_or_default();
        let args: Vec<&str> = argv.iter().skip(1).map(String::as_str).collect();

        match (program, args.as_slice()) {
            ("mkdir", ["-p", dir]) => {
                fs.mkdir_all(dir);
                Outcome::ok()
            }
            ("touch", [path]) => {
                if !fs.parent_exists(path) {
                    return Outcome::fail(
                        1,
                        format!("touch: cannot touch '{path}': No such file or directory\n"),
                    );
                }
                fs.files.entry(path.to_string()).or_default();
                Outcome::ok()
            }
            ("cp", ["/dev/stdin", path]) => {
                if !fs.parent_exists(path) {
                    return Outcome::fail(
                        1,
                        format!("cp: cannot create regular file '{path}': No such file or directory\n"),
                    );
                }
                fs.files
                    .insert(path.to_string(), stdin.unwrap_or_default().to_vec());
                Outcome::ok()
            }
            ("cat", [path]) => match fs.files.get(*path) {
                Some(data) => Outcome::stdout(data.clone()),
                None => Outcome::fail(1, format!("cat: {path}: No such file or directory\n")),
            },
            ("rm", [path]) => match fs.files.remove(*path) {
                Some(_) => Outcome::ok(),
                None => Outcome::fail(
                    1,
                    format!("rm: cannot remove '{path}': No such file or directory\n"),
                ),
            },
            ("find", [root, "-type", kind, "-name", pattern]) => find(fs, root, kind, pattern),
            ("gpg", _) => gpg(fs, &args, stdin, gpg_verbose),
            _ => Outcome::fail(127, format!("sh: {program}: not found\n")),
        }
    }
}

fn parent(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn find(fs: &Filesystem, root: &str, kind: &str, pattern: &str) -> Outcome {
    let root = root.trim_end_matches('/');
    let root = if root.is_empty() { "/" } else { root };
    if !fs.dirs.contains(root) && !fs.files.contains_key(root) {
        return Outcome::fail(1, format!("find: '{root}': No such file or directory\n"));
    }
    let matcher = match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher(),
        Err(_) => return Outcome::fail(1, format!("find: bad pattern '{pattern}'\n")),
    };

    let candidates: Vec<&String> = match kind {
        "f" => fs.files.keys().collect(),
        "d" => fs.dirs.iter().collect(),
        _ => return Outcome::fail(1, format!("find: Unknown argument to -type: {kind}\n")),
    };
    let prefix = if root == "/" {
        "/".to_string()
    } else {
        format!("{root}/")
    };

    let mut out = String::new();
    for path in candidates {
        let below = path.as_str() == root || path.starts_with(&prefix);
        let name = path.rsplit('/').next().unwrap_or_default();
        if below && matcher.is_match(name) {
            out.push_str(path);
            out.push('\n');
        }
    }
    Outcome::stdout(out.into_bytes())
}

fn gpg(fs: &mut Filesystem, args: &[&str], stdin: Option<&[u8]>, verbose: bool) -> Outcome {
    let value_after = |flag: &str| {
        args.iter()
            .position(|a| *a == flag)
            .and_then(|idx| args.get(idx + 1))
            .copied()
    };
    let Some(passphrase) = value_after("--passphrase") else {
        return Outcome::fail(2, "gpg: no passphrase given\n".to_string());
    };
    let output = value_after("--output").or_else(|| value_after("-o"));
    let input = args.last().copied().unwrap_or_default();

    let data = if input == "-" {
        stdin.unwrap_or_default().to_vec()
    } else {
        match fs.files.get(input) {
            Some(data) => data.clone(),
            None => {
                return Outcome::fail(2, format!("gpg: can't open '{input}': No such file or directory\n"));
            }
        }
    };

    let produced = if args.contains(&"--symmetric") {
        encrypt(passphrase, &data)
    } else if args.contains(&"--decrypt") {
        match decrypt(&data) {
            Some((key, plain)) if key == passphrase => plain,
            Some(_) => {
                return Outcome::fail(2, "gpg: decryption failed: Bad session key\n".to_string());
            }
            None => {
                return Outcome::fail(
                    2,
                    format!("{DOWNGRADE_TOKEN}\ngpg: decrypt_message failed: Unknown system error\n"),
                );
            }
        }
    } else {
        return Outcome::fail(2, "gpg: no command given\n".to_string());
    };

    let mut outcome = match output {
        Some("-") | None => Outcome::stdout(produced),
        Some(path) => {
            if !fs.parent_exists(path) {
                return Outcome::fail(2, format!("gpg: can't create '{path}': No such file or directory\n"));
            }
            fs.files.insert(path.to_string(), produced);
            Outcome::ok()
        }
    };
    if verbose && args.contains(&"--decrypt") {
        outcome.stderr = b"gpg: AES256.CFB encrypted data\ngpg: encrypted with 1 passphrase\n".to_vec();
    }
    outcome
}

#[async_trait]
impl ExecTransport for FakeCluster {
    async fn exec(
        &self,
        target: &ExecTarget,
        argv: &[String],
        stdin: Option<&mut (dyn AsyncRead + Send + Unpin)>,
        stdout: Option<&mut (dyn AsyncWrite + Send + Unpin)>,
    ) -> Result<Vec<u8>, ExecError> {
        let program = argv.first().cloned().unwrap_or_default();
        let fault = self.lock().take_fault(&program);

        let drain = match &fault {
            Some(fault) => fault.consume_stdin,
            None => true,
        };
        let input = match stdin {
            Some(stdin) if drain => {
                let mut buf = Vec::new();
                stdin
                    .read_to_end(&mut buf)
                    .await
                    .map_err(|e| ExecError::new(format!("stdin: {e}"), Vec::new()))?;
                Some(buf)
            }
            _ => None,
        };

        self.lock().calls.push(Call {
            target: target.clone(),
            argv: argv.to_vec(),
            stdin: input.clone(),
        });

        let outcome = match fault {
            Some(fault) => {
                if let Some(out) = stdout {
                    let _ = out.write_all(&fault.stdout).await;
                }
                return match fault.transport {
                    Some(message) => Err(ExecError::new(message, fault.stderr)),
                    None => Ok(fault.stderr),
                };
            }
            None => self.run(target, argv, input.as_deref()),
        };

        if let Some(out) = stdout {
            out.write_all(&outcome.stdout)
                .await
                .map_err(|e| ExecError::new(format!("stdout: {e}"), Vec::new()))?;
        }
        match outcome.exit_code {
            None => Ok(outcome.stderr),
            Some(code) => Err(ExecError::new(
                format!("command terminated with exit code {code}"),
                outcome.stderr,
            )),
        }
    }
}

#[async_trait]
impl SecretSource for FakeCluster {
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, TransferError> {
        self.lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| TransferError::Transport {
                message: format!("secrets \"{name}\" not found"),
            })
    }
}
