//! Symmetric encryption policy for container transfers.
//!
//! Encryption happens inside the container with `gpg`; nothing here touches
//! key material beyond passing the passphrase on the command line.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::exec::SecretSource;

/// Secret looked up in the transfer's namespace.
pub const DEFAULT_SECRET_NAME: &str = "backup-secret";
/// Key inside [`DEFAULT_SECRET_NAME`] holding the passphrase.
pub const DEFAULT_SECRET_KEY: &str = "passphrase";
/// gpg's complaint when the decrypting write is fed plaintext.
pub const DOWNGRADE_TOKEN: &str = "gpg: no valid OpenPGP data found.";

/// Whether transfers for a namespace are wrapped in gpg.
#[derive(Clone, PartialEq, Eq)]
pub enum Encryption {
    Off,
    On { passphrase: String },
}

impl Encryption {
    pub fn is_on(&self) -> bool {
        matches!(self, Encryption::On { .. })
    }
}

impl fmt::Debug for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encryption::Off => f.write_str("Off"),
            Encryption::On { .. } => f.write_str("On { passphrase: <redacted> }"),
        }
    }
}

/// Where the [`Encryption`] for a transfer comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionPolicy {
    /// Read `secret_name` in the namespace on every transfer. Encryption is
    /// on whenever the secret can be read.
    Probe {
        secret_name: String,
        secret_key: String,
    },
    /// Use the same setting for every namespace.
    Fixed(Encryption),
}

impl Default for EncryptionPolicy {
    fn default() -> Self {
        EncryptionPolicy::Probe {
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
        }
    }
}

impl EncryptionPolicy {
    /// Resolve the setting for `namespace`.
    ///
    /// A secret that cannot be read means `Off`. A readable secret without
    /// the key still means `On`, with an empty passphrase.
    pub async fn resolve(&self, secrets: &dyn SecretSource, namespace: &str) -> Encryption {
        match self {
            EncryptionPolicy::Fixed(encryption) => encryption.clone(),
            EncryptionPolicy::Probe {
                secret_name,
                secret_key,
            } => match secrets.read_secret(namespace, secret_name).await {
                Ok(data) => {
                    let passphrase = data
                        .get(secret_key)
                        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                        .unwrap_or_default();
                    Encryption::On { passphrase }
                }
                Err(e) => {
                    tracing::debug!(
                        namespace,
                        secret = %secret_name,
                        error = %e,
                        "encryption secret not readable, transferring in plaintext"
                    );
                    Encryption::Off
                }
            },
        }
    }
}

/// gpg invocation used on the read path when encryption is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadCipherMode {
    /// `gpg --symmetric`: the file is encrypted on its way out.
    #[default]
    Symmetric,
    /// `gpg --decrypt`: the file is decrypted on its way out.
    Decrypt,
}

/// Command that streams the file at `path` to stdout.
pub fn read_command(path: &str, encryption: &Encryption, mode: ReadCipherMode) -> Vec<String> {
    match encryption {
        Encryption::Off => args(&["cat", path]),
        Encryption::On { passphrase } => {
            let operation = match mode {
                ReadCipherMode::Symmetric => "--symmetric",
                ReadCipherMode::Decrypt => "--decrypt",
            };
            args(&[
                "gpg",
                "--homedir",
                "/tmp",
                "--batch",
                "--cipher-algo",
                "AES256",
                "--passphrase",
                passphrase,
                "-o",
                "-",
                operation,
                path,
            ])
        }
    }
}

/// Command that writes stdin to `path` unchanged.
pub fn plain_copy_command(path: &str) -> Vec<String> {
    args(&["cp", "/dev/stdin", path])
}

/// Command that decrypts stdin into `path`.
pub fn decrypt_write_command(path: &str, passphrase: &str) -> Vec<String> {
    args(&[
        "gpg",
        "--homedir",
        "/tmp",
        "--batch",
        "--yes",
        "--cipher-algo",
        "AES256",
        "--passphrase",
        passphrase,
        "--output",
        path,
        "--decrypt",
        "-",
    ])
}

/// True when `stderr` says the decrypting write was given plaintext.
pub fn is_downgrade_signal(stderr: &[u8]) -> bool {
    String::from_utf8_lossy(stderr).contains(DOWNGRADE_TOKEN)
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_read_is_cat() {
        assert_eq!(
            read_command("/tmp/a", &Encryption::Off, ReadCipherMode::Symmetric),
            vec!["cat", "/tmp/a"]
        );
    }

    #[test]
    fn encrypted_read_keeps_symmetric_form() {
        let enc = Encryption::On {
            passphrase: "s3cret".to_string(),
        };
        let argv = read_command("/tmp/a", &enc, ReadCipherMode::Symmetric);
        assert_eq!(
            argv,
            vec![
                "gpg", "--homedir", "/tmp", "--batch", "--cipher-algo", "AES256",
                "--passphrase", "s3cret", "-o", "-", "--symmetric", "/tmp/a",
            ]
        );

        let argv = read_command("/tmp/a", &enc, ReadCipherMode::Decrypt);
        assert_eq!(argv[10], "--decrypt");
        assert_eq!(argv[11], "/tmp/a");
    }

    #[test]
    fn write_commands() {
        assert_eq!(plain_copy_command("/x"), vec!["cp", "/dev/stdin", "/x"]);
        assert_eq!(
            decrypt_write_command("/x", "pw"),
            vec![
                "gpg", "--homedir", "/tmp", "--batch", "--yes", "--cipher-algo", "AES256",
                "--passphrase", "pw", "--output", "/x", "--decrypt", "-",
            ]
        );
    }

    #[test]
    fn downgrade_token_detection() {
        assert!(is_downgrade_signal(
            b"gpg: no valid OpenPGP data found.\ngpg: decrypt_message failed: Unknown system error\n"
        ));
        assert!(!is_downgrade_signal(b"gpg: decryption failed: Bad session key\n"));
        assert!(!is_downgrade_signal(b""));
    }

    #[test]
    fn debug_redacts_passphrase() {
        let enc = Encryption::On {
            passphrase: "hunter2".to_string(),
        };
        assert!(!format!("{enc:?}").contains("hunter2"));
    }
}
