//! Configuration file management for ferry.
//!
//! Provides a TOML-based config file at `~/.config/ferry/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use ferry_core::crypto::{DEFAULT_SECRET_KEY, DEFAULT_SECRET_NAME};
use ferry_core::stream::DEFAULT_REPLAY_WINDOW;
use ferry_core::{
    ContainerOptions, Encryption, EncryptionPolicy, ReadCipherMode, StoreConfig, SwiftSettings,
};

pub const ENV_PARALLEL: &str = "FERRY_PARALLEL";
pub const ENV_ENCRYPTION: &str = "FERRY_ENCRYPTION";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub swift: SwiftSettings,
    pub transfer: TransferSection,
    pub encryption: EncryptionSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    /// Concurrent copies for `cp --recursive`.
    pub parallel: usize,
    /// Source bytes kept in memory so a failed container write can restart.
    pub replay_window_bytes: usize,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            parallel: 1,
            replay_window_bytes: DEFAULT_REPLAY_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// Encrypt when the namespace has a readable passphrase secret.
    #[default]
    Probe,
    /// Never encrypt.
    Off,
}

impl std::str::FromStr for EncryptionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "probe" => Ok(EncryptionMode::Probe),
            "off" => Ok(EncryptionMode::Off),
            other => bail!("unknown encryption mode {other:?} (expected \"probe\" or \"off\")"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionSection {
    pub mode: EncryptionMode,
    pub secret_name: String,
    pub secret_key: String,
    pub read_mode: ReadCipherMode,
}

impl Default for EncryptionSection {
    fn default() -> Self {
        Self {
            mode: EncryptionMode::default(),
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            read_mode: ReadCipherMode::default(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the ferry config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/ferry` or `~/.config/ferry`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("ferry");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ferry")
}

/// Return the path to the ferry config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. `None` if it does not exist.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // Owner read/write only: the file may hold the Swift key.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct CliOverrides {
    pub encryption: Option<EncryptionMode>,
    pub parallel: Option<usize>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct FerryConfig {
    pub store: StoreConfig,
    pub parallel: usize,
}

impl FerryConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Swift settings: each `SWIFT_*` env var > `[swift]` field. Missing
    ///   values only fail once a Swift endpoint is connected.
    /// - Parallelism: `--parallel` > `FERRY_PARALLEL` > `transfer.parallel` > 1
    /// - Encryption: `--encryption` > `FERRY_ENCRYPTION` > `encryption.mode` > probe
    pub fn resolve(cli: CliOverrides) -> Result<Self> {
        let file = load_config()?.unwrap_or_default();

        let parallel = match cli.parallel {
            Some(n) => n,
            None => match std::env::var(ENV_PARALLEL) {
                Ok(value) => value
                    .parse()
                    .with_context(|| format!("{ENV_PARALLEL} is not a number: {value:?}"))?,
                Err(_) => file.transfer.parallel,
            },
        };
        if parallel == 0 {
            bail!("parallel must be at least 1");
        }

        let mode = match cli.encryption {
            Some(mode) => mode,
            None => match std::env::var(ENV_ENCRYPTION) {
                Ok(value) => value.parse()?,
                Err(_) => file.encryption.mode,
            },
        };
        let encryption = match mode {
            EncryptionMode::Probe => EncryptionPolicy::Probe {
                secret_name: file.encryption.secret_name,
                secret_key: file.encryption.secret_key,
            },
            EncryptionMode::Off => EncryptionPolicy::Fixed(Encryption::Off),
        };

        let store = StoreConfig {
            container: ContainerOptions {
                encryption,
                read_mode: file.encryption.read_mode,
                replay_window: file.transfer.replay_window_bytes,
            },
            swift: SwiftSettings::from_env().or(file.swift),
        };

        Ok(Self { store, parallel })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
