mod config;
mod cp_cmd;
mod ls_cmd;
mod rm_cmd;

use clap::{CommandFactory, Parser, Subcommand};

use ferry_core::FileKind;

use config::{CliOverrides, EncryptionMode, FerryConfig};

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Copy files between Kubernetes containers, Swift object storage and local disk",
    after_help = "Addresses: k8s://<namespace>/<pod>/<container>/<path>, swift://<bucket>/<key>, file://<path> or a plain local path"
)]
struct Cli {
    /// Encryption for container transfers (overrides FERRY_ENCRYPTION env var)
    #[arg(long, global = true, value_enum)]
    encryption: Option<EncryptionMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a ferry config file
    Init {
        /// Keystone URL for Swift authentication
        #[arg(long)]
        swift_auth_url: Option<String>,
        /// Swift user name
        #[arg(long)]
        swift_user: Option<String>,
        /// Swift tenant (project)
        #[arg(long)]
        swift_tenant: Option<String>,
        /// Swift user and project domain
        #[arg(long)]
        swift_domain: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Copy a file (or, with --recursive, every file below a path)
    Cp {
        /// Source address
        src: String,
        /// Destination address
        dst: String,
        /// Copy every file below the source, keeping relative paths
        #[arg(short, long)]
        recursive: bool,
        /// Concurrent copies with --recursive (overrides FERRY_PARALLEL env var)
        #[arg(long)]
        parallel: Option<usize>,
    },
    /// List files below an address
    Ls {
        /// Address to list
        address: String,
        /// Entry type: f (files) or d (directories)
        #[arg(long = "type", default_value = "f", value_parser = parse_kind)]
        kind: FileKind,
        /// Shell pattern matched against entry names
        #[arg(long, default_value = "*")]
        name: String,
    },
    /// Remove a file
    Rm {
        /// Address of the file to remove
        address: String,
    },
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

fn parse_kind(s: &str) -> Result<FileKind, String> {
    s.parse().map_err(|e: ferry_core::TransferError| e.to_string())
}

/// Execute the `ferry init` command: write config file.
fn cmd_init(swift: ferry_core::SwiftSettings, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        swift,
        ..Default::default()
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!();
    println!("Set SWIFT_API_KEY (or swift.key in the file) before using swift:// addresses.");

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = CliOverrides {
        encryption: cli.encryption,
        parallel: None,
    };

    match cli.command {
        Commands::Init {
            swift_auth_url,
            swift_user,
            swift_tenant,
            swift_domain,
            force,
        } => {
            let swift = ferry_core::SwiftSettings {
                user: swift_user,
                key: None,
                auth_url: swift_auth_url,
                tenant: swift_tenant,
                domain: swift_domain,
            };
            cmd_init(swift, force)?;
        }
        Commands::Cp {
            src,
            dst,
            recursive,
            parallel,
        } => {
            let config = FerryConfig::resolve(CliOverrides {
                parallel,
                ..overrides
            })?;
            cp_cmd::run_cp(&src, &dst, recursive, &config).await?;
        }
        Commands::Ls {
            address,
            kind,
            name,
        } => {
            let config = FerryConfig::resolve(overrides)?;
            ls_cmd::run_ls(&address, kind, &name, &config).await?;
        }
        Commands::Rm { address } => {
            let config = FerryConfig::resolve(overrides)?;
            rm_cmd::run_rm(&address, &config).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "ferry", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    // Serializes tests that modify environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_cp_flags() {
        let cli = Cli::try_parse_from([
            "ferry",
            "--encryption",
            "off",
            "cp",
            "-r",
            "--parallel",
            "4",
            "k8s://ns/pod/c/var/log",
            "swift://logs",
        ])
        .unwrap();
        assert_eq!(cli.encryption, Some(EncryptionMode::Off));
        match cli.command {
            Commands::Cp {
                src,
                dst,
                recursive,
                parallel,
            } => {
                assert_eq!(src, "k8s://ns/pod/c/var/log");
                assert_eq!(dst, "swift://logs");
                assert!(recursive);
                assert_eq!(parallel, Some(4));
            }
            _ => panic!("expected cp"),
        }
    }

    #[test]
    fn ls_type_accepts_f_and_d_only() {
        let cli = Cli::try_parse_from(["ferry", "ls", "--type", "d", "/tmp"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ls {
                kind: FileKind::Directory,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["ferry", "ls", "--type", "x", "/tmp"]).is_err());
    }
}
