//! wgnet CLI - Main Entry Point
//!
//! Administers users, devices and the manager trust list directly in the
//! daemon's store. The daemon picks changes up on its next tick.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ipnetwork::Ipv4Network;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use wgnet_common::{Database, Provisioner};

mod commands;
mod output;

use commands::{device, server, trust, user};

/// wgnet CLI - WireGuard overlay administration
#[derive(Parser)]
#[command(name = "wgnet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Database path [default: ~/.wgnet/state.db]
    #[arg(long, env = "WGNET_DB", global = true)]
    db: Option<PathBuf>,

    /// Daemon configuration file [default: config.toml next to the database]
    #[arg(long, env = "WGNET_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Gateway address and overlay prefix [default: the daemon's wireguard.cidr]
    #[arg(long, env = "WGNET_CIDR", global = true)]
    cidr: Option<Ipv4Network>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    #[command(subcommand)]
    User(user::UserCommands),

    /// Manage devices
    #[command(subcommand)]
    Device(device::DeviceCommands),

    /// Manage the manager SSH trust list
    #[command(subcommand)]
    Trust(trust::TrustCommands),

    /// Server identity and network
    #[command(subcommand)]
    Server(server::ServerCommands),

    /// Show version information
    Version,
}

/// The part of the daemon's configuration file the CLI shares
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DaemonFile {
    wireguard: WireGuardSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WireGuardSection {
    cidr: String,
}

impl Default for WireGuardSection {
    fn default() -> Self {
        Self {
            cidr: wgnet_common::DEFAULT_CIDR.to_string(),
        }
    }
}

/// Network the daemon serves, read from its configuration file
fn daemon_network(path: &Path) -> anyhow::Result<Ipv4Network> {
    let file: DaemonFile = if path.exists() {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
    } else {
        DaemonFile::default()
    };
    file.wireguard
        .cidr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid wireguard.cidr {:?}: {}", file.wireguard.cidr, e))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Version = cli.command {
        println!("wgnet CLI v{}", wgnet_common::VERSION);
        return Ok(());
    }

    let db_path = cli.db.unwrap_or_else(wgnet_common::default_db_path);
    let network = match cli.cidr {
        Some(cidr) => cidr,
        None => {
            let config = cli.config.unwrap_or_else(|| db_path.with_file_name("config.toml"));
            daemon_network(&config)?
        }
    };
    tracing::debug!("Using store {:?} for {}", db_path, network);
    let db = Database::open(&db_path)?;
    let prov = Provisioner::new(db, network);

    match cli.command {
        Commands::User(cmd) => user::execute(cmd, &prov, cli.format)?,
        Commands::Device(cmd) => device::execute(cmd, &prov, cli.format)?,
        Commands::Trust(cmd) => trust::execute(cmd, &prov, cli.format)?,
        Commands::Server(cmd) => server::execute(cmd, &prov, cli.format)?,
        Commands::Version => {}
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
