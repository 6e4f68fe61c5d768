//! wgnet Daemon
//!
//! Keeps the packet filter sets and WireGuard peers in line with the
//! persisted device model.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod adapters;
mod config;
mod nft;
mod reconciler;
mod wg;

use adapters::{LogOnly, PacketFilter, PeerControl};
use config::{DaemonConfig, LogFormat};

#[derive(Parser)]
#[command(name = "wgnetd")]
#[command(about = "wgnet daemon - WireGuard overlay reconciler")]
#[command(version)]
struct Cli {
    /// Configuration file path [default: <store>/config.toml]
    #[arg(short, long, env = "WGNET_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long, env = "WGNET_STORE")]
    store: Option<PathBuf>,

    /// Reconciliation interval in milliseconds
    #[arg(short, long, env = "WGNET_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(config: &DaemonConfig, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration, command line wins over the file
    let config_path = cli.config.clone().unwrap_or_else(|| {
        cli.store
            .clone()
            .unwrap_or_else(wgnet_common::default_store_path)
            .join("config.toml")
    });
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(ms) = cli.interval_ms {
        config.reconcile_interval_ms = ms;
    }

    init_logging(&config, cli.debug);

    info!("wgnet daemon v{}", env!("CARGO_PKG_VERSION"));

    let network = config.network()?;
    let db = wgnet_common::Database::open(config.db_path())?;
    let keys = wgnet_common::server_keypair(&db)?;
    info!("Server public key: {}", keys.public_key);

    let filter: Arc<dyn PacketFilter> = if config.firewall.enabled {
        let sets = nft::NftSets::new(&config.firewall);
        sets.ensure_sets().await?;
        Arc::new(sets)
    } else {
        warn!("Firewall disabled, address set updates are only logged");
        Arc::new(LogOnly)
    };

    let control: Arc<dyn PeerControl> = if config.wireguard.enabled {
        let wg = wg::WgCommand::new(&config.wireguard);
        wg.init(&keys.private_key).await?;
        Arc::new(wg)
    } else {
        warn!("WireGuard control disabled, peer updates are only logged");
        Arc::new(LogOnly)
    };

    let mut reconciler = reconciler::Reconciler::new(db, filter, control, config.reconcile_interval());

    // The store must be readable before we go into the background loop
    let report = reconciler.tick().await?;
    info!("Initial sync: {}", report);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx));

    info!("Daemon started for {} on {}", network, config.wireguard.iface);

    // Wait for shutdown signal
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            None
        }
        result = &mut reconciler_handle => Some(result),
    };

    let result = match finished {
        Some(result) => result,
        None => {
            let _ = shutdown_tx.send(true);
            reconciler_handle.await
        }
    };
    if let Err(e) = result {
        tracing::error!("Reconciler error: {}", e);
    }

    info!("Daemon shutdown complete");
    Ok(())
}
