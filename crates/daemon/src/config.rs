//! Daemon configuration

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Default log level when RUST_LOG is unset
    pub log_level: String,

    /// Log output format
    pub log_format: LogFormat,

    /// Reconciliation period in milliseconds
    pub reconcile_interval_ms: u64,

    /// WireGuard configuration
    pub wireguard: WireGuardConfig,

    /// Packet filter configuration
    pub firewall: FirewallConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: wgnet_common::default_store_path(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            reconcile_interval_ms: 1000,
            wireguard: WireGuardConfig::default(),
            firewall: FirewallConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// WireGuard interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireGuardConfig {
    /// Apply peers to the interface; otherwise they are only logged
    pub enabled: bool,

    /// Interface name
    pub iface: String,

    /// Listen port
    pub port: u16,

    /// Gateway address and overlay prefix
    pub cidr: String,

    /// Path to the wg(8) binary
    pub binary: PathBuf,
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            iface: "wg0".to_string(),
            port: 51820,
            cidr: wgnet_common::DEFAULT_CIDR.to_string(),
            binary: PathBuf::from("/usr/bin/wg"),
        }
    }
}

/// nftables configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Apply set updates; otherwise they are only logged
    pub enabled: bool,

    /// Path to the nft(8) binary
    pub binary: PathBuf,

    /// Table family
    pub family: String,

    /// Table holding the sets
    pub table: String,

    /// Set of addresses trusted for manager SSH
    pub trust_set: String,

    /// Set of manager device addresses
    pub manager_set: String,

    /// Set of device addresses allowed to forward to the WAN
    pub forward_set: String,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: PathBuf::from("/usr/sbin/nft"),
            family: "inet".to_string(),
            table: "wgnet".to_string(),
            trust_set: "trust_ipset".to_string(),
            manager_set: "manager_ipset".to_string(),
            forward_set: "forward_wan_ipset".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }

    /// Overlay network; its address part is the gateway's own address
    pub fn network(&self) -> anyhow::Result<Ipv4Network> {
        self.wireguard
            .cidr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid wireguard.cidr {:?}: {}", self.wireguard.cidr, e))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms.max(1))
    }
}
