//! nftables address sets
//!
//! Deltas are written as an `nft -f -` batch so each update is applied
//! atomically. `delete element` fails on a missing element, so removals are
//! preceded by a matching `add element` to keep re-application harmless.

use crate::adapters::{run_tool, PacketFilter};
use crate::config::FirewallConfig;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::info;
use wgnet_common::Result;

/// Packet filter backed by the nft(8) binary
#[derive(Debug, Clone)]
pub struct NftSets {
    binary: PathBuf,
    family: String,
    table: String,
    trust_set: String,
    manager_set: String,
    forward_set: String,
}

impl NftSets {
    pub fn new(config: &FirewallConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            family: config.family.clone(),
            table: config.table.clone(),
            trust_set: config.trust_set.clone(),
            manager_set: config.manager_set.clone(),
            forward_set: config.forward_set.clone(),
        }
    }

    /// Create the table and the three sets if they are missing
    pub async fn ensure_sets(&self) -> Result<()> {
        info!("Ensuring nftables sets in {} {}", self.family, self.table);
        self.apply(self.ensure_script()).await
    }

    fn ensure_script(&self) -> String {
        let mut script = format!("add table {} {}\n", self.family, self.table);
        for set in [&self.trust_set, &self.manager_set, &self.forward_set] {
            let _ = writeln!(
                script,
                "add set {} {} {} {{ type ipv4_addr; }}",
                self.family, self.table, set
            );
        }
        script
    }

    fn delta_script(&self, set: &str, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> String {
        let mut script = String::new();
        if !removed.is_empty() {
            let elems = join(removed);
            let _ = writeln!(script, "add element {} {} {} {{ {} }}", self.family, self.table, set, elems);
            let _ = writeln!(script, "delete element {} {} {} {{ {} }}", self.family, self.table, set, elems);
        }
        if !added.is_empty() {
            let _ = writeln!(
                script,
                "add element {} {} {} {{ {} }}",
                self.family,
                self.table,
                set,
                join(added)
            );
        }
        script
    }

    async fn update(&self, set: &str, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()> {
        let script = self.delta_script(set, removed, added);
        if script.is_empty() {
            return Ok(());
        }
        self.apply(script).await
    }

    async fn apply(&self, script: String) -> Result<()> {
        run_tool(&self.binary, &["-f".to_string(), "-".to_string()], Some(&script)).await
    }
}

fn join(addrs: &[Ipv4Addr]) -> String {
    addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

#[async_trait]
impl PacketFilter for NftSets {
    async fn update_trust(&self, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()> {
        self.update(&self.trust_set, removed, added).await
    }

    async fn update_managers(&self, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()> {
        self.update(&self.manager_set, removed, added).await
    }

    async fn update_forward(&self, removed: &[Ipv4Addr], added: &[Ipv4Addr]) -> Result<()> {
        self.update(&self.forward_set, removed, added).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sets() -> NftSets {
        NftSets::new(&FirewallConfig::default())
    }

    #[test]
    fn test_ensure_script() {
        let script = sets().ensure_script();
        assert_eq!(
            script,
            "add table inet wgnet\n\
             add set inet wgnet trust_ipset { type ipv4_addr; }\n\
             add set inet wgnet manager_ipset { type ipv4_addr; }\n\
             add set inet wgnet forward_wan_ipset { type ipv4_addr; }\n"
        );
    }

    #[test]
    fn test_delta_script() {
        let removed = [Ipv4Addr::new(172, 16, 0, 3)];
        let added = [Ipv4Addr::new(172, 16, 0, 2), Ipv4Addr::new(172, 16, 0, 4)];
        let script = sets().delta_script("manager_ipset", &removed, &added);
        assert_eq!(
            script,
            "add element inet wgnet manager_ipset { 172.16.0.3 }\n\
             delete element inet wgnet manager_ipset { 172.16.0.3 }\n\
             add element inet wgnet manager_ipset { 172.16.0.2, 172.16.0.4 }\n"
        );
    }

    #[test]
    fn test_empty_delta_script() {
        assert!(sets().delta_script("trust_ipset", &[], &[]).is_empty());
    }

    #[tokio::test]
    async fn test_empty_update_does_not_spawn() {
        let mut cfg = FirewallConfig::default();
        cfg.binary = PathBuf::from("/nonexistent/nft");
        let sets = NftSets::new(&cfg);
        sets.update_trust(&[], &[]).await.unwrap();
        assert!(sets.update_trust(&[], &[Ipv4Addr::new(10, 0, 0, 1)]).await.is_err());
    }
}
