//! WireGuard peers via wg(8)

use crate::adapters::{run_tool, PeerControl};
use crate::config::WireGuardConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;
use wgnet_common::{Peer, PrivateKey, Result};

/// Peer control backed by `wg set`
#[derive(Debug, Clone)]
pub struct WgCommand {
    binary: PathBuf,
    iface: String,
    port: u16,
}

impl WgCommand {
    pub fn new(config: &WireGuardConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            iface: config.iface.clone(),
            port: config.port,
        }
    }

    /// Load the server private key and listen port into the interface
    pub async fn init(&self, private_key: &PrivateKey) -> Result<()> {
        info!("Configuring {} on port {}", self.iface, self.port);
        let args = vec![
            "set".to_string(),
            self.iface.clone(),
            "listen-port".to_string(),
            self.port.to_string(),
            "private-key".to_string(),
            "/dev/stdin".to_string(),
        ];
        run_tool(&self.binary, &args, Some(&private_key.to_base64())).await
    }

    fn set_args(&self, peers: &[Peer]) -> Vec<String> {
        let mut args = vec!["set".to_string(), self.iface.clone()];
        for peer in peers {
            args.push("peer".to_string());
            args.push(peer.public_key.to_string());
            args.push("allowed-ips".to_string());
            args.push(
                peer.allowed_ips()
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            );
            if let Some(endpoint) = peer.endpoint {
                args.push("endpoint".to_string());
                args.push(endpoint.to_string());
            }
            if let Some(keepalive) = peer.keepalive.filter(|k| k.as_secs() > 0) {
                args.push("persistent-keepalive".to_string());
                args.push(keepalive.as_secs().to_string());
            }
        }
        args
    }

    fn remove_args(&self, peers: &[Peer]) -> Vec<String> {
        let mut args = vec!["set".to_string(), self.iface.clone()];
        for peer in peers {
            args.push("peer".to_string());
            args.push(peer.public_key.to_string());
            args.push("remove".to_string());
        }
        args
    }
}

#[async_trait]
impl PeerControl for WgCommand {
    async fn set_peers(&self, peers: &[Peer]) -> Result<()> {
        if peers.is_empty() {
            return Ok(());
        }
        run_tool(&self.binary, &self.set_args(peers), None).await
    }

    async fn remove_peers(&self, peers: &[Peer]) -> Result<()> {
        if peers.is_empty() {
            return Ok(());
        }
        run_tool(&self.binary, &self.remove_args(peers), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wgnet_common::PublicKey;

    fn wg() -> WgCommand {
        WgCommand::new(&WireGuardConfig::default())
    }

    #[test]
    fn test_set_args() {
        let key = PublicKey::from_bytes([1; 32]);
        let mut peer = Peer::new("172.16.0.2/32".parse().unwrap(), key);
        peer.allowed_networks = vec!["10.10.0.0/16".parse().unwrap()];
        peer.endpoint = Some("192.0.2.1:51820".parse().unwrap());
        peer.keepalive = Some(Duration::from_secs(25));

        let plain = Peer::new("172.16.0.3/32".parse().unwrap(), PublicKey::from_bytes([2; 32]));

        let args = wg().set_args(&[peer, plain.clone()]);
        assert_eq!(
            args,
            vec![
                "set".to_string(),
                "wg0".to_string(),
                "peer".to_string(),
                key.to_string(),
                "allowed-ips".to_string(),
                "172.16.0.2/32,10.10.0.0/16".to_string(),
                "endpoint".to_string(),
                "192.0.2.1:51820".to_string(),
                "persistent-keepalive".to_string(),
                "25".to_string(),
                "peer".to_string(),
                plain.public_key.to_string(),
                "allowed-ips".to_string(),
                "172.16.0.3/32".to_string(),
            ]
        );
    }

    #[test]
    fn test_remove_args() {
        let peer = Peer::new("172.16.0.2/32".parse().unwrap(), PublicKey::from_bytes([3; 32]));
        let args = wg().remove_args(&[peer.clone()]);
        assert_eq!(args[..2], ["set".to_string(), "wg0".to_string()]);
        assert_eq!(args[2..], ["peer".to_string(), peer.public_key.to_string(), "remove".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_peers_skip_binary() {
        let mut cfg = WireGuardConfig::default();
        cfg.binary = PathBuf::from("/nonexistent/wg");
        let wg = WgCommand::new(&cfg);
        wg.set_peers(&[]).await.unwrap();
        wg.remove_peers(&[]).await.unwrap();
    }
}
