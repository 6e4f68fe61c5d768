//! WireGuard client configuration rendering

use crate::keys::{PrivateKey, PublicKey};
use crate::types::Device;
use ipnetwork::Ipv4Network;

/// Server side of a client configuration
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub public_key: PublicKey,
    /// Gateway interface address and prefix, e.g. `172.16.0.1/24`
    pub network: Ipv4Network,
    /// Public `host:port` clients dial, if known
    pub endpoint: Option<String>,
    pub keepalive: Option<u16>,
}

/// Render a `wg-quick` style configuration for `device`.
///
/// Without the private key a placeholder is written for the user to fill in.
pub fn render_client_config(device: &Device, private_key: Option<&PrivateKey>, server: &ServerInfo) -> String {
    let private_key = private_key
        .map(|k| k.to_base64())
        .unwrap_or_else(|| "<insert device private key>".to_string());

    let allowed_ips = device
        .allowed_networks()
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let endpoint_line = server
        .endpoint
        .as_ref()
        .map(|e| format!("Endpoint = {}", e))
        .unwrap_or_else(|| "# Endpoint = your-server:51820".to_string());

    let keepalive_line = server
        .keepalive
        .map(|k| format!("PersistentKeepalive = {}\n", k))
        .unwrap_or_default();

    format!(
        r#"# WireGuard configuration for {label}
# Device public key: {device_pubkey}

[Interface]
PrivateKey = {private_key}
Address = {address}/{prefix}

[Peer]
PublicKey = {server_pubkey}
AllowedIPs = {allowed_ips}
{endpoint_line}
{keepalive_line}"#,
        label = device.label,
        device_pubkey = device.public_key,
        private_key = private_key,
        address = device.address,
        prefix = server.network.prefix(),
        server_pubkey = server.public_key,
        allowed_ips = allowed_ips,
        endpoint_line = endpoint_line,
        keepalive_line = keepalive_line,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use uuid::Uuid;

    fn device(wan_forward: bool) -> (Device, KeyPair) {
        let kp = KeyPair::generate();
        let device = Device {
            address: "172.16.0.7".parse().unwrap(),
            network: "172.16.0.1/24".parse().unwrap(),
            public_key: kp.public_key,
            user_id: Uuid::new_v4(),
            label: "laptop".to_string(),
            wan_forward,
            allowed_networks: Vec::new(),
        };
        (device, kp)
    }

    fn server(endpoint: Option<&str>) -> ServerInfo {
        ServerInfo {
            public_key: KeyPair::generate().public_key,
            network: "172.16.0.1/24".parse().unwrap(),
            endpoint: endpoint.map(str::to_string),
            keepalive: Some(25),
        }
    }

    #[test]
    fn test_render_with_private_key() {
        let (d, kp) = device(false);
        let srv = server(Some("vpn.example.org:51820"));
        let cfg = render_client_config(&d, Some(&kp.private_key), &srv);

        assert!(cfg.contains(&format!("PrivateKey = {}", kp.private_key.to_base64())));
        assert!(cfg.contains("Address = 172.16.0.7/24"));
        assert!(!cfg.contains("DNS ="));
        assert!(cfg.contains(&format!("PublicKey = {}", srv.public_key)));
        assert!(cfg.contains("AllowedIPs = 172.16.0.0/24"));
        assert!(cfg.contains("Endpoint = vpn.example.org:51820"));
        assert!(cfg.contains("PersistentKeepalive = 25"));
    }

    #[test]
    fn test_render_wan_forward_without_key() {
        let (d, _) = device(true);
        let cfg = render_client_config(&d, None, &server(None));
        assert!(cfg.contains("AllowedIPs = 0.0.0.0/0"));
        assert!(cfg.contains("PrivateKey = <insert device private key>"));
        assert!(cfg.contains("# Endpoint = your-server:51820"));
        // no resolver listens on the gateway, the client keeps its own
        assert!(!cfg.contains("DNS ="));
    }
}
