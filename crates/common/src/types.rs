//! Core types for wgnet

use crate::keys::PublicKey;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use uuid::Uuid;

/// Maximum label length in bytes
pub const MAX_LABEL_LEN: usize = 255;

/// A device leasing one host address of the overlay network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Leased host address
    pub address: Ipv4Addr,
    /// Covering network the address was allocated from
    pub network: Ipv4Network,
    pub public_key: PublicKey,
    pub user_id: Uuid,
    pub label: String,
    pub wan_forward: bool,
    /// Explicit networks routed to the server, overriding the defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_networks: Vec<Ipv4Network>,
}

impl Device {
    /// The device's own address as a single-address network
    pub fn cidr(&self) -> Ipv4Network {
        host_network(self.address)
    }

    /// Networks a client routes through the tunnel
    pub fn allowed_networks(&self) -> Vec<Ipv4Network> {
        if !self.allowed_networks.is_empty() {
            self.allowed_networks.clone()
        } else if self.wan_forward {
            vec![Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap_or(self.network)]
        } else {
            vec![Ipv4Network::new(self.network.network(), self.network.prefix()).unwrap_or(self.network)]
        }
    }

    /// Server-side peer entry for this device
    pub fn to_peer(&self) -> Peer {
        Peer::new(self.cidr(), self.public_key)
    }
}

/// Single-address network for `addr`
pub fn host_network(addr: Ipv4Addr) -> Ipv4Network {
    Ipv4Network::from(addr)
}

/// Active session token and its expiry (unix seconds)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    pub token: String,
    pub expires: i64,
}

impl UserSession {
    pub fn is_empty(&self) -> bool {
        self.token.is_empty() && self.expires == 0
    }
}

/// A user owning devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub is_manager: bool,
    /// Base32 one-time-password secret, empty unless manager
    #[serde(default)]
    pub otp_secret: String,
    #[serde(default)]
    pub session: UserSession,
    /// Owned device addresses, ascending
    #[serde(default)]
    pub devices: Vec<Ipv4Addr>,
    pub created_at: i64,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            is_manager: false,
            otp_secret: String::new(),
            session: UserSession::default(),
            devices: Vec::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn set_manager(&mut self, otp_secret: String) {
        self.is_manager = true;
        self.otp_secret = otp_secret;
    }

    /// Drop manager privileges; sessions are manager-only so it goes too
    pub fn unset_manager(&mut self) {
        self.is_manager = false;
        self.otp_secret.clear();
        self.session = UserSession::default();
    }

    pub fn add_device(&mut self, addr: Ipv4Addr) {
        if let Err(i) = self.devices.binary_search(&addr) {
            self.devices.insert(i, addr);
        }
    }

    pub fn remove_device(&mut self, addr: Ipv4Addr) {
        if let Ok(i) = self.devices.binary_search(&addr) {
            self.devices.remove(i);
        }
    }
}

/// VPN peer as handed to the control plane
///
/// Built fresh from [`Device`] records on every reconciliation tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub network: Ipv4Network,
    pub public_key: PublicKey,
    pub allowed_networks: Vec<Ipv4Network>,
    pub endpoint: Option<SocketAddrV4>,
    pub keepalive: Option<Duration>,
}

impl Peer {
    pub fn new(network: Ipv4Network, public_key: PublicKey) -> Self {
        Self {
            network,
            public_key,
            allowed_networks: Vec::new(),
            endpoint: None,
            keepalive: None,
        }
    }

    /// Covering network first, then the extra networks without repeats
    pub fn allowed_ips(&self) -> Vec<Ipv4Network> {
        let mut ips = vec![self.network];
        for net in &self.allowed_networks {
            if !ips.contains(net) {
                ips.push(*net);
            }
        }
        ips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(addr: [u8; 4], wan_forward: bool) -> Device {
        Device {
            address: Ipv4Addr::from(addr),
            network: "172.16.0.1/24".parse().unwrap(),
            public_key: PublicKey::from_bytes([addr[3]; 32]),
            user_id: Uuid::new_v4(),
            label: "laptop".to_string(),
            wan_forward,
            allowed_networks: Vec::new(),
        }
    }

    #[test]
    fn test_device_allowed_networks() {
        let d = device([172, 16, 0, 2], false);
        assert_eq!(d.allowed_networks(), vec!["172.16.0.0/24".parse::<Ipv4Network>().unwrap()]);

        let d = device([172, 16, 0, 2], true);
        assert_eq!(d.allowed_networks(), vec!["0.0.0.0/0".parse::<Ipv4Network>().unwrap()]);

        let mut d = device([172, 16, 0, 2], true);
        d.allowed_networks = vec!["10.1.0.0/16".parse().unwrap()];
        assert_eq!(d.allowed_networks(), vec!["10.1.0.0/16".parse::<Ipv4Network>().unwrap()]);
    }

    #[test]
    fn test_device_peer() {
        let d = device([172, 16, 0, 9], false);
        let peer = d.to_peer();
        assert_eq!(peer.network.to_string(), "172.16.0.9/32");
        assert_eq!(peer.public_key, d.public_key);
        assert!(peer.allowed_networks.is_empty());
        assert!(peer.endpoint.is_none());
        assert!(peer.keepalive.is_none());
    }

    #[test]
    fn test_peer_allowed_ips_dedup() {
        let mut peer = Peer::new(host_network(Ipv4Addr::new(10, 0, 0, 1)), PublicKey::from_bytes([1; 32]));
        peer.allowed_networks = vec![
            "10.0.0.1/32".parse().unwrap(),
            "192.168.1.0/24".parse().unwrap(),
        ];
        let ips: Vec<String> = peer.allowed_ips().iter().map(|n| n.to_string()).collect();
        assert_eq!(ips, vec!["10.0.0.1/32", "192.168.1.0/24"]);
    }

    #[test]
    fn test_user_devices_stay_sorted() {
        let mut user = User::new("alice");
        user.add_device(Ipv4Addr::new(10, 0, 0, 3));
        user.add_device(Ipv4Addr::new(10, 0, 0, 1));
        user.add_device(Ipv4Addr::new(10, 0, 0, 3));
        user.add_device(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(
            user.devices,
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3)
            ]
        );

        user.remove_device(Ipv4Addr::new(10, 0, 0, 2));
        user.remove_device(Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(user.devices, vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 3)]);
    }

    #[test]
    fn test_unset_manager_clears_session() {
        let mut user = User::new("bob");
        user.set_manager("SECRET".to_string());
        user.session = UserSession {
            token: "t".repeat(20),
            expires: 42,
        };
        user.unset_manager();
        assert!(!user.is_manager);
        assert!(user.otp_secret.is_empty());
        assert!(user.session.is_empty());
    }
}
