//! First-fit host address allocation
//!
//! The network's own address (`network.ip()`, e.g. `172.16.0.1` in
//! `172.16.0.1/24`) is the gateway's interface address and is never handed
//! out. Devices must be sorted ascending by address, which the store
//! guarantees by keying devices on their raw address bytes.

use crate::error::{AllocError, Error, Result};
use crate::keys::PublicKey;
use crate::types::Device;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Usable host range of a network, network and broadcast excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRange {
    pub first: Ipv4Addr,
    pub last: Ipv4Addr,
}

impl HostRange {
    /// `None` when the network has no host addresses (/31, /32)
    pub fn of(network: Ipv4Network) -> Option<Self> {
        let host_bits = 32 - u32::from(network.prefix());
        if host_bits < 2 {
            return None;
        }
        let base = u64::from(u32::from(network.network()));
        let size = 1u64 << host_bits;
        Some(Self {
            first: to_addr(base + 1),
            last: to_addr(base + size - 2),
        })
    }

    pub fn host_count(&self) -> u64 {
        u64::from(u32::from(self.last)) - u64::from(u32::from(self.first)) + 1
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.first <= addr && addr <= self.last
    }
}

/// Pick the next free host address in `network` for `public_key`.
///
/// `devices` must be sorted ascending by address. The earliest gap wins.
pub fn allocate(network: Ipv4Network, devices: &[Device], public_key: &PublicKey) -> Result<Ipv4Addr> {
    let range = HostRange::of(network).ok_or(AllocError::NetworkTooSmall)?;

    let gateway = network.ip();
    let capacity = range.host_count() - u64::from(range.contains(gateway));

    // devices outside the range were placed by hand and hold no lease here
    let occupied: Vec<Ipv4Addr> = devices
        .iter()
        .map(|d| d.address)
        .filter(|a| range.contains(*a) && *a != gateway)
        .collect();

    if occupied.len() as u64 >= capacity {
        return Err(AllocError::AddressSpaceExhausted.into());
    }

    if devices.iter().any(|d| d.public_key == *public_key) {
        return Err(AllocError::DuplicatePublicKey.into());
    }

    if let Some(pair) = occupied.windows(2).find(|w| w[0] >= w[1]) {
        return Err(Error::Internal(format!(
            "device addresses out of order: {} before {}",
            pair[0], pair[1]
        )));
    }

    let mut first = range.first;
    if first == gateway {
        first = successor(first).ok_or(AllocError::AddressSpaceExhausted)?;
    }

    let candidate = match occupied.first() {
        None => Some(first),
        Some(lowest) if first < *lowest => Some(first),
        Some(_) => scan(&occupied, gateway),
    };

    match candidate {
        Some(addr) if range.contains(addr) => Ok(addr),
        _ => Err(AllocError::AddressSpaceExhausted.into()),
    }
}

/// First address after an occupant that the next occupant does not hold
fn scan(occupied: &[Ipv4Addr], gateway: Ipv4Addr) -> Option<Ipv4Addr> {
    for (i, addr) in occupied.iter().enumerate() {
        let mut next = successor(*addr)?;
        if next == gateway {
            next = successor(next)?;
        }

        match occupied.get(i + 1) {
            None => return Some(next),
            Some(following) if next < *following => return Some(next),
            Some(_) => {}
        }
    }
    None
}

fn successor(addr: Ipv4Addr) -> Option<Ipv4Addr> {
    u32::from(addr).checked_add(1).map(Ipv4Addr::from)
}

fn to_addr(v: u64) -> Ipv4Addr {
    Ipv4Addr::from(v as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    fn key(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    fn device(network: Ipv4Network, addr: &str, key_byte: u8) -> Device {
        Device {
            address: addr.parse().unwrap(),
            network,
            public_key: key(key_byte),
            user_id: Uuid::nil(),
            label: format!("dev{}", key_byte),
            wan_forward: false,
            allowed_networks: Vec::new(),
        }
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_host_range() {
        let r = HostRange::of(net("10.0.0.0/29")).unwrap();
        assert_eq!(r.first, ip("10.0.0.1"));
        assert_eq!(r.last, ip("10.0.0.6"));
        assert_eq!(r.host_count(), 6);

        let r = HostRange::of(net("10.0.0.0/30")).unwrap();
        assert_eq!(r.host_count(), 2);

        assert!(HostRange::of(net("10.0.0.0/31")).is_none());
        assert!(HostRange::of(net("10.0.0.0/32")).is_none());

        let r = HostRange::of(net("0.0.0.0/0")).unwrap();
        assert_eq!(r.first, ip("0.0.0.1"));
        assert_eq!(r.last, ip("255.255.255.254"));
    }

    #[test]
    fn test_network_too_small() {
        for n in ["10.0.0.0/31", "10.0.0.0/32", "10.0.0.1/32"] {
            let err = allocate(net(n), &[], &key(1)).unwrap_err();
            assert_eq!(err.alloc(), Some(AllocError::NetworkTooSmall), "{}", n);
        }
    }

    #[test]
    fn test_first_allocation() {
        assert_eq!(allocate(net("10.0.0.0/29"), &[], &key(1)).unwrap(), ip("10.0.0.1"));
        // gateway holds the first host address
        assert_eq!(allocate(net("172.16.0.1/24"), &[], &key(1)).unwrap(), ip("172.16.0.2"));
    }

    #[test]
    fn test_appends_after_last_device() {
        let n = net("10.0.0.0/29");
        let devices = vec![device(n, "10.0.0.1", 1), device(n, "10.0.0.2", 2)];
        assert_eq!(allocate(n, &devices, &key(9)).unwrap(), ip("10.0.0.3"));
    }

    #[test]
    fn test_reuses_middle_gap() {
        let n = net("10.0.0.0/29");
        let devices = vec![device(n, "10.0.0.1", 1), device(n, "10.0.0.3", 3)];
        assert_eq!(allocate(n, &devices, &key(9)).unwrap(), ip("10.0.0.2"));
    }

    #[test]
    fn test_reuses_gap_before_first_device() {
        let n = net("10.0.0.0/29");
        let devices = vec![device(n, "10.0.0.2", 2), device(n, "10.0.0.3", 3)];
        assert_eq!(allocate(n, &devices, &key(9)).unwrap(), ip("10.0.0.1"));
    }

    #[test]
    fn test_prefers_earliest_gap() {
        let n = net("10.0.0.0/28");
        let devices = vec![
            device(n, "10.0.0.1", 1),
            device(n, "10.0.0.3", 3),
            device(n, "10.0.0.6", 6),
        ];
        assert_eq!(allocate(n, &devices, &key(9)).unwrap(), ip("10.0.0.2"));
    }

    #[test]
    fn test_skips_gateway_address() {
        let n = net("172.16.0.4/29");
        let devices = vec![
            device(n, "172.16.0.1", 1),
            device(n, "172.16.0.2", 2),
            device(n, "172.16.0.3", 3),
        ];
        assert_eq!(allocate(n, &devices, &key(9)).unwrap(), ip("172.16.0.5"));
    }

    #[test]
    fn test_slash30_is_smallest_network() {
        // one usable address besides the gateway
        let n = net("10.0.0.1/30");
        assert_eq!(allocate(n, &[], &key(1)).unwrap(), ip("10.0.0.2"));

        let devices = vec![device(n, "10.0.0.2", 1)];
        let err = allocate(n, &devices, &key(2)).unwrap_err();
        assert_eq!(err.alloc(), Some(AllocError::AddressSpaceExhausted));
    }

    #[test]
    fn test_exhausted_slash30() {
        let n = net("10.0.0.0/30");
        let devices = vec![device(n, "10.0.0.1", 1), device(n, "10.0.0.2", 2)];
        let err = allocate(n, &devices, &key(9)).unwrap_err();
        assert_eq!(err.alloc(), Some(AllocError::AddressSpaceExhausted));
    }

    #[test]
    fn test_exhausted_with_gateway_reserved() {
        let n = net("172.16.0.1/29");
        let devices: Vec<Device> = (2..=6)
            .map(|i| device(n, &format!("172.16.0.{}", i), i))
            .collect();
        let err = allocate(n, &devices, &key(9)).unwrap_err();
        assert_eq!(err.alloc(), Some(AllocError::AddressSpaceExhausted));
    }

    #[test]
    fn test_duplicate_key_even_with_gap() {
        let n = net("10.0.0.0/29");
        let devices = vec![device(n, "10.0.0.2", 2), device(n, "10.0.0.4", 4)];
        for k in [2, 4] {
            let err = allocate(n, &devices, &key(k)).unwrap_err();
            assert_eq!(err.alloc(), Some(AllocError::DuplicatePublicKey));
        }
    }

    #[test]
    fn test_gap_reuse_after_removal() {
        let n = net("10.0.0.0/29");
        let mut devices = Vec::new();
        for k in 1..=3u8 {
            let addr = allocate(n, &devices, &key(k)).unwrap();
            devices.push(Device {
                address: addr,
                ..device(n, "10.0.0.1", k)
            });
        }
        assert_eq!(
            devices.iter().map(|d| d.address).collect::<Vec<_>>(),
            vec![ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.3")]
        );

        devices.remove(1);
        assert_eq!(allocate(n, &devices, &key(7)).unwrap(), ip("10.0.0.2"));
    }

    #[test]
    fn test_unsorted_devices_rejected() {
        let n = net("10.0.0.0/29");
        let devices = vec![device(n, "10.0.0.3", 3), device(n, "10.0.0.1", 1)];
        let err = allocate(n, &devices, &key(9)).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_ignores_devices_outside_range() {
        let n = net("10.0.0.0/30");
        let devices = vec![device(n, "10.0.0.1", 1), device(n, "192.168.0.1", 5)];
        assert_eq!(allocate(n, &devices, &key(9)).unwrap(), ip("10.0.0.2"));
    }
}
