//! Server Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use wgnet_common::{server_keypair, HostRange, Provisioner};

use crate::output::{print_item, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ServerCommands {
    /// Show the server public key, generating the key pair if needed
    Key,

    /// Show the overlay network and its address usage
    Info,
}

#[derive(Serialize)]
struct KeyDisplay {
    public_key: String,
}

impl TableDisplay for KeyDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Public Key"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.public_key.clone()]
    }
}

#[derive(Serialize)]
struct InfoDisplay {
    network: String,
    gateway: String,
    first_host: Option<String>,
    last_host: Option<String>,
    capacity: u64,
    devices: usize,
    users: usize,
}

impl TableDisplay for InfoDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Network", "Gateway", "Hosts", "Capacity", "Devices", "Users"]
    }

    fn row(&self) -> Vec<String> {
        let hosts = match (&self.first_host, &self.last_host) {
            (Some(first), Some(last)) => format!("{} - {}", first, last),
            _ => "-".to_string(),
        };
        vec![
            self.network.clone(),
            self.gateway.clone(),
            hosts,
            self.capacity.to_string(),
            self.devices.to_string(),
            self.users.to_string(),
        ]
    }
}

fn info(prov: &Provisioner) -> Result<InfoDisplay> {
    let network = prov.network();
    let range = HostRange::of(network);
    let capacity = range
        .map(|r| r.host_count() - u64::from(r.contains(network.ip())))
        .unwrap_or(0);

    Ok(InfoDisplay {
        network: format!("{}/{}", network.network(), network.prefix()),
        gateway: network.ip().to_string(),
        first_host: range.map(|r| r.first.to_string()),
        last_host: range.map(|r| r.last.to_string()),
        capacity,
        devices: prov.devices()?.len(),
        users: prov.users()?.len(),
    })
}

pub fn execute(cmd: ServerCommands, prov: &Provisioner, format: OutputFormat) -> Result<()> {
    match cmd {
        ServerCommands::Key => {
            let keys = server_keypair(prov.db())?;
            print_item(
                &KeyDisplay {
                    public_key: keys.public_key.to_string(),
                },
                format,
            );
        }

        ServerCommands::Info => {
            print_item(&info(prov)?, format);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgnet_common::Database;

    #[test]
    fn test_info_capacity() {
        let prov = Provisioner::new(Database::open_memory().unwrap(), "172.16.0.1/29".parse().unwrap());
        let user = prov.create_user("alice").unwrap();
        prov.create_device(user.id, "a", false, None).unwrap();

        let info = info(&prov).unwrap();
        assert_eq!(info.network, "172.16.0.0/29");
        assert_eq!(info.gateway, "172.16.0.1");
        assert_eq!(info.capacity, 5);
        assert_eq!(info.devices, 1);
        assert_eq!(info.users, 1);
        assert_eq!(info.row()[2], "172.16.0.1 - 172.16.0.6");
    }

    #[test]
    fn test_key_is_stable() {
        let prov = Provisioner::new(Database::open_memory().unwrap(), "172.16.0.1/24".parse().unwrap());
        let first = server_keypair(prov.db()).unwrap().public_key;
        let second = server_keypair(prov.db()).unwrap().public_key;
        assert_eq!(first, second);
    }
}
