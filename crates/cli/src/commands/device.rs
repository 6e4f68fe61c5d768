//! Device Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use std::net::Ipv4Addr;
use uuid::Uuid;
use wgnet_common::wgconfig::{render_client_config, ServerInfo};
use wgnet_common::{server_keypair, Device, DeviceEdit, PrivateKey, Provisioner, PublicKey};

use crate::output::{print_item, print_list, print_success, print_warning, OutputFormat, TableDisplay};

/// Keeps NAT mappings towards the gateway open
const DEFAULT_KEEPALIVE: u16 = 25;

#[derive(Subcommand)]
pub enum DeviceCommands {
    /// List devices
    List {
        /// Only devices owned by this user
        #[arg(short, long)]
        user: Option<Uuid>,
    },

    /// Allocate an address and register a device
    Create {
        /// Owning user ID
        #[arg(short, long)]
        user: Uuid,

        /// Device label
        #[arg(short, long)]
        label: String,

        /// Route all traffic through the gateway
        #[arg(long)]
        wan_forward: bool,

        /// Device public key; a key pair is generated when omitted
        #[arg(long)]
        public_key: Option<PublicKey>,

        /// Server endpoint written into the generated configuration
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Change a device's label, WAN forwarding or public key
    Edit {
        /// Device address
        address: Ipv4Addr,

        #[arg(short, long)]
        label: Option<String>,

        #[arg(long)]
        wan_forward: Option<bool>,

        #[arg(long)]
        public_key: Option<PublicKey>,
    },

    /// Remove a device
    Remove {
        /// Device address
        address: Ipv4Addr,
    },

    /// Print a WireGuard client configuration
    Config {
        /// Device address
        address: Ipv4Addr,

        /// Server endpoint (host:port)
        #[arg(long)]
        endpoint: Option<String>,

        /// Persistent keepalive in seconds, 0 leaves it out
        #[arg(long, default_value_t = DEFAULT_KEEPALIVE)]
        keepalive: u16,
    },
}

/// Device display wrapper for serialization
#[derive(Serialize)]
pub struct DeviceDisplay {
    pub address: Ipv4Addr,
    pub label: String,
    pub user_id: Uuid,
    pub public_key: String,
    pub wan_forward: bool,
}

impl From<Device> for DeviceDisplay {
    fn from(device: Device) -> Self {
        Self {
            address: device.address,
            label: device.label,
            user_id: device.user_id,
            public_key: device.public_key.to_string(),
            wan_forward: device.wan_forward,
        }
    }
}

impl TableDisplay for DeviceDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Address", "Label", "User", "Public Key", "WAN"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.address.to_string(),
            self.label.clone(),
            self.user_id.to_string(),
            self.public_key.clone(),
            if self.wan_forward { "yes" } else { "no" }.to_string(),
        ]
    }
}

fn server_info(prov: &Provisioner, endpoint: Option<String>, keepalive: Option<u16>) -> Result<ServerInfo> {
    let keys = server_keypair(prov.db())?;
    Ok(ServerInfo {
        public_key: keys.public_key,
        network: prov.network(),
        endpoint,
        keepalive,
    })
}

fn print_config(device: &Device, private_key: Option<&PrivateKey>, server: &ServerInfo, format: OutputFormat) -> Result<()> {
    let config = render_client_config(device, private_key, server);
    match format {
        OutputFormat::Table => println!("{}", config),
        OutputFormat::Json => {
            let out = serde_json::json!({
                "device": DeviceDisplay::from(device.clone()),
                "private_key": private_key.map(|k| k.to_base64()),
                "config": config,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

pub fn execute(cmd: DeviceCommands, prov: &Provisioner, format: OutputFormat) -> Result<()> {
    match cmd {
        DeviceCommands::List { user } => {
            let devices: Vec<DeviceDisplay> = prov
                .devices()?
                .into_iter()
                .filter(|d| user.map_or(true, |id| d.user_id == id))
                .map(DeviceDisplay::from)
                .collect();
            print_list(&devices, format);
        }

        DeviceCommands::Create {
            user,
            label,
            wan_forward,
            public_key,
            endpoint,
        } => {
            let created = prov.create_device(user, &label, wan_forward, public_key)?;
            print_success(
                &format!("Device '{}' created at {}", created.device.label, created.device.address),
                format,
            );

            match &created.private_key {
                Some(private_key) => {
                    let server = server_info(prov, endpoint, Some(DEFAULT_KEEPALIVE))?;
                    if format == OutputFormat::Table {
                        print_warning("The private key is not stored; keep this configuration");
                    }
                    print_config(&created.device, Some(private_key), &server, format)?;
                }
                None => print_item(&DeviceDisplay::from(created.device), format),
            }
        }

        DeviceCommands::Edit {
            address,
            label,
            wan_forward,
            public_key,
        } => {
            let device = prov.edit_device(
                address,
                DeviceEdit {
                    label,
                    wan_forward,
                    public_key,
                },
            )?;
            print_success(&format!("Device {} updated", device.address), format);
            print_item(&DeviceDisplay::from(device), format);
        }

        DeviceCommands::Remove { address } => {
            let device = prov.remove_device(address)?;
            print_success(&format!("Device '{}' ({}) removed", device.label, device.address), format);
            if format == OutputFormat::Json {
                print_item(&DeviceDisplay::from(device), format);
            }
        }

        DeviceCommands::Config {
            address,
            endpoint,
            keepalive,
        } => {
            let device = prov.device(address)?;
            let server = server_info(prov, endpoint, Some(keepalive).filter(|k| *k > 0))?;
            print_config(&device, None, &server, format)?;
        }
    }

    Ok(())
}
