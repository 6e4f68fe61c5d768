//! Trust list Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use std::net::Ipv4Addr;
use wgnet_common::Provisioner;

use crate::output::{print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum TrustCommands {
    /// List addresses allowed to reach the manager SSH port
    List,

    /// Trust an address
    Add {
        address: Ipv4Addr,
    },

    /// Stop trusting an address
    Remove {
        address: Ipv4Addr,
    },
}

#[derive(Serialize)]
pub struct TrustDisplay {
    pub address: Ipv4Addr,
}

impl TableDisplay for TrustDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Address"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.address.to_string()]
    }
}

fn displays(ips: Vec<Ipv4Addr>) -> Vec<TrustDisplay> {
    ips.into_iter().map(|address| TrustDisplay { address }).collect()
}

pub fn execute(cmd: TrustCommands, prov: &Provisioner, format: OutputFormat) -> Result<()> {
    match cmd {
        TrustCommands::List => {
            print_list(&displays(prov.trust_list()?), format);
        }

        TrustCommands::Add { address } => {
            let ips = prov.trust_add(address)?;
            print_success(&format!("{} trusted", address), format);
            print_list(&displays(ips), format);
        }

        TrustCommands::Remove { address } => {
            let ips = prov.trust_remove(address)?;
            print_success(&format!("{} no longer trusted", address), format);
            print_list(&displays(ips), format);
        }
    }

    Ok(())
}
