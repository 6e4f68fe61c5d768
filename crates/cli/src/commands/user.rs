//! User Commands

use anyhow::Result;
use clap::{ArgGroup, Subcommand};
use serde::Serialize;
use uuid::Uuid;
use wgnet_common::{Provisioner, User};

use super::device::DeviceDisplay;
use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum UserCommands {
    /// List all users
    List,

    /// Show a user and its devices
    Show {
        /// User ID
        id: Uuid,
    },

    /// Create a new user
    Create {
        /// User name
        name: String,
    },

    /// Remove a user together with all of its devices
    Remove {
        /// User ID
        id: Uuid,
    },

    /// Grant or revoke manager privileges
    #[command(group(ArgGroup::new("mode").required(true).args(["on", "off"])))]
    Manager {
        /// User ID
        id: Uuid,

        /// Make the user a manager and issue a new OTP secret
        #[arg(long)]
        on: bool,

        /// Revoke manager privileges, dropping secret and session
        #[arg(long)]
        off: bool,
    },
}

/// User display wrapper for serialization
#[derive(Serialize)]
pub struct UserDisplay {
    pub id: Uuid,
    pub name: String,
    pub manager: bool,
    pub devices: Vec<String>,
    pub created_at: String,
}

impl From<User> for UserDisplay {
    fn from(user: User) -> Self {
        let created_at = chrono::DateTime::from_timestamp(user.created_at, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| user.created_at.to_string());

        Self {
            id: user.id,
            name: user.name,
            manager: user.is_manager,
            devices: user.devices.iter().map(|a| a.to_string()).collect(),
            created_at,
        }
    }
}

impl TableDisplay for UserDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Manager", "Devices", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.name.clone(),
            if self.manager { "yes" } else { "no" }.to_string(),
            self.devices.len().to_string(),
            self.created_at.clone(),
        ]
    }
}

/// Issued OTP secret, shown once
#[derive(Serialize)]
struct ManagerGrant {
    id: Uuid,
    name: String,
    otp_secret: String,
}

impl TableDisplay for ManagerGrant {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "OTP Secret"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.id.to_string(), self.name.clone(), self.otp_secret.clone()]
    }
}

pub fn execute(cmd: UserCommands, prov: &Provisioner, format: OutputFormat) -> Result<()> {
    match cmd {
        UserCommands::List => {
            let users: Vec<UserDisplay> = prov.users()?.into_iter().map(UserDisplay::from).collect();
            print_list(&users, format);
        }

        UserCommands::Show { id } => {
            let user = prov.user(id)?;
            let devices: Vec<DeviceDisplay> = prov
                .devices()?
                .into_iter()
                .filter(|d| d.user_id == id)
                .map(DeviceDisplay::from)
                .collect();

            match format {
                OutputFormat::Table => {
                    print_item(&UserDisplay::from(user), format);
                    print_list(&devices, format);
                }
                OutputFormat::Json => {
                    let out = serde_json::json!({
                        "user": UserDisplay::from(user),
                        "devices": devices,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }

        UserCommands::Create { name } => {
            let user = prov.create_user(&name)?;
            print_success(&format!("User '{}' created", user.name), format);
            print_item(&UserDisplay::from(user), format);
        }

        UserCommands::Remove { id } => {
            let user = prov.remove_user(id)?;
            print_success(
                &format!("User '{}' removed with {} device(s)", user.name, user.devices.len()),
                format,
            );
            if format == OutputFormat::Json {
                print_item(&UserDisplay::from(user), format);
            }
        }

        UserCommands::Manager { id, on, .. } => {
            if on {
                let (user, otp_secret) = prov.set_manager(id)?;
                print_success(&format!("User '{}' is now a manager", user.name), format);
                print_item(
                    &ManagerGrant {
                        id: user.id,
                        name: user.name,
                        otp_secret,
                    },
                    format,
                );
            } else {
                let user = prov.unset_manager(id)?;
                print_success(&format!("User '{}' is no longer a manager", user.name), format);
                if format == OutputFormat::Json {
                    print_item(&UserDisplay::from(user), format);
                }
            }
        }
    }

    Ok(())
}
