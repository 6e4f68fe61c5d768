//! Provisioning of users, devices and the trust list
//!
//! Every operation runs in one write transaction. The reconciliation loop
//! observes the result on its next tick.

use crate::allocator;
use crate::db::{self, Database};
use crate::keys::{KeyPair, PrivateKey, PublicKey};
use crate::types::{Device, User, MAX_LABEL_LEN};
use crate::{Error, Result};
use data_encoding::BASE32;
use ipnetwork::Ipv4Network;
use rand::RngCore;
use std::net::Ipv4Addr;
use tracing::info;
use uuid::Uuid;

const SERVER_KEY: &str = "wg.private_key";
const OTP_SECRET_LEN: usize = 20;

/// A freshly created device and, when the server generated it, its private key
#[derive(Debug, Clone)]
pub struct CreatedDevice {
    pub device: Device,
    pub private_key: Option<PrivateKey>,
}

/// Changes to apply to an existing device
#[derive(Debug, Clone, Default)]
pub struct DeviceEdit {
    pub label: Option<String>,
    pub wan_forward: Option<bool>,
    pub public_key: Option<PublicKey>,
}

/// Write-side operations over the persisted model
#[derive(Clone)]
pub struct Provisioner {
    db: Database,
    network: Ipv4Network,
}

impl Provisioner {
    pub fn new(db: Database, network: Ipv4Network) -> Self {
        Self { db, network }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn create_user(&self, name: &str) -> Result<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_input("name", "required"));
        }

        let user = User::new(name);
        self.db.write(|tx| db::store_user(tx, &user))?;

        info!("Created user {} ({})", user.name, user.id);
        Ok(user)
    }

    /// Grant manager privileges, returning the new base32 OTP secret
    pub fn set_manager(&self, id: Uuid) -> Result<(User, String)> {
        let mut bytes = [0u8; OTP_SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        let secret = BASE32.encode(&bytes);

        let user = self.db.write(|tx| {
            let mut user = db::load_user(tx, id)?.ok_or_else(|| Error::not_found("user", id))?;
            user.set_manager(secret.clone());
            db::store_user(tx, &user)?;
            Ok(user)
        })?;

        info!("User {} is now a manager", user.id);
        Ok((user, secret))
    }

    pub fn unset_manager(&self, id: Uuid) -> Result<User> {
        let user = self.db.write(|tx| {
            let mut user = db::load_user(tx, id)?.ok_or_else(|| Error::not_found("user", id))?;
            user.unset_manager();
            db::store_user(tx, &user)?;
            Ok(user)
        })?;

        info!("User {} is no longer a manager", user.id);
        Ok(user)
    }

    pub fn remove_user(&self, id: Uuid) -> Result<User> {
        let user = self.db.write(|tx| db::remove_user(tx, id))?;
        info!("Removed user {} ({})", user.name, user.id);
        Ok(user)
    }

    pub fn user(&self, id: Uuid) -> Result<User> {
        self.db
            .read(|c| db::load_user(c, id))?
            .ok_or_else(|| Error::not_found("user", id))
    }

    pub fn users(&self) -> Result<Vec<User>> {
        self.db.read(db::load_users)
    }

    // ========================================================================
    // Devices
    // ========================================================================

    /// Allocate an address and store a new device for `user_id`.
    ///
    /// Without a public key a key pair is generated and its private half
    /// returned to the caller; it is never stored.
    pub fn create_device(
        &self,
        user_id: Uuid,
        label: &str,
        wan_forward: bool,
        public_key: Option<PublicKey>,
    ) -> Result<CreatedDevice> {
        validate_label(label)?;

        let (public_key, private_key) = match public_key {
            Some(pk) => (pk, None),
            None => {
                let kp = KeyPair::generate();
                (kp.public_key, Some(kp.private_key))
            }
        };

        let network = self.network;
        let device = self.db.write(|tx| {
            let mut user = db::load_user(tx, user_id)?.ok_or_else(|| Error::not_found("user", user_id))?;

            let devices = db::load_devices(tx)?;
            let address = allocator::allocate(network, &devices, &public_key)?;

            let device = Device {
                address,
                network,
                public_key,
                user_id,
                label: label.to_string(),
                wan_forward,
                allowed_networks: Vec::new(),
            };
            db::store_device(tx, &device)?;

            user.add_device(address);
            db::store_user(tx, &user)?;
            Ok(device)
        })?;

        info!("Created device {} ({}) for user {}", device.address, device.label, user_id);
        Ok(CreatedDevice { device, private_key })
    }

    pub fn edit_device(&self, address: Ipv4Addr, edit: DeviceEdit) -> Result<Device> {
        if let Some(label) = &edit.label {
            validate_label(label)?;
        }

        let device = self.db.write(|tx| {
            let mut device = db::load_device(tx, address)?.ok_or_else(|| Error::not_found("device", address))?;

            if let Some(pk) = edit.public_key {
                if let Some(holder) = db::find_device_by_key(tx, &pk.to_string())? {
                    if holder.address != address {
                        return Err(Error::already_exists("public key", pk));
                    }
                }
                device.public_key = pk;
            }
            if let Some(label) = edit.label {
                device.label = label;
            }
            if let Some(wan_forward) = edit.wan_forward {
                device.wan_forward = wan_forward;
            }

            db::store_device(tx, &device)?;
            Ok(device)
        })?;

        info!("Edited device {}", device.address);
        Ok(device)
    }

    /// Remove a device and detach it from its owner
    pub fn remove_device(&self, address: Ipv4Addr) -> Result<Device> {
        let device = self.db.write(|tx| {
            let device = db::load_device(tx, address)?.ok_or_else(|| Error::not_found("device", address))?;
            db::remove_device(tx, address)?;

            if let Some(mut user) = db::load_user(tx, device.user_id)? {
                user.remove_device(address);
                db::store_user(tx, &user)?;
            }
            Ok(device)
        })?;

        info!("Removed device {} ({})", device.address, device.label);
        Ok(device)
    }

    pub fn device(&self, address: Ipv4Addr) -> Result<Device> {
        self.db
            .read(|c| db::load_device(c, address))?
            .ok_or_else(|| Error::not_found("device", address))
    }

    pub fn devices(&self) -> Result<Vec<Device>> {
        self.db.read(db::load_devices)
    }

    // ========================================================================
    // Trust list
    // ========================================================================

    pub fn trust_add(&self, addr: Ipv4Addr) -> Result<Vec<Ipv4Addr>> {
        let ips = self.db.write(|tx| {
            let mut ips = db::load_trust_set(tx)?;
            if let Err(i) = ips.binary_search(&addr) {
                ips.insert(i, addr);
                db::store_trust_set(tx, &ips)?;
            }
            Ok(ips)
        })?;

        info!("Trusted {}", addr);
        Ok(ips)
    }

    pub fn trust_remove(&self, addr: Ipv4Addr) -> Result<Vec<Ipv4Addr>> {
        let ips = self.db.write(|tx| {
            let mut ips = db::load_trust_set(tx)?;
            if let Ok(i) = ips.binary_search(&addr) {
                ips.remove(i);
                db::store_trust_set(tx, &ips)?;
            }
            Ok(ips)
        })?;

        info!("Untrusted {}", addr);
        Ok(ips)
    }

    pub fn trust_list(&self) -> Result<Vec<Ipv4Addr>> {
        self.db.read(db::load_trust_set)
    }
}

/// Load the server's WireGuard key pair, generating it on first use
pub fn server_keypair(db: &Database) -> Result<KeyPair> {
    db.write(|tx| match db::kv_get(tx, SERVER_KEY)? {
        Some(encoded) => Ok(KeyPair::from_private(encoded.parse()?)),
        None => {
            let kp = KeyPair::generate();
            db::kv_put(tx, SERVER_KEY, &kp.private_key.to_base64())?;
            info!("Generated server public key: {}", kp.public_key);
            Ok(kp)
        }
    })
}

fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(Error::invalid_input("label", "required"));
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(Error::invalid_input("label", "length should be lower than 256"));
    }
    Ok(())
}
