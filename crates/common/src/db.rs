//! SQLite database for wgnet state persistence
//!
//! Devices are keyed by their raw 4-byte address. SQLite compares BLOBs with
//! memcmp, so `ORDER BY address` is numeric address order; the allocator's
//! sorted scan depends on it.

use crate::types::{Device, User};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const TRUST_SET_KEY: &str = "managers.ssh_trust_ipset";

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // WAL lets the daemon read while the CLI writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=1000;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Devices keyed by raw address bytes
            CREATE TABLE IF NOT EXISTS devices (
                address BLOB PRIMARY KEY CHECK (length(address) = 4),
                public_key TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_devices_user ON devices(user_id);

            -- Users
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Key-value store for misc state
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Run `f` inside a read transaction that is always rolled back
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let out = f(&tx);
        tx.rollback()?;
        out
    }

    /// Run `f` inside a write transaction, committed only when `f` succeeds
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

// ============================================================================
// Devices
// ============================================================================

/// All devices, ascending by address.
///
/// Fails if the store hands rows back out of order.
pub fn load_devices(conn: &Connection) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare("SELECT address, body FROM devices ORDER BY address")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)))?;

    let mut devices: Vec<Device> = Vec::new();
    for row in rows {
        let (key, body) = row?;
        let device: Device = serde_json::from_str(&body)?;
        if key != device.address.octets() {
            return Err(Error::Internal(format!(
                "device {} stored under key {:?}",
                device.address, key
            )));
        }
        if let Some(prev) = devices.last() {
            if prev.address >= device.address {
                return Err(Error::Internal(format!(
                    "devices out of order: {} before {}",
                    prev.address, device.address
                )));
            }
        }
        devices.push(device);
    }

    Ok(devices)
}

pub fn load_device(conn: &Connection, address: Ipv4Addr) -> Result<Option<Device>> {
    let key = address.octets();
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM devices WHERE address = ?1",
            params![&key[..]],
            |row| row.get(0),
        )
        .optional()?;

    body.map(|b| serde_json::from_str(&b).map_err(Error::from))
        .transpose()
}

pub fn find_device_by_key(conn: &Connection, public_key: &str) -> Result<Option<Device>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM devices WHERE public_key = ?1",
            params![public_key],
            |row| row.get(0),
        )
        .optional()?;

    body.map(|b| serde_json::from_str(&b).map_err(Error::from))
        .transpose()
}

/// Insert or overwrite the device at its address
pub fn store_device(tx: &Transaction<'_>, device: &Device) -> Result<()> {
    let key = device.address.octets();
    let now = chrono::Utc::now().timestamp();

    tx.execute(
        "INSERT INTO devices (address, public_key, user_id, body, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(address) DO UPDATE SET
            public_key = excluded.public_key,
            user_id = excluded.user_id,
            body = excluded.body,
            updated_at = excluded.updated_at",
        params![
            &key[..],
            device.public_key.to_string(),
            device.user_id.to_string(),
            serde_json::to_string(device)?,
            now,
        ],
    )?;

    debug!("Stored device {}", device.address);
    Ok(())
}

/// Returns whether a row was deleted
pub fn remove_device(tx: &Transaction<'_>, address: Ipv4Addr) -> Result<bool> {
    let key = address.octets();
    let n = tx.execute("DELETE FROM devices WHERE address = ?1", params![&key[..]])?;
    Ok(n > 0)
}

// ============================================================================
// Users
// ============================================================================

/// All users, ordered by id
pub fn load_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare("SELECT body FROM users ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut users = Vec::new();
    for row in rows {
        users.push(serde_json::from_str(&row?)?);
    }
    Ok(users)
}

pub fn load_user(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    body.map(|b| serde_json::from_str(&b).map_err(Error::from))
        .transpose()
}

pub fn store_user(tx: &Transaction<'_>, user: &User) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    tx.execute(
        "INSERT INTO users (id, name, body, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            body = excluded.body,
            updated_at = excluded.updated_at",
        params![user.id.to_string(), user.name, serde_json::to_string(user)?, now],
    )?;

    debug!("Stored user {} ({})", user.name, user.id);
    Ok(())
}

/// Remove a user together with every device it owns
pub fn remove_user(tx: &Transaction<'_>, id: Uuid) -> Result<User> {
    let user = load_user(tx, id)?.ok_or_else(|| Error::not_found("user", id))?;

    for addr in &user.devices {
        remove_device(tx, *addr)?;
    }
    // devices whose owner list drifted
    tx.execute("DELETE FROM devices WHERE user_id = ?1", params![id.to_string()])?;
    tx.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;

    debug!("Removed user {} with {} devices", id, user.devices.len());
    Ok(user)
}

// ============================================================================
// Manager SSH trust list
// ============================================================================

/// Trusted source addresses, ascending and unique
pub fn load_trust_set(conn: &Connection) -> Result<Vec<Ipv4Addr>> {
    let mut ips: Vec<Ipv4Addr> = match kv_get(conn, TRUST_SET_KEY)? {
        Some(v) => serde_json::from_str(&v)?,
        None => Vec::new(),
    };
    ips.sort();
    ips.dedup();
    Ok(ips)
}

pub fn store_trust_set(tx: &Transaction<'_>, ips: &[Ipv4Addr]) -> Result<()> {
    let mut ips = ips.to_vec();
    ips.sort();
    ips.dedup();
    kv_put(tx, TRUST_SET_KEY, &serde_json::to_string(&ips)?)
}

// ============================================================================
// Key-value store
// ============================================================================

pub fn kv_get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn kv_put(tx: &Transaction<'_>, key: &str, value: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    tx.execute(
        "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::PublicKey;

    fn device(addr: Ipv4Addr, key_byte: u8, user_id: Uuid) -> Device {
        Device {
            address: addr,
            network: "10.0.0.0/16".parse().unwrap(),
            public_key: PublicKey::from_bytes([key_byte; 32]),
            user_id,
            label: "test".to_string(),
            wan_forward: false,
            allowed_networks: Vec::new(),
        }
    }

    #[test]
    fn test_devices_sorted_by_address_bytes() {
        let db = Database::open_memory().unwrap();
        let owner = Uuid::new_v4();
        // textual order would put .10 before .9 and 10.0.1.1 before 10.0.0.200
        let addrs = [
            Ipv4Addr::new(10, 0, 1, 1),
            Ipv4Addr::new(10, 0, 0, 10),
            Ipv4Addr::new(10, 0, 0, 200),
            Ipv4Addr::new(10, 0, 0, 9),
        ];
        db.write(|tx| {
            for (i, a) in addrs.iter().enumerate() {
                store_device(tx, &device(*a, i as u8, owner))?;
            }
            Ok(())
        })
        .unwrap();

        let loaded = db.read(load_devices).unwrap();
        let got: Vec<Ipv4Addr> = loaded.iter().map(|d| d.address).collect();
        let mut want = addrs.to_vec();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn test_device_roundtrip_and_remove() {
        let db = Database::open_memory().unwrap();
        let d = device(Ipv4Addr::new(10, 0, 0, 2), 2, Uuid::new_v4());
        db.write(|tx| store_device(tx, &d)).unwrap();

        let loaded = db.read(|c| load_device(c, d.address)).unwrap();
        assert_eq!(loaded, Some(d.clone()));

        let by_key = db.read(|c| find_device_by_key(c, &d.public_key.to_string())).unwrap();
        assert_eq!(by_key.map(|x| x.address), Some(d.address));

        assert!(db.write(|tx| remove_device(tx, d.address)).unwrap());
        assert!(!db.write(|tx| remove_device(tx, d.address)).unwrap());
        assert!(db.read(|c| load_device(c, d.address)).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_public_key_rejected_by_store() {
        let db = Database::open_memory().unwrap();
        let owner = Uuid::new_v4();
        db.write(|tx| store_device(tx, &device(Ipv4Addr::new(10, 0, 0, 2), 1, owner)))
            .unwrap();
        let res = db.write(|tx| store_device(tx, &device(Ipv4Addr::new(10, 0, 0, 3), 1, owner)));
        assert!(matches!(res, Err(Error::Database(_))));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let db = Database::open_memory().unwrap();
        let res: Result<()> = db.write(|tx| {
            store_device(tx, &device(Ipv4Addr::new(10, 0, 0, 2), 1, Uuid::new_v4()))?;
            Err(Error::Internal("abort".to_string()))
        });
        assert!(res.is_err());
        assert!(db.read(load_devices).unwrap().is_empty());
    }

    #[test]
    fn test_remove_user_removes_devices() {
        let db = Database::open_memory().unwrap();
        let mut user = User::new("alice");
        let other = User::new("bob");
        let a = device(Ipv4Addr::new(10, 0, 0, 2), 2, user.id);
        let b = device(Ipv4Addr::new(10, 0, 0, 3), 3, other.id);
        user.add_device(a.address);

        db.write(|tx| {
            store_user(tx, &user)?;
            store_user(tx, &other)?;
            store_device(tx, &a)?;
            store_device(tx, &b)
        })
        .unwrap();

        let removed = db.write(|tx| remove_user(tx, user.id)).unwrap();
        assert_eq!(removed.name, "alice");

        let devices = db.read(load_devices).unwrap();
        assert_eq!(devices, vec![b]);
        let users = db.read(load_users).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, other.id);

        let missing = db.write(|tx| remove_user(tx, user.id));
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_trust_set_sorted_unique() {
        let db = Database::open_memory().unwrap();
        assert!(db.read(load_trust_set).unwrap().is_empty());

        let ips = vec![
            Ipv4Addr::new(192, 168, 1, 20),
            Ipv4Addr::new(10, 1, 1, 1),
            Ipv4Addr::new(192, 168, 1, 20),
        ];
        db.write(|tx| store_trust_set(tx, &ips)).unwrap();
        assert_eq!(
            db.read(load_trust_set).unwrap(),
            vec![Ipv4Addr::new(10, 1, 1, 1), Ipv4Addr::new(192, 168, 1, 20)]
        );
    }

    #[test]
    fn test_file_backed_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let db = Database::open(&path).unwrap();
            db.write(|tx| kv_put(tx, "k", "v1")).unwrap();
            db.write(|tx| kv_put(tx, "k", "v2")).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.read(|c| kv_get(c, "k")).unwrap().as_deref(), Some("v2"));
    }
}
