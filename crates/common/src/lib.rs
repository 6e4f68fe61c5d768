//! wgnet Common Library
//!
//! Persisted model, snapshot-diff engine and address allocator shared by the
//! wgnet daemon and CLI.

pub mod allocator;
pub mod db;
pub mod error;
pub mod keys;
pub mod provision;
pub mod snapshot;
pub mod types;
pub mod wgconfig;

// Re-export commonly used types
pub use allocator::{allocate, HostRange};
pub use db::Database;
pub use error::{AllocError, Error, Result};
pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use provision::{server_keypair, CreatedDevice, DeviceEdit, Provisioner};
pub use snapshot::{AddressSet, Keyed, PeerSet, Snapshot};
pub use types::*;

/// wgnet version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gateway address and overlay prefix when none is configured
pub const DEFAULT_CIDR: &str = "172.16.0.1/24";

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".wgnet")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("state.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
