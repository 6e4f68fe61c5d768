//! Error types for wgnet

use thiserror::Error;

/// Result type alias using wgnet Error
pub type Result<T> = std::result::Result<T, Error>;

/// Address allocation failures.
///
/// These are terminal for the requested operation and are never retried.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("network size too small")]
    NetworkTooSmall,

    #[error("can't allocate address, address space is full")]
    AddressSpaceExhausted,

    #[error("public key already exists")]
    DuplicatePublicKey,
}

/// wgnet error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Allocation error: {0}")]
    Alloc(#[from] AllocError),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Enforcement error: {0}")]
    Enforcement(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn already_exists(kind: &str, id: impl ToString) -> Self {
        Error::AlreadyExists {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid_input(field: &str, reason: impl ToString) -> Self {
        Error::InvalidInput {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Allocation error carried by this error, if any
    pub fn alloc(&self) -> Option<AllocError> {
        match self {
            Error::Alloc(e) => Some(*e),
            _ => None,
        }
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Crypto(e.to_string())
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(e: ipnetwork::IpNetworkError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
