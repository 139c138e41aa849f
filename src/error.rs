//! Error kinds shared across the engine (see spec §7).
//!
//! Library code returns `ChantalError` so callers can match on kind;
//! binaries and deeply nested call chains use `anyhow::Error` the way
//! the upstream client/sync code does.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChantalError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("signature verification failed: {0}")]
    Signature(String),

    #[error("failed to parse upstream index: {0}")]
    Parse(String),

    #[error("integrity check failed for {filename}: expected {expected}, got {actual}")]
    Integrity {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path} exists and refers to different content")]
    Conflict { path: String },

    #[error("{what} is still referenced and cannot be removed")]
    StillReferenced { what: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cross-device link: {0}")]
    CrossDevice(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ChantalError>;
