//! Error types for the elastore-blockstore crate

use cid::Cid;
use thiserror::Error;

/// Result type alias using `BlockStoreError`
pub type Result<T> = std::result::Result<T, BlockStoreError>;

/// Errors that can occur during block storage operations
#[derive(Error, Debug)]
pub enum BlockStoreError {
    /// Block not found
    #[error("block not found: {0}")]
    NotFound(Cid),

    /// Stored bytes do not hash to the requested CID
    #[error("block {cid} is corrupted")]
    Corrupted { cid: Cid },

    /// Block too large
    #[error("block too large: {size} bytes exceeds maximum {max} bytes")]
    BlockTooLarge { size: usize, max: usize },

    /// Backend unreachable
    #[error("connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}
