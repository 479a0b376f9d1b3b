//! Directory entries returned by listing and status calls

use serde::{Deserialize, Serialize};

/// Snapshot of one directory entry.
///
/// Owned and detached from the object: later writes, truncations or deletes
/// do not change a descriptor that was already returned.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Object key, or folder path ending in `/` for directories
    pub key: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Whether this entry is a directory
    pub is_directory: bool,
}

impl ObjectDescriptor {
    /// Descriptor of a stored object
    pub fn file(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            is_directory: false,
        }
    }

    /// Descriptor of a directory
    pub fn directory(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            is_directory: true,
        }
    }
}
