//! Node configuration

use crate::{Result, StorageError};
use elastore_blockstore::MAX_BLOCK_SIZE;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Configuration of one storage node.
///
/// Built once and handed to [`StorageService`](crate::StorageService); the
/// service keeps its own copy, so later changes to this value have no effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address of the metadata service (`host:port`)
    pub metadata_service_address: String,
    /// Bind address of this node's own service
    pub listen_address: String,
    /// Hostname advertised to other nodes; `None` advertises `listen_address`
    #[serde(deserialize_with = "deserialize_hostname")]
    pub hostname: Option<String>,
    /// RPC listen port
    pub port: u16,
    /// Diagnostics HTTP port
    pub port_http_server: u16,
    /// Root directory for spilled objects
    pub local_storage_path: PathBuf,
    /// Relocation block size (bytes)
    pub cache_block_size: usize,
    /// Keep a local copy of objects read back from the backing store
    pub cache_objects_from_s3: bool,
    /// Local disk budget (bytes)
    pub available_local_storage: u64,
    /// Local memory budget (bytes)
    pub available_local_memory: u64,
    /// Relocate every sealed local object before `stop()` returns
    pub force_relocation_when_stopping: bool,
    /// Enable subscriptions and change notifications
    pub pub_sub_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_service_address: "localhost:4381".to_string(),
            listen_address: "0.0.0.0".to_string(),
            hostname: None,
            port: 4382,
            port_http_server: 4380,
            local_storage_path: std::env::temp_dir().join("elastore"),
            cache_block_size: 32 * 1024 * 1024,            // 32 MiB
            cache_objects_from_s3: false,
            available_local_storage: 100 * 1024 * 1024 * 1024, // 100 GiB
            available_local_memory: 16 * 1024 * 1024 * 1024,   // 16 GiB
            force_relocation_when_stopping: false,
            pub_sub_enabled: false,
        }
    }
}

impl Config {
    /// Create a config pointing at the given metadata service
    pub fn new(metadata_service_address: impl Into<String>) -> Self {
        Self {
            metadata_service_address: metadata_service_address.into(),
            ..Default::default()
        }
    }

    /// Set the advertised hostname; `"null"` and empty strings unset it
    pub fn with_hostname(mut self, hostname: impl AsRef<str>) -> Self {
        self.hostname = normalize_hostname(hostname.as_ref());
        self
    }

    /// Set the local storage root
    pub fn with_local_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_storage_path = path.into();
        self
    }

    /// Set the relocation block size
    pub fn with_cache_block_size(mut self, size: usize) -> Self {
        self.cache_block_size = size;
        self
    }

    /// Set the local memory budget
    pub fn with_available_local_memory(mut self, bytes: u64) -> Self {
        self.available_local_memory = bytes;
        self
    }

    /// Set the local disk budget
    pub fn with_available_local_storage(mut self, bytes: u64) -> Self {
        self.available_local_storage = bytes;
        self
    }

    /// Enable subscriptions
    pub fn with_pub_sub(mut self) -> Self {
        self.pub_sub_enabled = true;
        self
    }

    /// Relocate sealed local objects on shutdown
    pub fn with_force_relocation_when_stopping(mut self) -> Self {
        self.force_relocation_when_stopping = true;
        self
    }

    /// Re-populate the memory tier when reading relocated objects
    pub fn with_cache_objects_from_s3(mut self) -> Self {
        self.cache_objects_from_s3 = true;
        self
    }

    /// Address other nodes should use to reach this one
    pub fn advertised_address(&self) -> String {
        let host = self.hostname.as_deref().unwrap_or(&self.listen_address);
        format!("{}:{}", host, self.port)
    }

    /// Check the configuration before the node starts
    pub fn validate(&self) -> Result<()> {
        if self.metadata_service_address.trim().is_empty() {
            return Err(StorageError::InvalidArgument(
                "metadata service address must not be empty".to_string(),
            ));
        }
        if self.local_storage_path.as_os_str().is_empty() {
            return Err(StorageError::InvalidArgument(
                "local storage path must not be empty".to_string(),
            ));
        }
        if self.cache_block_size == 0 || self.cache_block_size > MAX_BLOCK_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "cache block size must be between 1 and {} bytes",
                MAX_BLOCK_SIZE
            )));
        }
        Ok(())
    }
}

/// Map the legacy `"null"` sentinel and blank values to an absent hostname
pub fn normalize_hostname(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn deserialize_hostname<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(normalize_hostname))
}
