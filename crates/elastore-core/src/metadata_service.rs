//! Metadata service seam
//!
//! The metadata service is shared by every node of a deployment. Its wire
//! protocol lives outside this crate; nodes talk to it through
//! [`MetadataService`].

use crate::object_store::ObjectStoreConfig;
use crate::{Result, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Operations a node needs from the metadata service
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Establish the connection; called by `start()`
    async fn connect(&self) -> Result<()>;

    /// Publish a bucket's object-store config to the other nodes
    async fn register_object_store_config(&self, config: &ObjectStoreConfig) -> Result<()>;

    /// Every object-store config known to the deployment
    async fn list_object_store_configs(&self) -> Result<Vec<ObjectStoreConfig>>;
}

/// In-process metadata service; share one instance between nodes to
/// simulate a deployment.
pub struct LocalMetadataService {
    address: String,
    configs: DashMap<String, ObjectStoreConfig>,
    available: AtomicBool,
}

impl LocalMetadataService {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            configs: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable(format!(
                "metadata service at {} is unreachable",
                self.address
            )))
        }
    }
}

#[async_trait]
impl MetadataService for LocalMetadataService {
    async fn connect(&self) -> Result<()> {
        self.ensure_available()
    }

    async fn register_object_store_config(&self, config: &ObjectStoreConfig) -> Result<()> {
        self.ensure_available()?;
        self.configs.insert(config.bucket.clone(), config.clone());
        Ok(())
    }

    async fn list_object_store_configs(&self) -> Result<Vec<ObjectStoreConfig>> {
        self.ensure_available()?;
        let mut configs: Vec<_> = self.configs.iter().map(|c| c.clone()).collect();
        configs.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(configs)
    }
}
