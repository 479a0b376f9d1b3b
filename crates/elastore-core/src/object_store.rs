//! Backing object-store configuration per bucket
//!
//! A bucket with a registered object store relocates its objects into the
//! block store resolved for that endpoint; all other buckets use the node's
//! default block store.

use crate::{Result, StorageError};
use dashmap::DashMap;
use elastore_blockstore::{BlockStore, MemoryBlockStore};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Secret access key; zeroed on drop and redacted in `Debug`
#[derive(Clone)]
pub struct SecretKey(Zeroizing<String>);

impl SecretKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// The raw secret, for handing to a connector
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl Eq for SecretKey {}

/// Credentials and endpoint of a bucket's backing store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub endpoint_url: String,
    pub access_key: String,
    pub secret_key: SecretKey,
}

impl ObjectStoreConfig {
    /// Validate and build a config. Error messages never include the secret.
    pub fn new(
        bucket: impl Into<String>,
        endpoint_url: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self> {
        let bucket = bucket.into();
        let endpoint_url = endpoint_url.into();
        if bucket.is_empty() {
            return Err(StorageError::InvalidBucketName(
                "bucket name must not be empty".to_string(),
            ));
        }
        let parsed = url::Url::parse(&endpoint_url).map_err(|e| {
            StorageError::InvalidArgument(format!("invalid endpoint url {endpoint_url:?}: {e}"))
        })?;
        if parsed.host_str().is_none() {
            return Err(StorageError::InvalidArgument(format!(
                "endpoint url {endpoint_url:?} has no host"
            )));
        }
        Ok(Self {
            bucket,
            endpoint_url,
            access_key: access_key.into(),
            secret_key: SecretKey::new(secret_key),
        })
    }
}

/// Resolves a block store for a registered endpoint
pub trait ObjectStoreConnector: Send + Sync {
    fn connect(&self, config: &ObjectStoreConfig) -> Result<Arc<dyn BlockStore>>;
}

/// Connector that keeps one in-process store per endpoint
#[derive(Default)]
pub struct MemoryConnector {
    stores: DashMap<String, Arc<MemoryBlockStore>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store created for `endpoint_url`, if any
    pub fn store(&self, endpoint_url: &str) -> Option<Arc<MemoryBlockStore>> {
        self.stores.get(endpoint_url).map(|s| Arc::clone(&s))
    }
}

impl ObjectStoreConnector for MemoryConnector {
    fn connect(&self, config: &ObjectStoreConfig) -> Result<Arc<dyn BlockStore>> {
        let store = self
            .stores
            .entry(config.endpoint_url.clone())
            .or_insert_with(|| Arc::new(MemoryBlockStore::new()))
            .clone();
        Ok(store)
    }
}

/// Registered configs and the stores resolved for them
pub(crate) struct ObjectStoreRegistry {
    configs: DashMap<String, ObjectStoreConfig>,
    stores: DashMap<String, Arc<dyn BlockStore>>,
    connector: Arc<dyn ObjectStoreConnector>,
    default_store: Arc<dyn BlockStore>,
}

impl ObjectStoreRegistry {
    pub(crate) fn new(
        default_store: Arc<dyn BlockStore>,
        connector: Arc<dyn ObjectStoreConnector>,
    ) -> Self {
        Self {
            configs: DashMap::new(),
            stores: DashMap::new(),
            connector,
            default_store,
        }
    }

    /// Register or replace the config of a bucket
    pub(crate) fn register(&self, config: ObjectStoreConfig) -> Result<()> {
        let store = self.connector.connect(&config)?;
        debug!(bucket = %config.bucket, endpoint = %config.endpoint_url, "registered object store");
        self.stores.insert(config.bucket.clone(), store);
        self.configs.insert(config.bucket.clone(), config);
        Ok(())
    }

    /// Whether exactly this config is already registered
    pub(crate) fn contains(&self, config: &ObjectStoreConfig) -> bool {
        self.configs
            .get(&config.bucket)
            .is_some_and(|existing| *existing == *config)
    }

    /// The store objects of `bucket` are relocated into
    pub(crate) fn store_for(&self, bucket: &str) -> Arc<dyn BlockStore> {
        self.stores
            .get(bucket)
            .map(|s| Arc::clone(&s))
            .unwrap_or_else(|| Arc::clone(&self.default_store))
    }

    pub(crate) fn configs(&self) -> Vec<ObjectStoreConfig> {
        self.configs.iter().map(|c| c.clone()).collect()
    }

    /// Buckets with a registered backing store, sorted
    pub(crate) fn buckets(&self) -> Vec<String> {
        let mut buckets: Vec<_> = self.configs.iter().map(|c| c.key().clone()).collect();
        buckets.sort();
        buckets
    }
}
