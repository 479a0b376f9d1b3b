//! The storage service entry point
//!
//! Every fallible operation reports through a [`Status`] or [`StatusOr`];
//! internal errors never cross this boundary. All operations resolve to
//! their final outcome except [`StorageService::relocate`], which only
//! schedules background work.

use crate::{
    config::Config,
    descriptor::ObjectDescriptor,
    engine::{ServiceStats, StorageCore},
    file::FileHandle,
    metadata_service::{LocalMetadataService, MetadataService},
    object_store::{MemoryConnector, ObjectStoreConnector},
    status::{Status, StatusOr},
    subscription::{ChangeNotification, SubscriptionEvent, SubscriptionType},
    Result,
};
use elastore_blockstore::{BlockStore, MemoryBlockStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

fn report<T>(operation: &'static str, result: Result<T>) -> StatusOr<T> {
    if let Err(e) = &result {
        debug!(operation, error = %e, "Operation failed");
    }
    result.into()
}

fn report_status(operation: &'static str, result: Result<()>) -> Status {
    if let Err(e) = &result {
        debug!(operation, error = %e, "Operation failed");
    }
    result.into()
}

/// Builder for [`StorageService`]
pub struct StorageServiceBuilder {
    config: Config,
    metadata_service: Option<Arc<dyn MetadataService>>,
    block_store: Option<Arc<dyn BlockStore>>,
    connector: Option<Arc<dyn ObjectStoreConnector>>,
}

impl StorageServiceBuilder {
    /// Metadata service to connect to; defaults to a private
    /// [`LocalMetadataService`] at the configured address
    pub fn metadata_service(mut self, service: Arc<dyn MetadataService>) -> Self {
        self.metadata_service = Some(service);
        self
    }

    /// Block store for buckets without a registered object store
    pub fn block_store(mut self, store: Arc<dyn BlockStore>) -> Self {
        self.block_store = Some(store);
        self
    }

    /// Resolver for registered object-store endpoints
    pub fn connector(mut self, connector: Arc<dyn ObjectStoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> StorageService {
        let metadata_service = self.metadata_service.unwrap_or_else(|| {
            Arc::new(LocalMetadataService::new(
                self.config.metadata_service_address.clone(),
            ))
        });
        let block_store = self
            .block_store
            .unwrap_or_else(|| Arc::new(MemoryBlockStore::new()));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(MemoryConnector::new()));
        StorageService {
            core: Arc::new(StorageCore::new(
                self.config,
                metadata_service,
                block_store,
                connector,
            )),
        }
    }
}

/// Handle on one storage node. Cheap to clone; clones share the node.
#[derive(Clone)]
pub struct StorageService {
    core: Arc<StorageCore>,
}

impl StorageService {
    /// Create a stopped service with in-process collaborators
    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> StorageServiceBuilder {
        StorageServiceBuilder {
            config,
            metadata_service: None,
            block_store: None,
            connector: None,
        }
    }

    /// Create a service sharing `metadata_service` with other nodes
    pub fn with_metadata_service(config: Config, metadata_service: Arc<dyn MetadataService>) -> Self {
        Self::builder(config).metadata_service(metadata_service).build()
    }

    /// The configuration the service was built with
    pub fn config(&self) -> &Config {
        self.core.config()
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    // Lifecycle

    /// Validate the configuration, prepare local storage and connect to the
    /// metadata service. Starting a running service succeeds.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Status {
        match self.core.start().await {
            Ok(()) => {
                info!(address = %self.core.config().advertised_address(), "Storage service started");
                Status::success()
            }
            Err(e) => {
                error!(error = %e, "Failed to start storage service");
                e.into()
            }
        }
    }

    /// Drain relocation work, relocate everything local when
    /// `force_relocation_when_stopping` is set, and stop. Stopping a stopped
    /// service succeeds.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Status {
        match self.core.stop().await {
            Ok(()) => {
                info!("Storage service stopped");
                Status::success()
            }
            Err(e) => {
                error!(error = %e, "Storage service stopped with errors");
                e.into()
            }
        }
    }

    // Directory operations

    #[instrument(skip(self))]
    pub async fn create_bucket(&self, bucket: &str) -> Status {
        report_status("create_bucket", self.core.create_bucket(bucket))
    }

    /// Create `path` and all of its ancestors as directories; idempotent
    #[instrument(skip(self))]
    pub async fn mkdirs(&self, bucket: &str, path: &str) -> Status {
        report_status("mkdirs", self.core.mkdirs(bucket, path))
    }

    /// Create an empty writeable object. With `overwrite`, an existing
    /// object is replaced and its open handles report `NotFound`.
    #[instrument(skip(self))]
    pub async fn create(&self, bucket: &str, key: &str, overwrite: bool) -> StatusOr<FileHandle> {
        let result = self
            .core
            .create(bucket, key, overwrite)
            .await
            .map(|entry| FileHandle::new(Arc::clone(&self.core), entry, true));
        report("create", result)
    }

    /// Open an existing object; sealed objects open read-only
    #[instrument(skip(self))]
    pub async fn open(&self, bucket: &str, key: &str) -> StatusOr<FileHandle> {
        let result = self
            .core
            .open(bucket, key)
            .await
            .map(|(entry, writeable)| FileHandle::new(Arc::clone(&self.core), entry, writeable));
        report("open", result)
    }

    /// Snapshot of an object or directory
    #[instrument(skip(self))]
    pub async fn status(&self, bucket: &str, key: &str) -> StatusOr<ObjectDescriptor> {
        report("status", self.core.status(bucket, key))
    }

    /// Every object whose key starts with `key`, in key order
    #[instrument(skip(self))]
    pub async fn list(&self, bucket: &str, key: &str) -> StatusOr<Vec<ObjectDescriptor>> {
        report("list", self.core.list(bucket, key))
    }

    /// Direct children of the folder `prefix`, with sub-folders as
    /// directory entries
    #[instrument(skip(self))]
    pub async fn list_folder(&self, bucket: &str, prefix: &str) -> StatusOr<Vec<ObjectDescriptor>> {
        report("list_folder", self.core.list_folder(bucket, prefix))
    }

    #[instrument(skip(self))]
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Status {
        report_status("delete_object", self.core.delete(bucket, key).await)
    }

    /// Delete every object whose key starts with `prefix`
    #[instrument(skip(self))]
    pub async fn delete_object_prefix(&self, bucket: &str, prefix: &str) -> Status {
        let result = self.core.delete_prefix(bucket, prefix).await.map(|deleted| {
            debug!(deleted, "Deleted prefix");
        });
        report_status("delete_object_prefix", result)
    }

    /// Move an object; fails with `AlreadyExists` if the destination exists
    #[instrument(skip(self))]
    pub async fn rename(&self, src_bucket: &str, src_key: &str, dest_bucket: &str, dest_key: &str) -> Status {
        report_status("rename", self.core.rename(src_bucket, src_key, dest_bucket, dest_key))
    }

    /// Move every object under a prefix, or nothing if any destination exists
    #[instrument(skip(self))]
    pub async fn rename_prefix(
        &self,
        src_bucket: &str,
        src_prefix: &str,
        dest_bucket: &str,
        dest_prefix: &str,
    ) -> Status {
        let result = self
            .core
            .rename_prefix(src_bucket, src_prefix, dest_bucket, dest_prefix)
            .map(|_| ());
        report_status("rename_prefix", result)
    }

    /// Copy an object with its metadata and seal
    #[instrument(skip(self))]
    pub async fn copy(&self, src_bucket: &str, src_key: &str, dest_bucket: &str, dest_key: &str) -> Status {
        report_status("copy", self.core.copy(src_bucket, src_key, dest_bucket, dest_key).await)
    }

    /// Copy every object under a prefix, or nothing if any destination exists
    #[instrument(skip(self))]
    pub async fn copy_prefix(
        &self,
        src_bucket: &str,
        src_prefix: &str,
        dest_bucket: &str,
        dest_prefix: &str,
    ) -> Status {
        let result = self
            .core
            .copy_prefix(src_bucket, src_prefix, dest_bucket, dest_prefix)
            .await
            .map(|copied| debug!(copied, "Copied prefix"));
        report_status("copy_prefix", result)
    }

    /// Local file backing the object, or an empty string when the object
    /// has no local file. An empty result does not mean the object is absent.
    pub async fn local_path(&self, bucket: &str, key: &str) -> String {
        self.core.local_path(bucket, key).await
    }

    // Object stores

    /// Back `bucket` with a remote object store. The secret never appears
    /// in logs or status messages.
    #[instrument(skip(self, access_key, secret_key))]
    pub async fn register_object_store_config(
        &self,
        bucket: &str,
        endpoint_url: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Status {
        let result = self
            .core
            .register_object_store_config(bucket, endpoint_url, access_key, secret_key)
            .await;
        report_status("register_object_store_config", result)
    }

    /// Exchange object-store configs with the metadata service. Local
    /// registrations are kept when this fails.
    #[instrument(skip(self))]
    pub async fn sync_object_store_configs(&self) -> Status {
        let result = self.core.sync_object_store_configs().await.map(|_| ());
        report_status("sync_object_store_configs", result)
    }

    /// Buckets that have a registered object store
    pub fn list_object_store_buckets(&self) -> Vec<String> {
        self.core.object_store_buckets()
    }

    // Background work

    /// Schedule relocation of sealed local data and return immediately.
    ///
    /// Without `force`, only runs while memory or disk usage is above
    /// [`RELOCATION_WATERMARK`](crate::RELOCATION_WATERMARK) of its budget.
    /// Pending relocations are drained by [`stop`](Self::stop).
    pub fn relocate(&self, force: bool) {
        self.core.relocate(force);
    }

    // Subscriptions

    /// Register interest in changes; subscribing twice is harmless
    #[instrument(skip(self))]
    pub async fn subscribe(&self, bucket: &str, key: &str, subscription_type: SubscriptionType) -> Status {
        let event = SubscriptionEvent::new(bucket, key, subscription_type);
        report_status("subscribe", self.core.subscribe(event))
    }

    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, bucket: &str, key: &str, subscription_type: SubscriptionType) -> Status {
        let event = SubscriptionEvent::new(bucket, key, subscription_type);
        report_status("unsubscribe", self.core.unsubscribe(&event))
    }

    /// Receiver for changes matching a registered subscription
    pub fn notifications(&self) -> StatusOr<broadcast::Receiver<ChangeNotification>> {
        report("notifications", self.core.notifications())
    }

    /// Snapshot of node state
    pub async fn stats(&self) -> ServiceStats {
        self.core.stats().await
    }
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("address", &self.core.config().advertised_address())
            .field("running", &self.core.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    async fn running_service(dir: &tempfile::TempDir) -> StorageService {
        let service = StorageService::new(Config::default().with_local_storage_path(dir.path()));
        assert!(service.start().await.ok());
        assert!(service.create_bucket("data").await.ok());
        service
    }

    #[tokio::test]
    async fn test_operations_require_running_service() {
        let service = StorageService::new(Config::default());
        let status = service.create_bucket("data").await;
        assert_eq!(status.code(), StatusCode::Unavailable);
        assert!(!status.message().is_empty());

        // Stopping before starting is not an error
        assert!(service.stop().await.ok());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let service = running_service(&dir).await;
        assert!(service.start().await.ok());
        assert!(service.stop().await.ok());
        assert!(service.stop().await.ok());
        assert!(!service.is_running());
        assert!(service.start().await.ok());
        assert!(service.is_running());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_start() {
        let service = StorageService::new(Config::new(""));
        let status = service.start().await;
        assert_eq!(status.code(), StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unreachable_metadata_service_fails_start() {
        let metadata = Arc::new(LocalMetadataService::new("meta:4381"));
        metadata.set_available(false);
        let dir = tempfile::tempdir().unwrap();
        let service = StorageService::with_metadata_service(
            Config::default().with_local_storage_path(dir.path()),
            metadata,
        );
        assert_eq!(service.start().await.code(), StatusCode::Unavailable);
    }

    #[tokio::test]
    async fn test_create_bucket_twice() {
        let dir = tempfile::tempdir().unwrap();
        let service = running_service(&dir).await;
        let status = service.create_bucket("data").await;
        assert_eq!(status.code(), StatusCode::AlreadyExists);
        assert_eq!(
            service.create_bucket("No_Such").await.code(),
            StatusCode::InvalidArgument
        );
    }

    #[tokio::test]
    async fn test_pub_sub_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let service = running_service(&dir).await;
        let status = service.subscribe("data", "", SubscriptionType::Bucket).await;
        assert_eq!(status.code(), StatusCode::Unavailable);
        assert!(service.notifications().value().is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let service = running_service(&dir).await;
        let handle = service.create("data", "a", false).await.into_value().unwrap();
        assert!(handle.write(b"abc", 0, 3).await.ok());

        let stats = service.stats().await;
        assert!(stats.running);
        assert!(stats.started_at.is_some());
        assert_eq!(stats.bucket_count, 1);
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.memory_bytes_used, 3);
        assert_eq!(stats.memory_objects, 1);
    }
}
