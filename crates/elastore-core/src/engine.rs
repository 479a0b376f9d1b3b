//! Reference storage core
//!
//! Keeps object bytes in three tiers (memory, spill files under
//! `local_storage_path`, and the bucket's block store) and enforces the
//! memory and disk budgets of [`Config`].

use crate::{
    bucket::{folder_prefix, plan_prefix_move, validate_object_key, validate_prefix, BucketManager},
    config::Config,
    descriptor::ObjectDescriptor,
    metadata_service::MetadataService,
    object::{ObjectEntry, ObjectState, RemoteObject, Residency, Tier, MAX_METADATA_LEN},
    object_store::{ObjectStoreConfig, ObjectStoreConnector, ObjectStoreRegistry},
    subscription::{
        ChangeKind, ChangeNotification, SubscriptionEvent, SubscriptionRegistry,
        NOTIFICATION_CHANNEL_CAPACITY,
    },
    Result, StorageError,
};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use elastore_blockstore::{BlockStore, Chunker, ChunkerConfig};
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Share of a budget above which a non-forced relocation starts moving data
pub const RELOCATION_WATERMARK: f64 = 0.7;

/// Snapshot of node state reported by `stats()`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub advertised_address: String,
    pub bucket_count: usize,
    pub object_count: usize,
    pub memory_bytes_used: u64,
    pub storage_bytes_used: u64,
    pub memory_objects: usize,
    pub local_objects: usize,
    pub remote_objects: usize,
    pub subscription_count: usize,
    pub object_store_buckets: Vec<String>,
}

fn try_reserve(counter: &AtomicU64, budget: u64, bytes: u64) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
            used.checked_add(bytes).filter(|total| *total <= budget)
        })
        .is_ok()
}

fn release(counter: &AtomicU64, bytes: u64) {
    // The closure always returns Some, so the update cannot fail
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
        Some(used.saturating_sub(bytes))
    });
}

fn above_watermark(used: u64, budget: u64) -> bool {
    used as f64 > budget as f64 * RELOCATION_WATERMARK
}

fn checked_range(buffer_len: usize, position: u64, length: u64) -> Result<u64> {
    if length > buffer_len as u64 {
        return Err(StorageError::InvalidArgument(format!(
            "length {length} exceeds buffer of {buffer_len} bytes"
        )));
    }
    position.checked_add(length).ok_or_else(|| {
        StorageError::InvalidArgument(format!("range {position}+{length} overflows"))
    })
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| StorageError::InvalidArgument(format!("offset {value} is out of range")))
}

async fn read_file_range(path: &Path, position: u64, out: &mut [u8]) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(position)).await?;
    file.read_exact(out).await?;
    Ok(())
}

async fn write_spill_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}

async fn remove_spill_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove spill file");
    }
}

/// The storage core shared by a service and all of its handles
pub(crate) struct StorageCore {
    config: Config,
    buckets: BucketManager,
    memory_used: AtomicU64,
    storage_used: AtomicU64,
    next_object_id: AtomicU64,
    running: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    lifecycle: tokio::sync::Mutex<()>,
    relocations: Mutex<Vec<JoinHandle<()>>>,
    object_stores: ObjectStoreRegistry,
    metadata_service: Arc<dyn MetadataService>,
    subscriptions: SubscriptionRegistry,
    chunker: Chunker,
}

impl StorageCore {
    pub(crate) fn new(
        config: Config,
        metadata_service: Arc<dyn MetadataService>,
        default_store: Arc<dyn BlockStore>,
        connector: Arc<dyn ObjectStoreConnector>,
    ) -> Self {
        // An invalid block size is reported by `start()`
        let chunker = Chunker::with_config(
            ChunkerConfig::with_chunk_size(config.cache_block_size).unwrap_or_default(),
        );
        Self {
            config,
            buckets: BucketManager::new(),
            memory_used: AtomicU64::new(0),
            storage_used: AtomicU64::new(0),
            next_object_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            started_at: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            relocations: Mutex::new(Vec::new()),
            object_stores: ObjectStoreRegistry::new(default_store, connector),
            metadata_service,
            subscriptions: SubscriptionRegistry::new(NOTIFICATION_CHANNEL_CAPACITY),
            chunker,
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(StorageError::Unavailable("service is not running".to_string()))
        }
    }

    // ---- lifecycle ----

    pub(crate) async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_running() {
            return Ok(());
        }
        self.config.validate()?;
        tokio::fs::create_dir_all(&self.config.local_storage_path).await?;
        self.metadata_service.connect().await?;

        *self.started_at.lock() = Some(Utc::now());
        self.running.store(true, Ordering::Release);
        debug!(
            address = %self.config.advertised_address(),
            storage = %self.config.local_storage_path.display(),
            "Storage core started"
        );
        Ok(())
    }

    pub(crate) async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_running() {
            return Ok(());
        }
        self.running.store(false, Ordering::Release);

        let pending: Vec<_> = std::mem::take(&mut *self.relocations.lock());
        debug!(tasks = pending.len(), "Draining relocation tasks");
        for task in pending {
            if let Err(e) = task.await {
                warn!(error = %e, "Relocation task did not complete");
            }
        }

        *self.started_at.lock() = None;
        if self.config.force_relocation_when_stopping {
            let relocated = self.relocate_all(true).await?;
            debug!(relocated, "Relocated local objects before stopping");
        }
        Ok(())
    }

    // ---- budgets and tiers ----

    fn next_id(&self) -> u64 {
        self.next_object_id.fetch_add(1, Ordering::Relaxed)
    }

    fn spill_path(&self, id: u64, bucket: &str, key: &str) -> PathBuf {
        let digest = blake3::hash(key.as_bytes());
        self.config
            .local_storage_path
            .join(bucket)
            .join(format!("{:016x}-{}", id, hex::encode(&digest.as_bytes()[..8])))
    }

    /// Reserve `bytes` of memory, spilling sealed objects if needed
    async fn make_room(&self, bytes: u64) -> Result<()> {
        let budget = self.config.available_local_memory;
        if bytes == 0 || try_reserve(&self.memory_used, budget, bytes) {
            return Ok(());
        }
        let exhausted = || {
            StorageError::ResourceExhausted(format!(
                "cannot fit {bytes} bytes into the local memory budget of {budget} bytes"
            ))
        };
        if bytes > budget {
            return Err(exhausted());
        }

        // Spill nothing unless evicting every candidate would make enough room
        let candidates = self.spill_candidates();
        let free = budget.saturating_sub(self.memory_used.load(Ordering::Acquire));
        let evictable: u64 = candidates.iter().map(|entry| entry.len()).sum();
        if free.saturating_add(evictable) < bytes {
            return Err(exhausted());
        }
        for victim in candidates {
            if self.evict_from_memory(&victim).await?
                && try_reserve(&self.memory_used, budget, bytes)
            {
                return Ok(());
            }
        }
        if try_reserve(&self.memory_used, budget, bytes) {
            return Ok(());
        }
        Err(exhausted())
    }

    /// Sealed memory-resident objects, largest first. Objects whose state
    /// is locked right now are skipped.
    fn spill_candidates(&self) -> Vec<Arc<ObjectEntry>> {
        let mut candidates: Vec<_> = self
            .buckets
            .all_entries()
            .into_iter()
            .filter(|entry| {
                entry.state.try_read().is_ok_and(|state| {
                    state.sealed && !state.deleted && state.residency.tier() == Tier::Memory
                })
            })
            .collect();
        candidates.sort_by_key(|entry| std::cmp::Reverse(entry.len()));
        candidates
    }

    /// Move one sealed object out of memory: to a spill file when the disk
    /// budget allows, otherwise straight to its block store.
    async fn evict_from_memory(&self, entry: &ObjectEntry) -> Result<bool> {
        let Ok(mut state) = entry.state.try_write() else {
            return Ok(false);
        };
        if state.deleted || !state.sealed {
            return Ok(false);
        }
        let Residency::Memory(data) = &state.residency else {
            return Ok(false);
        };
        let len = data.len() as u64;
        let location = entry.location();

        let residency = if try_reserve(&self.storage_used, self.config.available_local_storage, len) {
            let path = self.spill_path(entry.id(), &location.bucket, &location.key);
            if let Err(e) = write_spill_file(&path, data).await {
                release(&self.storage_used, len);
                return Err(e);
            }
            debug!(bucket = %location.bucket, key = %location.key, size = len, "Spilled object to disk");
            Residency::Local { path, len }
        } else {
            let remote = self.store_remote(&location.bucket, data).await?;
            debug!(bucket = %location.bucket, key = %location.key, size = len, "Relocated object from memory");
            Residency::Remote(remote)
        };
        state.residency = residency;
        release(&self.memory_used, len);
        Ok(true)
    }

    /// Chunk `data` into the bucket's block store
    async fn store_remote(&self, bucket: &str, data: &[u8]) -> Result<RemoteObject> {
        let store = self.object_stores.store_for(bucket);
        let chunks = self.chunker.chunk_bytes(data);
        let blocks = try_join_all(chunks.chunks.iter().map(|block| store.put_block(&block.data))).await?;
        trace!(bucket, blocks = blocks.len(), "Stored object blocks");
        Ok(RemoteObject {
            store,
            blocks,
            chunk_size: self.chunker.chunk_size(),
            len: data.len() as u64,
        })
    }

    /// Relocate one sealed local object; `false` when there was nothing to do
    async fn relocate_entry(&self, entry: &ObjectEntry) -> Result<bool> {
        let mut state = entry.state.write().await;
        if state.deleted || !state.sealed {
            return Ok(false);
        }
        let location = entry.location();
        let (remote, spill_file) = match &state.residency {
            Residency::Memory(data) => (self.store_remote(&location.bucket, data).await?, None),
            Residency::Local { path, .. } => {
                let data = tokio::fs::read(path).await?;
                (self.store_remote(&location.bucket, &data).await?, Some(path.clone()))
            }
            Residency::Remote(_) => return Ok(false),
        };
        let len = remote.len;
        state.residency = Residency::Remote(remote);
        match spill_file {
            None => release(&self.memory_used, len),
            Some(path) => {
                release(&self.storage_used, len);
                remove_spill_file(&path).await;
            }
        }
        debug!(bucket = %location.bucket, key = %location.key, size = len, "Relocated object");
        Ok(true)
    }

    fn over_budget(&self) -> bool {
        above_watermark(
            self.memory_used.load(Ordering::Acquire),
            self.config.available_local_memory,
        ) || above_watermark(
            self.storage_used.load(Ordering::Acquire),
            self.config.available_local_storage,
        )
    }

    /// Relocate sealed local objects, largest first. Without `force`, stops
    /// once usage is back under the watermark.
    pub(crate) async fn relocate_all(&self, force: bool) -> Result<usize> {
        let mut candidates = Vec::new();
        for entry in self.buckets.all_entries() {
            let state = entry.state.read().await;
            if state.sealed && !state.deleted && state.residency.tier() != Tier::Remote {
                candidates.push(Arc::clone(&entry));
            }
        }
        candidates.sort_by_key(|entry| std::cmp::Reverse(entry.len()));

        let total = candidates.len();
        let mut relocated = 0;
        let mut failed = 0;
        for entry in candidates {
            if !force && !self.over_budget() {
                break;
            }
            match self.relocate_entry(&entry).await {
                Ok(true) => relocated += 1,
                Ok(false) => {}
                Err(e) => {
                    failed += 1;
                    let location = entry.location();
                    warn!(bucket = %location.bucket, key = %location.key, error = %e, "Relocation failed");
                }
            }
        }
        if failed > 0 {
            return Err(StorageError::PartialFailure(format!(
                "{failed} of {total} objects could not be relocated"
            )));
        }
        Ok(relocated)
    }

    /// Schedule a relocation pass on the current runtime
    ///
    /// The running flag is checked under the task list lock, so `stop()`
    /// either drains the new task or the request is ignored.
    pub(crate) fn relocate(self: &Arc<Self>, force: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Relocation requested outside of a tokio runtime");
            return;
        };
        let mut relocations = self.relocations.lock();
        if !self.is_running() {
            debug!("Ignoring relocation request while stopped");
            return;
        }
        let core = Arc::clone(self);
        let task = runtime.spawn(async move {
            match core.relocate_all(force).await {
                Ok(relocated) => debug!(relocated, force, "Relocation pass finished"),
                Err(e) => warn!(error = %e, force, "Relocation pass finished with errors"),
            }
        });
        relocations.retain(|task| !task.is_finished());
        relocations.push(task);
    }

    /// Drop an entry removed from its bucket and give back its budget
    async fn discard(&self, entry: &ObjectEntry) {
        let mut state = entry.state.write().await;
        if state.deleted {
            return;
        }
        state.deleted = true;
        let residency = std::mem::replace(&mut state.residency, Residency::Memory(BytesMut::new()));
        entry.set_len(0);
        match residency {
            Residency::Memory(data) => release(&self.memory_used, data.len() as u64),
            Residency::Local { path, len } => {
                release(&self.storage_used, len);
                remove_spill_file(&path).await;
            }
            // Blocks are content-addressed and may be shared by copies
            Residency::Remote(_) => {}
        }
    }

    /// Fresh entry holding a copy of `src`'s bytes, metadata and seal
    async fn duplicate(&self, src: &ObjectEntry, bucket: &str, key: &str) -> Result<Arc<ObjectEntry>> {
        let state = src.state.read().await;
        state.ensure_live(src)?;
        let id = self.next_id();

        let residency = match &state.residency {
            Residency::Memory(data) => {
                self.make_room(data.len() as u64).await?;
                Residency::Memory(data.clone())
            }
            Residency::Local { path, len } => {
                let len = *len;
                if try_reserve(&self.storage_used, self.config.available_local_storage, len) {
                    let dest = self.spill_path(id, bucket, key);
                    let copied = async {
                        if let Some(parent) = dest.parent() {
                            tokio::fs::create_dir_all(parent).await?;
                        }
                        tokio::fs::copy(path, &dest).await
                    }
                    .await;
                    if let Err(e) = copied {
                        release(&self.storage_used, len);
                        return Err(e.into());
                    }
                    Residency::Local { path: dest, len }
                } else {
                    let data = tokio::fs::read(path).await?;
                    Residency::Remote(self.store_remote(bucket, &data).await?)
                }
            }
            Residency::Remote(remote) => {
                let store = self.object_stores.store_for(bucket);
                if Arc::ptr_eq(&remote.store, &store) {
                    Residency::Remote(remote.clone())
                } else {
                    let data = remote.fetch_all().await?;
                    Residency::Remote(self.store_remote(bucket, &data).await?)
                }
            }
        };

        Ok(Arc::new(ObjectEntry::with_state(
            id,
            bucket,
            key,
            ObjectState {
                residency,
                metadata: state.metadata.clone(),
                sealed: state.sealed,
                deleted: false,
            },
        )))
    }

    fn publish(&self, bucket: &str, key: &str, kind: ChangeKind) {
        if self.config.pub_sub_enabled {
            self.subscriptions.publish(bucket, key, kind);
        }
    }

    // ---- directory operations ----

    pub(crate) fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.ensure_running()?;
        self.buckets.create_bucket(bucket)?;
        debug!(bucket, "Created bucket");
        Ok(())
    }

    pub(crate) fn mkdirs(&self, bucket: &str, path: &str) -> Result<()> {
        self.ensure_running()?;
        self.buckets.bucket(bucket)?.write().mkdirs(path)
    }

    pub(crate) async fn create(&self, bucket: &str, key: &str, overwrite: bool) -> Result<Arc<ObjectEntry>> {
        self.ensure_running()?;
        validate_object_key(key)?;
        let lock = self.buckets.bucket(bucket)?;
        let entry = Arc::new(ObjectEntry::new(self.next_id(), bucket, key));

        let replaced = {
            let mut guard = lock.write();
            if guard.contains(key) && !overwrite {
                return Err(StorageError::object_already_exists(bucket, key));
            }
            guard.insert(key.to_string(), Arc::clone(&entry))
        };
        if let Some(old) = replaced {
            self.discard(&old).await;
        }
        self.publish(bucket, key, ChangeKind::CreateOrUpdate);
        Ok(entry)
    }

    /// The entry and whether it may be written through a new handle
    pub(crate) async fn open(&self, bucket: &str, key: &str) -> Result<(Arc<ObjectEntry>, bool)> {
        self.ensure_running()?;
        validate_object_key(key)?;
        let entry = self
            .buckets
            .bucket(bucket)?
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::object_not_found(bucket, key))?;
        let writeable = {
            let state = entry.state.read().await;
            state.ensure_live(&entry)?;
            !state.sealed
        };
        Ok((entry, writeable))
    }

    pub(crate) fn status(&self, bucket: &str, key: &str) -> Result<ObjectDescriptor> {
        self.ensure_running()?;
        validate_object_key(key)?;
        let lock = self.buckets.bucket(bucket)?;
        let guard = lock.read();
        if let Some(entry) = guard.get(key) {
            return Ok(ObjectDescriptor::file(key, entry.len()));
        }
        if guard.directory_exists(key) {
            return Ok(ObjectDescriptor::directory(folder_prefix(key)));
        }
        Err(StorageError::object_not_found(bucket, key))
    }

    pub(crate) fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectDescriptor>> {
        self.ensure_running()?;
        validate_prefix(prefix)?;
        Ok(self.buckets.bucket(bucket)?.read().list_prefix(prefix))
    }

    pub(crate) fn list_folder(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectDescriptor>> {
        self.ensure_running()?;
        validate_prefix(prefix)?;
        Ok(self.buckets.bucket(bucket)?.read().list_folder(prefix))
    }

    pub(crate) async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.ensure_running()?;
        validate_object_key(key)?;
        let entry = self
            .buckets
            .bucket(bucket)?
            .write()
            .remove(key)
            .ok_or_else(|| StorageError::object_not_found(bucket, key))?;
        self.discard(&entry).await;
        self.publish(bucket, key, ChangeKind::Delete);
        Ok(())
    }

    /// Delete every object under `prefix`; returns how many were removed
    pub(crate) async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<usize> {
        self.ensure_running()?;
        validate_prefix(prefix)?;
        let removed = self.buckets.bucket(bucket)?.write().remove_prefix(prefix);
        for (key, entry) in &removed {
            self.discard(entry).await;
            self.publish(bucket, key, ChangeKind::Delete);
        }
        Ok(removed.len())
    }

    pub(crate) fn rename(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        self.ensure_running()?;
        validate_object_key(src_key)?;
        validate_object_key(dst_key)?;

        self.buckets.with_pair(src_bucket, dst_bucket, |src, dst| {
            if !src.contains(src_key) {
                return Err(StorageError::object_not_found(src_bucket, src_key));
            }
            if dst.is_none() && src_key == dst_key {
                return Ok(());
            }
            let exists = match &dst {
                Some(dst) => dst.contains(dst_key),
                None => src.contains(dst_key),
            };
            if exists {
                return Err(StorageError::object_already_exists(dst_bucket, dst_key));
            }
            let entry = src
                .remove(src_key)
                .ok_or_else(|| StorageError::object_not_found(src_bucket, src_key))?;
            entry.set_location(dst_bucket, dst_key);
            dst.unwrap_or(src).insert(dst_key.to_string(), entry);
            Ok(())
        })?;

        if (src_bucket, src_key) != (dst_bucket, dst_key) {
            self.publish(src_bucket, src_key, ChangeKind::Delete);
            self.publish(dst_bucket, dst_key, ChangeKind::CreateOrUpdate);
        }
        Ok(())
    }

    /// Move every object and marker under `src_prefix`; all-or-nothing
    pub(crate) fn rename_prefix(
        &self,
        src_bucket: &str,
        src_prefix: &str,
        dst_bucket: &str,
        dst_prefix: &str,
    ) -> Result<usize> {
        self.ensure_running()?;
        validate_prefix(src_prefix)?;
        validate_prefix(dst_prefix)?;

        let plan = self.buckets.with_pair(src_bucket, dst_bucket, |src, dst| {
            let plan = plan_prefix_move(src, dst.as_deref(), src_prefix, dst_prefix, true)?;
            if dst.is_none() && src_prefix == dst_prefix {
                return Ok(Vec::new());
            }
            let moved: Vec<_> = plan
                .iter()
                .filter_map(|(from, to)| src.remove(from).map(|entry| (to.clone(), entry)))
                .collect();
            let markers = src.take_directories(src_prefix);

            let target = dst.unwrap_or(src);
            for (to, entry) in moved {
                entry.set_location(dst_bucket, &to);
                target.insert(to, entry);
            }
            for marker in markers {
                target.insert_directory(format!("{}{}", dst_prefix, &marker[src_prefix.len()..]));
            }
            Ok(plan)
        })?;

        for (from, to) in &plan {
            self.publish(src_bucket, from, ChangeKind::Delete);
            self.publish(dst_bucket, to, ChangeKind::CreateOrUpdate);
        }
        debug!(src_bucket, src_prefix, dst_bucket, dst_prefix, moved = plan.len(), "Renamed prefix");
        Ok(plan.len())
    }

    pub(crate) async fn copy(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        self.ensure_running()?;
        validate_object_key(src_key)?;
        validate_object_key(dst_key)?;

        let source = self.buckets.with_pair(src_bucket, dst_bucket, |src, dst| {
            let entry = src
                .get(src_key)
                .cloned()
                .ok_or_else(|| StorageError::object_not_found(src_bucket, src_key))?;
            let exists = match &dst {
                Some(dst) => dst.contains(dst_key),
                None => src.contains(dst_key),
            };
            if exists {
                return Err(StorageError::object_already_exists(dst_bucket, dst_key));
            }
            Ok(entry)
        })?;

        let copy = self.duplicate(&source, dst_bucket, dst_key).await?;
        self.insert_copies(dst_bucket, vec![(dst_key.to_string(), copy)], Vec::new()).await?;
        self.publish(dst_bucket, dst_key, ChangeKind::CreateOrUpdate);
        Ok(())
    }

    /// Copy every object and marker under `src_prefix`; all-or-nothing
    pub(crate) async fn copy_prefix(
        &self,
        src_bucket: &str,
        src_prefix: &str,
        dst_bucket: &str,
        dst_prefix: &str,
    ) -> Result<usize> {
        self.ensure_running()?;
        validate_prefix(src_prefix)?;
        validate_prefix(dst_prefix)?;

        let (sources, markers) = self.buckets.with_pair(src_bucket, dst_bucket, |src, dst| {
            let plan = plan_prefix_move(src, dst.as_deref(), src_prefix, dst_prefix, false)?;
            let sources: Vec<_> = plan
                .into_iter()
                .filter_map(|(from, to)| src.get(&from).cloned().map(|entry| (to, entry)))
                .collect();
            let markers: Vec<_> = src
                .directories_with_prefix(src_prefix)
                .into_iter()
                .map(|marker| format!("{}{}", dst_prefix, &marker[src_prefix.len()..]))
                .collect();
            Ok((sources, markers))
        })?;

        let mut copies = Vec::with_capacity(sources.len());
        for (to, entry) in &sources {
            match self.duplicate(entry, dst_bucket, to).await {
                Ok(copy) => copies.push((to.clone(), copy)),
                Err(e) => {
                    for (_, copy) in &copies {
                        self.discard(copy).await;
                    }
                    return Err(e);
                }
            }
        }
        let count = copies.len();
        self.insert_copies(dst_bucket, copies, markers).await?;
        for (to, _) in &sources {
            self.publish(dst_bucket, to, ChangeKind::CreateOrUpdate);
        }
        Ok(count)
    }

    /// Insert freshly made copies unless a destination appeared meanwhile
    async fn insert_copies(
        &self,
        bucket: &str,
        copies: Vec<(String, Arc<ObjectEntry>)>,
        markers: Vec<String>,
    ) -> Result<()> {
        let conflict = {
            let lock = self.buckets.bucket(bucket)?;
            let mut guard = lock.write();
            match copies.iter().find(|(key, _)| guard.contains(key)) {
                Some((key, _)) => Some(key.clone()),
                None => {
                    for (key, copy) in &copies {
                        guard.insert(key.clone(), Arc::clone(copy));
                    }
                    for marker in markers {
                        guard.insert_directory(marker);
                    }
                    None
                }
            }
        };
        if let Some(key) = conflict {
            for (_, copy) in &copies {
                self.discard(copy).await;
            }
            return Err(StorageError::object_already_exists(bucket, &key));
        }
        Ok(())
    }

    /// Spill file backing the object, or an empty string
    pub(crate) async fn local_path(&self, bucket: &str, key: &str) -> String {
        if !self.is_running() {
            return String::new();
        }
        let Ok(lock) = self.buckets.bucket(bucket) else {
            return String::new();
        };
        let Some(entry) = lock.read().get(key).cloned() else {
            return String::new();
        };
        let state = entry.state.read().await;
        match &state.residency {
            Residency::Local { path, .. } if !state.deleted => path.display().to_string(),
            _ => String::new(),
        }
    }

    // ---- file operations ----

    pub(crate) async fn size(&self, entry: &ObjectEntry) -> Result<u64> {
        self.ensure_running()?;
        let state = entry.state.read().await;
        state.ensure_live(entry)?;
        Ok(state.residency.len())
    }

    pub(crate) async fn is_sealed(&self, entry: &ObjectEntry) -> Result<bool> {
        self.ensure_running()?;
        let state = entry.state.read().await;
        state.ensure_live(entry)?;
        Ok(state.sealed)
    }

    pub(crate) async fn metadata(&self, entry: &ObjectEntry) -> Result<String> {
        self.ensure_running()?;
        let state = entry.state.read().await;
        state.ensure_live(entry)?;
        Ok(state.metadata.clone())
    }

    /// Read into `buffer[..length]`; short only at end of object
    pub(crate) async fn read(&self, entry: &ObjectEntry, buffer: &mut [u8], position: u64, length: u64) -> Result<u64> {
        self.ensure_running()?;
        checked_range(buffer.len(), position, length)?;

        let state = entry.state.read().await;
        state.ensure_live(entry)?;
        let len = state.residency.len();
        if position >= len || length == 0 {
            return Ok(0);
        }
        let count = length.min(len - position);
        let out = &mut buffer[..count as usize];

        let from_remote = match &state.residency {
            Residency::Memory(data) => {
                let start = to_usize(position)?;
                out.copy_from_slice(&data[start..start + out.len()]);
                false
            }
            Residency::Local { path, .. } => {
                read_file_range(path, position, out).await?;
                false
            }
            Residency::Remote(remote) => {
                remote.read_range(position, out).await?;
                true
            }
        };
        drop(state);

        if from_remote && self.config.cache_objects_from_s3 {
            self.cache_in_memory(entry).await;
        }
        Ok(count)
    }

    /// Bring a relocated object back into memory if the budget allows
    async fn cache_in_memory(&self, entry: &ObjectEntry) {
        let mut state = entry.state.write().await;
        if state.deleted {
            return;
        }
        let Residency::Remote(remote) = &state.residency else {
            return;
        };
        let remote = remote.clone();
        if !try_reserve(&self.memory_used, self.config.available_local_memory, remote.len) {
            return;
        }
        match remote.fetch_all().await {
            Ok(data) => {
                trace!(size = remote.len, "Cached relocated object in memory");
                state.residency = Residency::Memory(data);
            }
            Err(e) => {
                release(&self.memory_used, remote.len);
                warn!(error = %e, "Failed to cache relocated object");
            }
        }
    }

    pub(crate) async fn write(
        &self,
        entry: &ObjectEntry,
        identifier: &str,
        writeable: bool,
        buffer: &[u8],
        position: u64,
        length: u64,
    ) -> Result<()> {
        self.ensure_running()?;
        let end = checked_range(buffer.len(), position, length)?;

        let mut state = entry.state.write().await;
        state.ensure_live(entry)?;
        state.ensure_mutable(identifier, writeable)?;
        if length == 0 {
            return Ok(());
        }
        let (start, end) = (to_usize(position)?, to_usize(end)?);

        let Residency::Memory(data) = &mut state.residency else {
            return Err(StorageError::Internal(format!(
                "unsealed object {identifier} is not memory-resident"
            )));
        };
        let growth = (end as u64).saturating_sub(data.len() as u64);
        self.make_room(growth).await?;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(&buffer[..end - start]);
        entry.set_len(data.len() as u64);
        trace!(identifier, position, length, "Wrote bytes");
        Ok(())
    }

    /// Shrink, or zero-fill up to `size`
    pub(crate) async fn truncate(&self, entry: &ObjectEntry, identifier: &str, writeable: bool, size: u64) -> Result<()> {
        self.ensure_running()?;
        let mut state = entry.state.write().await;
        state.ensure_live(entry)?;
        state.ensure_mutable(identifier, writeable)?;
        let new_len = to_usize(size)?;

        let Residency::Memory(data) = &mut state.residency else {
            return Err(StorageError::Internal(format!(
                "unsealed object {identifier} is not memory-resident"
            )));
        };
        let current = data.len();
        if new_len > current {
            self.make_room((new_len - current) as u64).await?;
            data.resize(new_len, 0);
        } else {
            data.truncate(new_len);
            release(&self.memory_used, (current - new_len) as u64);
        }
        entry.set_len(size);
        Ok(())
    }

    /// Idempotent; only a live handle may seal an unsealed object
    pub(crate) async fn seal(&self, entry: &ObjectEntry, identifier: &str, writeable: bool) -> Result<()> {
        self.ensure_running()?;
        let mut state = entry.state.write().await;
        state.ensure_live(entry)?;
        if state.sealed {
            return Ok(());
        }
        state.ensure_mutable(identifier, writeable)?;
        state.sealed = true;
        drop(state);

        let location = entry.location();
        self.publish(&location.bucket, &location.key, ChangeKind::CreateOrUpdate);
        Ok(())
    }

    /// Replace the metadata and optionally seal, as one step
    pub(crate) async fn set_metadata(
        &self,
        entry: &ObjectEntry,
        identifier: &str,
        writeable: bool,
        value: &str,
        seal: bool,
    ) -> Result<()> {
        self.ensure_running()?;
        if value.len() > MAX_METADATA_LEN {
            return Err(StorageError::InvalidArgument(format!(
                "metadata of {} bytes exceeds the limit of {MAX_METADATA_LEN} bytes",
                value.len()
            )));
        }
        let mut state = entry.state.write().await;
        state.ensure_live(entry)?;
        state.ensure_mutable(identifier, writeable)?;
        state.metadata = value.to_string();
        if seal {
            state.sealed = true;
        }
        drop(state);

        if seal {
            let location = entry.location();
            self.publish(&location.bucket, &location.key, ChangeKind::CreateOrUpdate);
        }
        Ok(())
    }

    // ---- object stores ----

    pub(crate) async fn register_object_store_config(
        &self,
        bucket: &str,
        endpoint_url: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<()> {
        self.ensure_running()?;
        crate::bucket::validate_bucket_name(bucket)?;
        let config = ObjectStoreConfig::new(bucket, endpoint_url, access_key, secret_key)?;
        self.object_stores.register(config.clone())?;
        self.metadata_service
            .register_object_store_config(&config)
            .await
            .map_err(|e| {
                StorageError::Unavailable(format!(
                    "object store for {bucket} registered locally but not published: {e}"
                ))
            })
    }

    /// Push local configs to the metadata service, then adopt the ones
    /// other nodes registered. Returns how many configs were adopted.
    pub(crate) async fn sync_object_store_configs(&self) -> Result<usize> {
        self.ensure_running()?;
        for config in self.object_stores.configs() {
            self.metadata_service
                .register_object_store_config(&config)
                .await
                .map_err(|e| StorageError::Unavailable(format!("cannot publish object store configs: {e}")))?;
        }
        let remote = self
            .metadata_service
            .list_object_store_configs()
            .await
            .map_err(|e| StorageError::Unavailable(format!("cannot fetch object store configs: {e}")))?;

        let mut adopted = 0;
        for config in remote {
            if !self.object_stores.contains(&config) {
                self.object_stores.register(config)?;
                adopted += 1;
            }
        }
        debug!(adopted, "Synchronised object store configs");
        Ok(adopted)
    }

    pub(crate) fn object_store_buckets(&self) -> Vec<String> {
        self.object_stores.buckets()
    }

    // ---- subscriptions ----

    fn ensure_pub_sub(&self) -> Result<()> {
        self.ensure_running()?;
        if self.config.pub_sub_enabled {
            Ok(())
        } else {
            Err(StorageError::Unavailable("pub/sub is disabled".to_string()))
        }
    }

    pub(crate) fn subscribe(&self, event: SubscriptionEvent) -> Result<()> {
        self.ensure_pub_sub()?;
        event.validate()?;
        if self.subscriptions.register(event.clone()) {
            debug!(bucket = %event.bucket, key = %event.key, kind = ?event.subscription_type, "Subscribed");
        }
        Ok(())
    }

    pub(crate) fn unsubscribe(&self, event: &SubscriptionEvent) -> Result<()> {
        self.ensure_pub_sub()?;
        if self.subscriptions.unregister(event) {
            Ok(())
        } else {
            Err(StorageError::SubscriptionNotFound(format!(
                "{:?} {}/{}",
                event.subscription_type, event.bucket, event.key
            )))
        }
    }

    pub(crate) fn notifications(&self) -> Result<broadcast::Receiver<ChangeNotification>> {
        self.ensure_pub_sub()?;
        Ok(self.subscriptions.receiver())
    }

    // ---- stats ----

    pub(crate) async fn stats(&self) -> ServiceStats {
        let mut stats = ServiceStats {
            running: self.is_running(),
            started_at: *self.started_at.lock(),
            advertised_address: self.config.advertised_address(),
            bucket_count: self.buckets.bucket_count(),
            memory_bytes_used: self.memory_used.load(Ordering::Acquire),
            storage_bytes_used: self.storage_used.load(Ordering::Acquire),
            subscription_count: self.subscriptions.len(),
            object_store_buckets: self.object_stores.buckets(),
            ..Default::default()
        };
        for name in self.buckets.list_buckets() {
            if let Ok(lock) = self.buckets.bucket(&name) {
                stats.object_count += lock.read().object_count();
            }
        }
        for entry in self.buckets.all_entries() {
            match entry.state.read().await.residency.tier() {
                Tier::Memory => stats.memory_objects += 1,
                Tier::Local => stats.local_objects += 1,
                Tier::Remote => stats.remote_objects += 1,
            }
        }
        stats
    }
}
