//! Bucket namespaces
//!
//! A bucket maps keys to object entries and records explicit directory
//! markers created by `mkdirs`. Directory entries in folder listings come
//! from both markers and deeper keys.

use crate::{
    descriptor::ObjectDescriptor,
    object::ObjectEntry,
    Result, StorageError,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;
use std::sync::Arc;

/// Longest accepted object key
pub const MAX_KEY_LEN: usize = 1024;

/// Objects and directory markers of one bucket
pub(crate) struct Bucket {
    name: String,
    objects: BTreeMap<String, Arc<ObjectEntry>>,
    /// Directory markers, each ending in `/`
    directories: BTreeSet<String>,
}

impl Bucket {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: BTreeMap::new(),
            directories: BTreeSet::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Arc<ObjectEntry>> {
        self.objects.get(key)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    /// Insert an entry, returning the one it replaced
    pub(crate) fn insert(&mut self, key: String, entry: Arc<ObjectEntry>) -> Option<Arc<ObjectEntry>> {
        self.objects.insert(key, entry)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Arc<ObjectEntry>> {
        self.objects.remove(key)
    }

    pub(crate) fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &Arc<ObjectEntry>> {
        self.objects.values()
    }

    /// Keys starting with `prefix`, in order
    pub(crate) fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .range::<str, _>(scan_from(prefix))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove every object and marker under `prefix`
    pub(crate) fn remove_prefix(&mut self, prefix: &str) -> Vec<(String, Arc<ObjectEntry>)> {
        self.take_directories(prefix);
        self.keys_with_prefix(prefix)
            .into_iter()
            .filter_map(|key| self.objects.remove(&key).map(|entry| (key, entry)))
            .collect()
    }

    /// Record `path` and all of its ancestors as directories
    pub(crate) fn mkdirs(&mut self, path: &str) -> Result<()> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(StorageError::InvalidArgument(
                "directory path must not be empty".to_string(),
            ));
        }
        validate_object_key(trimmed)?;
        if trimmed.split('/').any(str::is_empty) {
            return Err(StorageError::InvalidArgument(format!(
                "directory path {path:?} has an empty segment"
            )));
        }

        let mut marker = String::with_capacity(trimmed.len() + 1);
        for segment in trimmed.split('/') {
            marker.push_str(segment);
            marker.push('/');
            self.directories.insert(marker.clone());
        }
        Ok(())
    }

    /// Whether `path` names a directory, by marker or by deeper keys
    pub(crate) fn directory_exists(&self, path: &str) -> bool {
        let folder = folder_prefix(path);
        if folder.is_empty() {
            return false;
        }
        self.directories.contains(&folder)
            || self
                .objects
                .range::<str, _>(scan_from(&folder))
                .next()
                .is_some_and(|(key, _)| key.starts_with(&folder))
    }

    /// Remove the markers under `prefix`, returning them
    pub(crate) fn take_directories(&mut self, prefix: &str) -> Vec<String> {
        let taken: Vec<String> = self
            .directories
            .range::<str, _>(scan_from(prefix))
            .take_while(|marker| marker.starts_with(prefix))
            .cloned()
            .collect();
        for marker in &taken {
            self.directories.remove(marker);
        }
        taken
    }

    /// Markers under `prefix`
    pub(crate) fn directories_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.directories
            .range::<str, _>(scan_from(prefix))
            .take_while(|marker| marker.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub(crate) fn insert_directory(&mut self, marker: String) {
        self.directories.insert(marker);
    }

    /// Flat listing of every object under `prefix`
    pub(crate) fn list_prefix(&self, prefix: &str) -> Vec<ObjectDescriptor> {
        self.objects
            .range::<str, _>(scan_from(prefix))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| ObjectDescriptor::file(key.clone(), entry.len()))
            .collect()
    }

    /// Direct children of the folder `prefix`: objects, then one directory
    /// entry per child folder, merged in key order.
    pub(crate) fn list_folder(&self, prefix: &str) -> Vec<ObjectDescriptor> {
        let folder = folder_prefix(prefix);
        let mut children: BTreeMap<String, ObjectDescriptor> = BTreeMap::new();

        for (key, entry) in self
            .objects
            .range::<str, _>(scan_from(&folder))
            .take_while(|(key, _)| key.starts_with(&folder))
        {
            let rest = &key[folder.len()..];
            match rest.find('/') {
                Some(pos) => {
                    let dir = format!("{}{}", folder, &rest[..=pos]);
                    children
                        .entry(dir.clone())
                        .or_insert_with(|| ObjectDescriptor::directory(dir));
                }
                None if !rest.is_empty() => {
                    children.insert(key.clone(), ObjectDescriptor::file(key.clone(), entry.len()));
                }
                None => {}
            }
        }

        for marker in self.directories_with_prefix(&folder) {
            let rest = &marker[folder.len()..];
            if let Some(pos) = rest.find('/') {
                if pos == 0 {
                    continue;
                }
                let dir = format!("{}{}", folder, &rest[..=pos]);
                children
                    .entry(dir.clone())
                    .or_insert_with(|| ObjectDescriptor::directory(dir));
            }
        }

        children.into_values().collect()
    }
}

/// Keys at or after `start`, for ordered prefix scans
fn scan_from(start: &str) -> (Bound<&str>, Bound<&str>) {
    (Bound::Included(start), Bound::Unbounded)
}

/// Normalise a folder path: empty stays empty, otherwise it ends in `/`
pub(crate) fn folder_prefix(path: &str) -> String {
    if path.is_empty() || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Every bucket on the node
#[derive(Default)]
pub(crate) struct BucketManager {
    buckets: DashMap<String, Arc<RwLock<Bucket>>>,
}

impl BucketManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create_bucket(&self, name: &str) -> Result<()> {
        validate_bucket_name(name)?;
        match self.buckets.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StorageError::BucketAlreadyExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(Bucket::new(name))));
                Ok(())
            }
        }
    }

    /// The bucket's lock; the map guard is released before returning
    ///
    /// Malformed names are rejected before the lookup.
    pub(crate) fn bucket(&self, name: &str) -> Result<Arc<RwLock<Bucket>>> {
        validate_bucket_name(name)?;
        self.buckets
            .get(name)
            .map(|b| Arc::clone(&b))
            .ok_or_else(|| StorageError::BucketNotFound(name.to_string()))
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Sorted bucket names
    pub(crate) fn list_buckets(&self) -> Vec<String> {
        let mut names: Vec<_> = self.buckets.iter().map(|b| b.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of every object entry on the node
    pub(crate) fn all_entries(&self) -> Vec<Arc<ObjectEntry>> {
        let locks: Vec<_> = self.buckets.iter().map(|b| Arc::clone(b.value())).collect();
        locks
            .iter()
            .flat_map(|lock| lock.read().entries().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Run `f` with write access to `src` and, when it differs, `dst`.
    ///
    /// Two buckets are always locked in name order.
    pub(crate) fn with_pair<R>(
        &self,
        src: &str,
        dst: &str,
        f: impl FnOnce(&mut Bucket, Option<&mut Bucket>) -> Result<R>,
    ) -> Result<R> {
        let src_lock = self.bucket(src)?;
        if src == dst {
            let mut guard = src_lock.write();
            return f(&mut guard, None);
        }
        let dst_lock = self.bucket(dst)?;
        let (mut src_guard, mut dst_guard) = if src < dst {
            let s = src_lock.write();
            let d = dst_lock.write();
            (s, d)
        } else {
            let d = dst_lock.write();
            let s = src_lock.write();
            (s, d)
        };
        f(&mut src_guard, Some(&mut dst_guard))
    }
}

/// Source/destination key pairs of a prefix move, rejecting destinations
/// that already hold an object not itself part of the move.
///
/// A prefix holding only directory markers yields an empty plan; one with
/// neither objects nor markers is not found.
pub(crate) fn plan_prefix_move(
    src: &Bucket,
    dst: Option<&Bucket>,
    src_prefix: &str,
    dst_prefix: &str,
    moving: bool,
) -> Result<Vec<(String, String)>> {
    let keys = src.keys_with_prefix(src_prefix);
    if keys.is_empty() && src.directories_with_prefix(src_prefix).is_empty() {
        return Err(StorageError::object_not_found(src.name(), src_prefix));
    }
    let leaving: HashSet<&str> = if moving && dst.is_none() {
        keys.iter().map(String::as_str).collect()
    } else {
        HashSet::new()
    };

    let mut plan = Vec::with_capacity(keys.len());
    for key in &keys {
        let dest_key = format!("{}{}", dst_prefix, &key[src_prefix.len()..]);
        validate_object_key(&dest_key)?;
        let target = dst.unwrap_or(src);
        if target.contains(&dest_key) && !leaving.contains(dest_key.as_str()) {
            return Err(StorageError::object_already_exists(target.name(), &dest_key));
        }
        plan.push((key.clone(), dest_key));
    }
    Ok(plan)
}

/// Validate bucket name according to S3 rules
pub(crate) fn validate_bucket_name(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 63 {
        return Err(StorageError::InvalidBucketName(
            "Bucket name must be between 3 and 63 characters".to_string(),
        ));
    }

    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.') {
        return Err(StorageError::InvalidBucketName(
            "Bucket name can only contain lowercase letters, numbers, hyphens, and periods".to_string(),
        ));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(StorageError::InvalidBucketName(
            "Bucket name cannot start or end with a hyphen".to_string(),
        ));
    }

    Ok(())
}

/// Validate object key
pub(crate) fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidObjectKey("Key cannot be empty".to_string()));
    }
    validate_prefix(key)
}

/// Prefixes may be empty but otherwise follow the key rules
pub(crate) fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidObjectKey(format!(
            "Key cannot exceed {MAX_KEY_LEN} characters"
        )));
    }
    if prefix.chars().any(char::is_control) {
        return Err(StorageError::InvalidObjectKey(
            "Key cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_with(keys: &[&str]) -> Bucket {
        let mut bucket = Bucket::new("data");
        for (i, key) in keys.iter().enumerate() {
            bucket.insert(key.to_string(), Arc::new(ObjectEntry::new(i as u64, "data", key)));
        }
        bucket
    }

    #[test]
    fn test_bucket_name_validation() {
        assert!(validate_bucket_name("my-bucket").is_ok());
        assert!(validate_bucket_name("my.bucket.name").is_ok());
        assert!(validate_bucket_name("bucket123").is_ok());

        assert!(validate_bucket_name("ab").is_err()); // Too short
        assert!(validate_bucket_name("-bucket").is_err()); // Starts with hyphen
        assert!(validate_bucket_name("Bucket").is_err()); // Uppercase
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_object_key("logs/a.txt").is_ok());
        assert!(validate_object_key("").is_err());
        assert!(validate_object_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(validate_object_key("bad\nkey").is_err());
        assert!(validate_prefix("").is_ok());
    }

    #[test]
    fn test_mkdirs_records_ancestors() {
        let mut bucket = Bucket::new("data");
        bucket.mkdirs("logs/2024/01").unwrap();
        bucket.mkdirs("logs/2024/01/").unwrap();

        assert!(bucket.directory_exists("logs"));
        assert!(bucket.directory_exists("logs/2024/"));
        assert!(bucket.directory_exists("logs/2024/01"));
        assert!(!bucket.directory_exists("metrics"));

        assert!(bucket.mkdirs("").is_err());
        assert!(bucket.mkdirs("a//b").is_err());
    }

    #[test]
    fn test_list_prefix_is_flat() {
        let bucket = bucket_with(&["logs/a", "logs/deep/b", "metrics/c"]);
        let keys: Vec<_> = bucket.list_prefix("logs/").into_iter().map(|d| d.key).collect();
        assert_eq!(keys, vec!["logs/a", "logs/deep/b"]);
        assert!(bucket.list_prefix("nothing").is_empty());
    }

    #[test]
    fn test_list_folder_groups_children() {
        let mut bucket = bucket_with(&["logs/a", "logs/deep/b", "logs/deep/c"]);
        bucket.mkdirs("logs/empty").unwrap();

        let listing = bucket.list_folder("logs");
        let keys: Vec<_> = listing.iter().map(|d| (d.key.as_str(), d.is_directory)).collect();
        assert_eq!(
            keys,
            vec![("logs/a", false), ("logs/deep/", true), ("logs/empty/", true)]
        );

        let root = bucket.list_folder("");
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].key, "logs/");
    }

    #[test]
    fn test_remove_prefix_leaves_siblings() {
        let mut bucket = bucket_with(&["tmp/a", "tmp/b", "tmpfile", "keep"]);
        let removed = bucket.remove_prefix("tmp/");
        assert_eq!(removed.len(), 2);
        assert!(bucket.contains("tmpfile"));
        assert!(bucket.contains("keep"));
    }

    #[test]
    fn test_plan_prefix_move_conflicts() {
        let bucket = bucket_with(&["a/x", "a/y", "b/x"]);

        let err = plan_prefix_move(&bucket, None, "a/", "b/", true).unwrap_err();
        assert!(matches!(err, StorageError::ObjectAlreadyExists { .. }));

        let plan = plan_prefix_move(&bucket, None, "a/", "c/", true).unwrap();
        assert_eq!(plan[0], ("a/x".to_string(), "c/x".to_string()));

        assert!(matches!(
            plan_prefix_move(&bucket, None, "z/", "c/", true),
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_plan_prefix_move_of_markers_only() {
        let mut bucket = bucket_with(&["other"]);
        bucket.mkdirs("empty/sub").unwrap();

        let plan = plan_prefix_move(&bucket, None, "empty/", "moved/", true).unwrap();
        assert!(plan.is_empty());
        assert!(plan_prefix_move(&bucket, None, "none/", "moved/", false).is_err());
    }

    #[test]
    fn test_bucket_manager() {
        let manager = BucketManager::new();
        manager.create_bucket("bucket1").unwrap();
        manager.create_bucket("bucket2").unwrap();

        assert!(manager.bucket("bucket1").is_ok());
        assert!(manager.bucket("bucket3").is_err());
        assert!(matches!(
            manager.create_bucket("bucket1"),
            Err(StorageError::BucketAlreadyExists(_))
        ));
        assert_eq!(manager.list_buckets(), vec!["bucket1", "bucket2"]);
        assert!(manager.bucket("bucket3").is_err());
    }

    #[test]
    fn test_lookup_rejects_malformed_names() {
        let manager = BucketManager::new();
        manager.create_bucket("bucket1").unwrap();

        for name in ["", "Bucket1", "b", "-bucket1"] {
            assert!(matches!(manager.bucket(name), Err(StorageError::InvalidBucketName(_))));
        }
        assert!(matches!(
            manager.with_pair("bucket1", "Bad_Bucket", |_, _| Ok(())),
            Err(StorageError::InvalidBucketName(_))
        ));
    }
}
