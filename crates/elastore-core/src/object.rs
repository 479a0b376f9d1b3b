//! In-core object state
//!
//! An object's bytes live in exactly one tier at a time:
//!
//! ```text
//! Memory ──spill──▶ Local file ──relocate──▶ Remote blocks
//!    ▲                                           │
//!    └──────────── read-through cache ───────────┘
//! ```
//!
//! Only sealed objects leave the memory tier.

use crate::{Result, StorageError};
use bytes::BytesMut;
use elastore_blockstore::{BlockStore, Chunker, ChunkerConfig, Cid};
use futures::future::try_join_all;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Longest metadata value accepted by `set_metadata`
pub const MAX_METADATA_LEN: usize = 64 * 1024;

/// Tier an object currently lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tier {
    Memory,
    Local,
    Remote,
}

/// Object bytes relocated into a block store
#[derive(Clone)]
pub(crate) struct RemoteObject {
    pub(crate) store: Arc<dyn BlockStore>,
    pub(crate) blocks: Vec<Cid>,
    pub(crate) chunk_size: usize,
    pub(crate) len: u64,
}

impl RemoteObject {
    /// Fill `out` with the bytes starting at `position`, fetching only the
    /// blocks that cover the range.
    pub(crate) async fn read_range(&self, position: u64, out: &mut [u8]) -> Result<()> {
        let chunker = Chunker::with_config(ChunkerConfig {
            chunk_size: self.chunk_size,
        });
        let range = chunker.covering_chunks(self.len, position, out.len() as u64);
        let first = range.start;
        let fetched = try_join_all(
            self.blocks[range]
                .iter()
                .map(|cid| self.store.get_verified_block(cid)),
        )
        .await?;

        let end = position + out.len() as u64;
        for (offset, block) in fetched.iter().enumerate() {
            let block_start = ((first + offset) * self.chunk_size) as u64;
            let block_end = block_start + block.len() as u64;
            let from = position.max(block_start);
            let to = end.min(block_end);
            if from >= to {
                continue;
            }
            let src = &block[(from - block_start) as usize..(to - block_start) as usize];
            out[(from - position) as usize..(to - position) as usize].copy_from_slice(src);
        }
        Ok(())
    }

    /// Fetch the whole object
    pub(crate) async fn fetch_all(&self) -> Result<BytesMut> {
        let mut data = BytesMut::zeroed(self.len as usize);
        self.read_range(0, &mut data).await?;
        Ok(data)
    }
}

pub(crate) enum Residency {
    Memory(BytesMut),
    Local { path: PathBuf, len: u64 },
    Remote(RemoteObject),
}

impl Residency {
    pub(crate) fn len(&self) -> u64 {
        match self {
            Self::Memory(data) => data.len() as u64,
            Self::Local { len, .. } => *len,
            Self::Remote(remote) => remote.len,
        }
    }

    pub(crate) fn tier(&self) -> Tier {
        match self {
            Self::Memory(_) => Tier::Memory,
            Self::Local { .. } => Tier::Local,
            Self::Remote(_) => Tier::Remote,
        }
    }
}

pub(crate) struct ObjectState {
    pub(crate) residency: Residency,
    pub(crate) metadata: String,
    pub(crate) sealed: bool,
    /// Set once the object is removed from its bucket; handles still
    /// holding the entry report `NotFound` from then on.
    pub(crate) deleted: bool,
}

impl ObjectState {
    pub(crate) fn new() -> Self {
        Self {
            residency: Residency::Memory(BytesMut::new()),
            metadata: String::new(),
            sealed: false,
            deleted: false,
        }
    }

    pub(crate) fn ensure_live(&self, entry: &ObjectEntry) -> Result<()> {
        if self.deleted {
            Err(entry.not_found())
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_mutable(&self, identifier: &str, writeable: bool) -> Result<()> {
        if self.sealed {
            return Err(StorageError::NotWriteable {
                identifier: identifier.to_string(),
                reason: "sealed",
            });
        }
        if !writeable {
            return Err(StorageError::NotWriteable {
                identifier: identifier.to_string(),
                reason: "opened read-only",
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Location {
    pub(crate) bucket: String,
    pub(crate) key: String,
}

/// One stored object, shared by its bucket and every open handle.
///
/// Lock order: bucket lock, then `state`, then `location`. Bucket locks are
/// never held across an `.await`.
pub(crate) struct ObjectEntry {
    id: u64,
    location: Mutex<Location>,
    len: AtomicU64,
    pub(crate) state: RwLock<ObjectState>,
}

impl ObjectEntry {
    pub(crate) fn new(id: u64, bucket: &str, key: &str) -> Self {
        Self::with_state(id, bucket, key, ObjectState::new())
    }

    pub(crate) fn with_state(id: u64, bucket: &str, key: &str, state: ObjectState) -> Self {
        Self {
            id,
            location: Mutex::new(Location {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            len: AtomicU64::new(state.residency.len()),
            state: RwLock::new(state),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Current bucket and key; changes on rename
    pub(crate) fn location(&self) -> Location {
        self.location.lock().clone()
    }

    pub(crate) fn set_location(&self, bucket: &str, key: &str) {
        let mut location = self.location.lock();
        location.bucket = bucket.to_string();
        location.key = key.to_string();
    }

    /// Size readable without the state lock, for listings
    pub(crate) fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    /// Must be called with the state write lock held
    pub(crate) fn set_len(&self, len: u64) {
        self.len.store(len, Ordering::Release);
    }

    pub(crate) fn not_found(&self) -> StorageError {
        let location = self.location();
        StorageError::object_not_found(&location.bucket, &location.key)
    }
}
