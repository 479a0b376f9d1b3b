//! # Elastore Blockstore
//!
//! Content-addressed block storage for the elastore object service.
//!
//! This crate provides:
//! - **Block operations**: Put, get, and delete immutable blocks
//! - **Chunking**: Split sealed objects into fixed-size blocks
//! - **CID generation**: Content identifiers for every stored block
//!
//! Objects that are relocated off a node's local storage are chunked by the
//! node's cache block size and written here, one block per chunk.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        elastore-core storage core       │
//! ├─────────────────────────────────────────┤
//! │           BlockStore Trait              │
//! ├─────────────────────┬───────────────────┤
//! │    MemoryStore      │  remote adapters  │
//! └─────────────────────┴───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use elastore_blockstore::{BlockStore, MemoryBlockStore};
//!
//! let store = MemoryBlockStore::new();
//! let cid = store.put_block(b"hello").await?;
//! let retrieved = store.get_block(&cid).await?;
//! ```

pub mod block;
pub mod chunker;
pub mod cid_utils;
pub mod error;
pub mod memory;

pub use block::Block;
pub use chunker::{ChunkResult, Chunker, ChunkerConfig};
pub use cid_utils::{block_cid, verify_block, RAW_CODEC};
pub use error::{BlockStoreError, Result};
pub use memory::MemoryBlockStore;

pub use cid::Cid;

use async_trait::async_trait;
use bytes::Bytes;

/// Default chunk size (32 MiB), the default cache block size of a node
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Maximum block size (256 MiB)
pub const MAX_BLOCK_SIZE: usize = 256 * 1024 * 1024;

/// Trait for block storage backends
///
/// Object safe, so a node can hold `Arc<dyn BlockStore>` per bucket.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Store a block and return its CID
    async fn put_block(&self, data: &[u8]) -> Result<Cid>;

    /// Retrieve a block by CID
    async fn get_block(&self, cid: &Cid) -> Result<Bytes>;

    /// Check if a block exists
    async fn has_block(&self, cid: &Cid) -> Result<bool>;

    /// Delete a block
    async fn delete_block(&self, cid: &Cid) -> Result<()>;

    /// Get block size without retrieving content
    async fn block_size(&self, cid: &Cid) -> Result<u64>;

    /// Retrieve a block and check it against its CID
    async fn get_verified_block(&self, cid: &Cid) -> Result<Bytes> {
        let data = self.get_block(cid).await?;
        verify_block(cid, &data)?;
        Ok(data)
    }
}
