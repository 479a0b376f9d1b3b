//! Fixed-size chunking of object data
//!
//! Splits an object into blocks of the node's cache block size and maps
//! byte ranges back onto the blocks that cover them.

use crate::{Block, BlockStoreError, Result, DEFAULT_CHUNK_SIZE, MAX_BLOCK_SIZE};
use bytes::Bytes;
use std::ops::Range;

/// Configuration for the chunker
#[derive(Clone, Debug)]
pub struct ChunkerConfig {
    /// Size of each chunk in bytes
    pub chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkerConfig {
    /// Create with a custom chunk size
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_size > MAX_BLOCK_SIZE {
            return Err(BlockStoreError::Configuration(format!(
                "chunk size must be between 1 and {} bytes",
                MAX_BLOCK_SIZE
            )));
        }
        Ok(Self { chunk_size })
    }
}

/// Result of chunking an object
#[derive(Clone, Debug)]
pub struct ChunkResult {
    /// The chunks produced
    pub chunks: Vec<Block>,
    /// Total size of the original data
    pub total_size: u64,
}

impl ChunkResult {
    /// Number of chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Chunker for splitting data into blocks
#[derive(Clone, Debug, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom configuration
    pub fn with_config(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk data from a byte slice
    pub fn chunk_bytes(&self, data: &[u8]) -> ChunkResult {
        let chunks = data
            .chunks(self.config.chunk_size)
            .map(|chunk| Block::from_data(Bytes::copy_from_slice(chunk)))
            .collect();

        ChunkResult {
            chunks,
            total_size: data.len() as u64,
        }
    }

    /// Indices of the chunks that cover `position..position + length`,
    /// clamped to an object of `total_size` bytes.
    pub fn covering_chunks(&self, total_size: u64, position: u64, length: u64) -> Range<usize> {
        let end = position.saturating_add(length).min(total_size);
        if position >= end {
            return 0..0;
        }
        let chunk_size = self.config.chunk_size as u64;
        let first = position / chunk_size;
        let last = (end - 1) / chunk_size;
        first as usize..last as usize + 1
    }

    /// Get the chunk size
    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }
}
