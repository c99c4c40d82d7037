//! Configuration structures for SiltDB storage.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the page file and buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data file.
    pub data_file: PathBuf,
    /// Buffer pool size in number of frames.
    pub buffer_pool_frames: usize,
    /// Enable fsync after page writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("./data/silt.db"),
            buffer_pool_frames: 8192, // 32 MB with 4 KB pages
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_frames * PAGE_SIZE
    }
}

/// Fan-out configuration for a B+ tree index.
///
/// `leaf_max_size` is the entry count at which a leaf splits (checked after
/// insertion); `internal_max_size` is the slot count an internal page may
/// hold at rest (it overflows by one entry before splitting).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Maximum number of entries in a leaf page.
    pub leaf_max_size: u32,
    /// Maximum number of slots in an internal page.
    pub internal_max_size: u32,
}

impl IndexConfig {
    /// Derives the largest fan-outs that fit a page for the given key width.
    ///
    /// `key_size` is the fixed key width in bytes; leaf entries carry an
    /// 8-byte record ID, internal slots a 4-byte child page ID, and both
    /// page kinds reserve a 24-byte header. The internal fan-out leaves
    /// room for the one-slot overflow that precedes a split.
    pub fn max_for_key_size(key_size: usize) -> Self {
        const HEADER: usize = 24;
        let leaf_max = (PAGE_SIZE - HEADER) / (key_size + 8);
        let internal_max = (PAGE_SIZE - HEADER) / (key_size + 4) - 1;
        Self {
            leaf_max_size: leaf_max as u32,
            internal_max_size: internal_max as u32,
        }
    }
}
