//! Buffer pool manager.

use crate::disk::{DiskManager, DiskManagerConfig};
use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use parking_lot::Mutex;
use silt_common::page::{PageId, PAGE_SIZE};
use silt_common::{Result, SiltError, StorageConfig};
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;
use tracing::{debug, warn};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for unloaded frames
/// - Strict LRU replacement among unpinned frames
/// - Pin counting and dirty-page write-back through the disk manager
///
/// One mutex guards the page table and free list; replacer membership is
/// kept in lockstep with pin counts under that mutex, so a frame is
/// evictable exactly when it is resident with pin count zero.
pub struct BufferPool {
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page table and free list.
    inner: Mutex<PoolInner>,
    /// Page replacement policy.
    replacer: LruReplacer,
    /// Disk backend for page I/O.
    disk: Arc<DiskManager>,
}

struct PoolInner {
    /// Page ID to frame ID mapping.
    page_table: HashMap<PageId, FrameId>,
    /// Frames not holding any page.
    free_list: Vec<FrameId>,
}

impl BufferPool {
    /// Creates a new buffer pool over the given disk manager.
    pub fn new(config: BufferPoolConfig, disk: Arc<DiskManager>) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list.
        let free_list: Vec<_> = (0..num_frames).rev().map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(num_frames),
                free_list,
            }),
            replacer: LruReplacer::new(num_frames),
            disk,
        }
    }

    /// Opens the data file named by a [`StorageConfig`] and builds a pool
    /// over it.
    pub fn from_storage_config(config: &StorageConfig) -> Result<Self> {
        let disk = Arc::new(DiskManager::new(DiskManagerConfig {
            data_file: config.data_file.clone(),
            fsync_enabled: config.fsync_enabled,
        })?);
        Ok(Self::new(
            BufferPoolConfig {
                num_frames: config.buffer_pool_frames,
            },
            disk,
        ))
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so caching stays useful on low-memory systems.
    pub fn auto_sized(disk: Arc<DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames }, disk)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Returns the number of evictable frames.
    pub fn evictable_count(&self) -> usize {
        self.replacer.size()
    }

    /// Checks if a page is resident in the pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Returns the disk manager backing this pool.
    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Fetches a page, reading it from disk if it is not resident.
    ///
    /// The page is pinned before being returned; the caller must balance
    /// the pin with `unpin_page`. Fails with `BufferPoolFull` when every
    /// frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if !page_id.is_valid() {
            return Err(SiltError::PageNotFound(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.pin_count() == 0 {
                self.replacer.pin(frame_id);
            }
            frame.pin();
            return Ok(frame);
        }

        let frame = self.init_new_frame(&mut inner, page_id)?;
        match self.disk.read_page(page_id) {
            Ok(buf) => {
                frame.copy_from(&buf);
                Ok(frame)
            }
            Err(e) => {
                // Roll the frame back to the free list.
                inner.page_table.remove(&page_id);
                frame.reset();
                inner.free_list.push(frame.frame_id());
                Err(e)
            }
        }
    }

    /// Allocates a fresh page on disk and pins it in a frame.
    ///
    /// Returns the new page ID and its zeroed frame. The allocation is
    /// persisted (the disk manager zero-fills the new extent), so a crash
    /// after this call cannot leak a half-allocated page.
    pub fn new_page(&self) -> Result<(PageId, &BufferFrame)> {
        let mut inner = self.inner.lock();

        // Check for exhaustion before allocating a page ID.
        if inner.free_list.is_empty() && self.replacer.size() == 0 {
            return Err(SiltError::BufferPoolFull);
        }

        let page_id = self.disk.allocate_page()?;
        let frame = self.init_new_frame(&mut inner, page_id)?;
        Ok((page_id, frame))
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// Returns false if the page is not resident or was not pinned; both
    /// indicate a caller bug. A page whose pin count reaches zero becomes
    /// evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }

        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a resident page back to disk if it is dirty.
    ///
    /// Returns true if the page is resident (whether or not a write was
    /// needed), false for an unknown or invalid page ID.
    ///
    /// The page latch is taken after the pool mutex is released: a writer
    /// holding the latch may itself be waiting on the pool mutex, so
    /// holding both here would deadlock.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Ok(false);
        }

        let frame_id = {
            let inner = self.inner.lock();
            match inner.page_table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => return Ok(false),
            }
        };
        self.flush_frame(page_id, frame_id)?;
        Ok(true)
    }

    /// Writes every resident dirty page back to disk.
    pub fn flush_all(&self) -> Result<()> {
        let resident: Vec<(PageId, FrameId)> = {
            let inner = self.inner.lock();
            inner
                .page_table
                .iter()
                .map(|(&page_id, &frame_id)| (page_id, frame_id))
                .collect()
        };
        for (page_id, frame_id) in resident {
            self.flush_frame(page_id, frame_id)?;
        }
        Ok(())
    }

    /// Latches a frame and writes it out if it still holds the expected
    /// dirty page. The frame may have been evicted or remapped since the
    /// caller snapshotted the page table; such frames are skipped.
    fn flush_frame(&self, page_id: PageId, frame_id: FrameId) -> Result<()> {
        let frame = &self.frames[frame_id.0 as usize];
        if frame.is_dirty() {
            let data = frame.read_data();
            if frame.page_id() == Some(page_id) && frame.is_dirty() {
                self.disk.write_page(page_id, &data)?;
                frame.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Removes a page from the pool and releases its ID.
    ///
    /// Returns true if the page is gone (including when it was not resident
    /// to begin with), false if it is pinned and cannot be deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.pin_count() > 0 {
            warn!(%page_id, pin_count = frame.pin_count(), "refusing to delete pinned page");
            return Ok(false);
        }

        // Must leave the replacer before the frame is reset.
        self.replacer.pin(frame_id);
        inner.page_table.remove(&page_id);

        if frame.is_dirty() {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
        }

        frame.reset();
        inner.free_list.push(frame_id);
        self.disk.deallocate_page(page_id);
        Ok(true)
    }

    /// Acquires a frame for `page_id`: free list first, then LRU victim.
    ///
    /// An evicted resident page is flushed if dirty and dropped from the
    /// page table. The returned frame is reset, pinned once, and installed
    /// in the page table under `page_id`.
    fn init_new_frame<'a>(
        &'a self,
        inner: &mut PoolInner,
        page_id: PageId,
    ) -> Result<&'a BufferFrame> {
        let frame_id = match inner.free_list.pop() {
            Some(frame_id) => frame_id,
            None => {
                let victim_id = self.replacer.victim().ok_or(SiltError::BufferPoolFull)?;
                let victim = &self.frames[victim_id.0 as usize];
                if let Some(old_page_id) = victim.page_id() {
                    inner.page_table.remove(&old_page_id);
                    if victim.is_dirty() {
                        debug!(%old_page_id, %victim_id, "flushing dirty page on eviction");
                        let data = victim.read_data();
                        self.disk.write_page(old_page_id, &data)?;
                    }
                }
                victim_id
            }
        };

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        Ok(frame)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();

        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: inner.free_list.len(),
            used_frames: inner.page_table.len(),
            pinned_frames,
            dirty_frames,
            evictable_frames: self.replacer.size(),
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
    /// Number of frames in the replacer.
    pub evictable_frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use tempfile::tempdir;

    fn create_test_pool(num_frames: usize) -> (BufferPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_file: dir.path().join("pool.db"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        (BufferPool::new(BufferPoolConfig { num_frames }, disk), dir)
    }

    #[test]
    fn test_buffer_pool_new() {
        let (pool, _dir) = create_test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.evictable_count(), 0);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, frame) = pool.new_page().unwrap();

        assert_eq!(page_id, PageId(0));
        assert_eq!(frame.page_id(), Some(page_id));
        assert_eq!(frame.pin_count(), 1);
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_fetch_resident() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), Some(page_id));
        assert_eq!(frame.pin_count(), 1);
        // Re-pinned, so no longer evictable.
        assert_eq!(pool.evictable_count(), 0);
    }

    #[test]
    fn test_buffer_pool_fetch_from_disk() {
        let (pool, _dir) = create_test_pool(2);

        let (page_id, frame) = pool.new_page().unwrap();
        {
            let mut data = frame.write_data();
            data[0] = 0x42;
        }
        pool.unpin_page(page_id, true);

        // Evict it by filling the pool with other pages.
        for _ in 0..2 {
            let (pid, _) = pool.new_page().unwrap();
            pool.unpin_page(pid, false);
        }
        assert!(!pool.contains(page_id));

        // Fetch reads the flushed bytes back from disk.
        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.read_data()[0], 0x42);
    }

    #[test]
    fn test_buffer_pool_fetch_nonexistent() {
        let (pool, _dir) = create_test_pool(10);

        assert!(pool.fetch_page(PageId(123)).is_err());
        // The failed fetch must not leak the frame.
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_buffer_pool_unpin() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, frame) = pool.new_page().unwrap();
        assert!(frame.is_pinned());

        assert!(pool.unpin_page(page_id, false));
        assert!(!frame.is_pinned());
        assert_eq!(pool.evictable_count(), 1);
    }

    #[test]
    fn test_buffer_pool_unpin_unknown_or_unpinned() {
        let (pool, _dir) = create_test_pool(10);

        assert!(!pool.unpin_page(PageId(5), false));

        let (page_id, _) = pool.new_page().unwrap();
        assert!(pool.unpin_page(page_id, false));
        // Second unpin is a caller bug and must fail.
        assert!(!pool.unpin_page(page_id, false));
    }

    #[test]
    fn test_buffer_pool_dirty_tracking() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, true);

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_lru_eviction_order() {
        let (pool, _dir) = create_test_pool(3);

        let mut page_ids = vec![];
        for _ in 0..3 {
            let (pid, _) = pool.new_page().unwrap();
            page_ids.push(pid);
        }
        // Unpin in order 1, 0, 2: page 1 becomes the LRU victim.
        pool.unpin_page(page_ids[1], false);
        pool.unpin_page(page_ids[0], false);
        pool.unpin_page(page_ids[2], false);

        let (_, _) = pool.new_page().unwrap();
        assert!(!pool.contains(page_ids[1]));
        assert!(pool.contains(page_ids[0]));
        assert!(pool.contains(page_ids[2]));
    }

    #[test]
    fn test_buffer_pool_eviction_flushes_dirty() {
        let (pool, _dir) = create_test_pool(1);

        let (page_id, frame) = pool.new_page().unwrap();
        {
            let mut data = frame.write_data();
            data[0] = 0xAB;
        }
        pool.unpin_page(page_id, true);

        // Evict the dirty page.
        let (_, _) = pool.new_page().unwrap();
        assert!(!pool.contains(page_id));

        // Its bytes must have reached disk.
        let data = pool.disk().read_page(page_id).unwrap();
        assert_eq!(data[0], 0xAB);
    }

    #[test]
    fn test_buffer_pool_full_all_pinned() {
        let (pool, _dir) = create_test_pool(2);

        pool.new_page().unwrap();
        pool.new_page().unwrap();

        let result = pool.new_page();
        assert!(matches!(result, Err(SiltError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        assert!(pool.contains(page_id));
        assert!(pool.delete_page(page_id).unwrap());
        assert!(!pool.contains(page_id));
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.evictable_count(), 0);
    }

    #[test]
    fn test_buffer_pool_delete_pinned_page() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, _) = pool.new_page().unwrap();

        assert!(!pool.delete_page(page_id).unwrap());
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_delete_unknown_page() {
        let (pool, _dir) = create_test_pool(10);
        assert!(pool.delete_page(PageId(77)).unwrap());
    }

    #[test]
    fn test_buffer_pool_flush_page() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, frame) = pool.new_page().unwrap();
        {
            let mut data = frame.write_data();
            data[7] = 0x99;
        }
        pool.unpin_page(page_id, true);

        assert!(pool.flush_page(page_id).unwrap());
        assert!(!frame.is_dirty());
        assert_eq!(pool.disk().read_page(page_id).unwrap()[7], 0x99);

        assert!(!pool.flush_page(PageId(55)).unwrap());
        assert!(!pool.flush_page(PageId::INVALID).unwrap());
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let (pool, _dir) = create_test_pool(10);

        for _ in 0..5 {
            let (pid, _) = pool.new_page().unwrap();
            pool.unpin_page(pid, true);
        }

        pool.flush_all().unwrap();
        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_buffer_pool_stats() {
        let (pool, _dir) = create_test_pool(10);

        let mut pids = vec![];
        for _ in 0..5 {
            let (pid, _) = pool.new_page().unwrap();
            pids.push(pid);
        }
        // Unpin three of them dirty.
        for &pid in &pids[..3] {
            pool.unpin_page(pid, true);
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.used_frames, 5);
        assert_eq!(stats.pinned_frames, 2);
        assert_eq!(stats.dirty_frames, 3);
        assert_eq!(stats.evictable_frames, 3);
    }

    #[test]
    fn test_buffer_pool_from_storage_config() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_file: dir.path().join("configured.db"),
            buffer_pool_frames: 8,
            fsync_enabled: false,
        };

        let pool = BufferPool::from_storage_config(&config).unwrap();
        assert_eq!(pool.num_frames(), 8);
        assert_eq!(pool.disk().data_file(), config.data_file.as_path());

        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, true);
        pool.flush_all().unwrap();
        assert!(config.data_file.exists());
    }

    #[test]
    fn test_buffer_pool_multiple_pins() {
        let (pool, _dir) = create_test_pool(10);

        let (page_id, frame) = pool.new_page().unwrap();
        pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.pin_count(), 2);

        pool.unpin_page(page_id, false);
        assert_eq!(pool.evictable_count(), 0);
        pool.unpin_page(page_id, false);
        assert_eq!(pool.evictable_count(), 1);
    }
}
