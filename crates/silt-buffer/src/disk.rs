//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use silt_common::page::{PageBuf, PageId, PAGE_SIZE};
use silt_common::{Result, SiltError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Path to the data file.
    pub data_file: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("./data/silt.db"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages in a single data file.
///
/// Page IDs map directly to file offsets (`page_id * PAGE_SIZE`). Page 0 is
/// reserved for the header page; allocation is monotonic from the current
/// end of file.
pub struct DiskManager {
    config: DiskManagerConfig,
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    file: File,
    /// Number of pages currently in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Opens or creates the data file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        if let Some(parent) = config.data_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.data_file)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner { file, num_pages }),
        })
    }

    /// Returns the data file path.
    pub fn data_file(&self) -> &Path {
        &self.config.data_file
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        let mut inner = self.inner.lock();

        if !page_id.is_valid() || page_id.0 >= inner.num_pages {
            return Err(SiltError::PageNotFound(page_id));
        }

        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;

        let mut buffer = [0u8; PAGE_SIZE];
        inner.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &PageBuf) -> Result<()> {
        if !page_id.is_valid() {
            return Err(SiltError::PageNotFound(page_id));
        }

        let mut inner = self.inner.lock();

        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(data)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        if page_id.0 >= inner.num_pages {
            inner.num_pages = page_id.0 + 1;
        }

        Ok(())
    }

    /// Allocates a new page at the end of the file.
    ///
    /// The page is zero-filled on disk so the allocation itself persists,
    /// and its ID is returned. Allocation is monotonic; deallocated IDs are
    /// not reused.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        let page_id = PageId(inner.num_pages);
        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        inner.num_pages = page_id.0 + 1;
        Ok(page_id)
    }

    /// Releases a page ID.
    ///
    /// The file extent is left in place and the ID is not reused; callers
    /// only need the call for symmetry with `allocate_page`.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}
