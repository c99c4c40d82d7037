//! Per-operation latch context for tree operations.
//!
//! Latch crabbing acquires and releases latches dynamically while walking
//! the tree, so scoped guards cannot express the release set. Instead each
//! operation carries a `Transaction` holding the currently latched pages
//! (in root-to-leaf acquisition order) and the pages scheduled for
//! deletion; `release_and_unpin` is the single teardown site.

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use silt_buffer::BufferPool;
use silt_common::page::{PageBuf, PageId};
use silt_common::Result;
use tracing::debug;

/// The mode a tree operation runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    Read,
    Insert,
    Delete,
}

/// A held page latch: the frame's data guard, read or write.
pub enum PageLatch<'a> {
    Read(RwLockReadGuard<'a, Box<PageBuf>>),
    Write(RwLockWriteGuard<'a, Box<PageBuf>>),
}

impl PageLatch<'_> {
    /// The latched page's bytes.
    pub fn bytes(&self) -> &PageBuf {
        match self {
            PageLatch::Read(guard) => guard,
            PageLatch::Write(guard) => guard,
        }
    }

    /// Mutable access to the page bytes; None under a read latch.
    pub fn bytes_mut(&mut self) -> Option<&mut PageBuf> {
        match self {
            PageLatch::Read(_) => None,
            PageLatch::Write(guard) => Some(guard),
        }
    }
}

/// Per-operation accumulator of held latches and scheduled deletions.
pub struct Transaction<'a> {
    op: OpMode,
    /// Latched pages in acquisition order (root first).
    latched: Vec<(PageId, PageLatch<'a>)>,
    /// Pages scheduled for deletion once all latches are dropped.
    deleted: Vec<PageId>,
}

impl<'a> Transaction<'a> {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self {
            op: OpMode::Read,
            latched: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Resets the context for a new operation.
    ///
    /// The latch set must already be empty; a non-empty set here means a
    /// previous operation failed to release.
    pub fn begin(&mut self, op: OpMode) {
        debug_assert!(self.latched.is_empty());
        debug_assert!(self.deleted.is_empty());
        self.op = op;
    }

    /// The current operation mode.
    pub fn op(&self) -> OpMode {
        self.op
    }

    /// Adds a latched page to the set.
    pub fn push(&mut self, page_id: PageId, latch: PageLatch<'a>) {
        self.latched.push((page_id, latch));
    }

    /// Read access to a latched page's bytes.
    pub fn page(&self, page_id: PageId) -> Option<&PageBuf> {
        self.latched
            .iter()
            .find(|(pid, _)| *pid == page_id)
            .map(|(_, latch)| latch.bytes())
    }

    /// Write access to a latched page's bytes; None if the page is absent
    /// or only read-latched.
    pub fn page_mut(&mut self, page_id: PageId) -> Option<&mut PageBuf> {
        self.latched
            .iter_mut()
            .find(|(pid, _)| *pid == page_id)
            .and_then(|(_, latch)| latch.bytes_mut())
    }

    /// Schedules a page for deletion after release.
    pub fn schedule_delete(&mut self, page_id: PageId) {
        debug!(%page_id, "scheduling page deletion");
        self.deleted.push(page_id);
    }

    /// Releases every held latch and pin, then dispatches the scheduled
    /// deletions.
    ///
    /// Pages are unlatched and unpinned in acquisition order; write
    /// operations unpin dirty. This is the only place latches leave the
    /// set, so every exit path funnels through it.
    pub fn release_and_unpin(&mut self, pool: &BufferPool) -> Result<()> {
        let dirty = self.op != OpMode::Read;
        for (page_id, latch) in self.latched.drain(..) {
            drop(latch);
            pool.unpin_page(page_id, dirty);
        }
        for page_id in self.deleted.drain(..) {
            pool.delete_page(page_id)?;
        }
        Ok(())
    }
}

impl Default for Transaction<'_> {
    fn default() -> Self {
        Self::new()
    }
}
