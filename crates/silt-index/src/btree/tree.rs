//! B+ tree operations.
//!
//! Tree-level algorithms over the page layouts in [`super::page`]: search,
//! insert with split, delete with coalesce-or-redistribute, and root
//! adjustment, all under the latch-crabbing protocol.
//!
//! Every public operation latches the header page (page 0) first as the
//! root-pointer guard, then crabs down the tree: read operations latch a
//! child and immediately release all ancestors, write operations release
//! ancestors only once the child is safe (cannot split or underflow). The
//! transaction context collects the held latches and is torn down in one
//! sweep, after which scheduled page deletions run against the buffer pool.

use crate::btree::page::{internal, leaf, tree_page, IndexPageType};
use crate::btree::transaction::{OpMode, PageLatch, Transaction};
use crate::header as header_page;
use crate::key::{IndexKey, KeyComparator};
use silt_buffer::{BufferFrame, BufferPool};
use silt_common::page::{PageBuf, PageId};
use silt_common::{IndexConfig, RecordId, Result, SiltError};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A concurrent, disk-backed B+ tree index over fixed-width keys.
///
/// Keys are ordered solely through the supplied comparator. Only unique
/// keys are supported; inserting a duplicate returns false.
pub struct BPlusTree<const N: usize> {
    /// Index name, keyed into the header page's record table.
    name: String,
    pool: Arc<BufferPool>,
    comparator: KeyComparator<N>,
    leaf_max_size: u32,
    internal_max_size: u32,
    /// Root page id; changes are serialized by the header-page latch.
    root_page_id: AtomicU32,
}

impl<const N: usize> BPlusTree<N> {
    /// Opens (or prepares to create) the named index.
    ///
    /// Ensures the header page exists and re-reads this index's root from
    /// it, so a handle can be rebuilt over an existing file. The tree
    /// itself is created lazily by the first insert.
    pub fn new(
        name: impl Into<String>,
        pool: Arc<BufferPool>,
        comparator: KeyComparator<N>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let name = name.into();
        assert!(
            (2..=leaf::capacity::<N>()).contains(&leaf_max_size),
            "leaf_max_size out of range for key width {N}"
        );
        assert!(
            (2..=internal::capacity::<N>()).contains(&internal_max_size),
            "internal_max_size out of range for key width {N}"
        );

        if pool.disk().num_pages() == 0 {
            let (page_id, _) = pool.new_page()?;
            debug_assert_eq!(page_id, PageId::HEADER);
            pool.unpin_page(page_id, true);
        }

        let frame = pool.fetch_page(PageId::HEADER)?;
        let root = {
            let guard = frame.read_data();
            header_page::get_root_id(&guard, &name)?.unwrap_or(PageId::INVALID)
        };
        pool.unpin_page(PageId::HEADER, false);

        Ok(Self {
            name,
            pool,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: AtomicU32::new(root.0),
        })
    }

    /// Opens the named index with fan-outs from an [`IndexConfig`].
    pub fn from_config(
        name: impl Into<String>,
        pool: Arc<BufferPool>,
        comparator: KeyComparator<N>,
        config: IndexConfig,
    ) -> Result<Self> {
        Self::new(
            name,
            pool,
            comparator,
            config.leaf_max_size,
            config.internal_max_size,
        )
    }

    /// The index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The buffer pool this tree runs on.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Current root page id, `INVALID` when the tree is empty.
    pub fn root_page_id(&self) -> PageId {
        PageId(self.root_page_id.load(Ordering::Acquire))
    }

    fn set_root_page_id(&self, page_id: PageId) {
        self.root_page_id.store(page_id.0, Ordering::Release);
    }

    /// True if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Point lookup.
    pub fn get_value<'a>(
        &'a self,
        key: &IndexKey<N>,
        txn: &mut Transaction<'a>,
    ) -> Result<Option<RecordId>> {
        txn.begin(OpMode::Read);

        let frame = self.pool.fetch_page(PageId::HEADER)?;
        let guard = frame.read_data();
        if self.is_empty() {
            drop(guard);
            self.pool.unpin_page(PageId::HEADER, false);
            return Ok(None);
        }
        txn.push(PageId::HEADER, PageLatch::Read(guard));

        let result: Result<Option<RecordId>> = (|| {
            let leaf_pid = self.find_leaf_with_latch(Some(key), txn)?;
            let value = leaf::lookup::<N>(self.tx_page(txn, leaf_pid)?, key, self.comparator);
            txn.release_and_unpin(&self.pool)?;
            Ok(value)
        })();
        if result.is_err() {
            let _ = txn.release_and_unpin(&self.pool);
        }
        result
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Unique-key insert. Returns false if the key already exists.
    pub fn insert<'a>(
        &'a self,
        key: &IndexKey<N>,
        value: RecordId,
        txn: &mut Transaction<'a>,
    ) -> Result<bool> {
        txn.begin(OpMode::Insert);

        let frame = self.pool.fetch_page(PageId::HEADER)?;
        let mut guard = frame.write_data();
        if self.is_empty() {
            let created = self.start_new_tree(key, value, &mut guard);
            drop(guard);
            self.pool.unpin_page(PageId::HEADER, true);
            return created.map(|()| true);
        }
        txn.push(PageId::HEADER, PageLatch::Write(guard));

        let result = self.insert_into_leaf(key, value, txn);
        if result.is_err() {
            let _ = txn.release_and_unpin(&self.pool);
        }
        result
    }

    /// Creates the tree's first leaf and records it as root.
    fn start_new_tree(
        &self,
        key: &IndexKey<N>,
        value: RecordId,
        header: &mut PageBuf,
    ) -> Result<()> {
        let (page_id, frame) = self.pool.new_page()?;
        {
            let mut guard = frame.write_data();
            let data: &mut PageBuf = &mut guard;
            tree_page::init(
                data,
                IndexPageType::Leaf,
                page_id,
                PageId::INVALID,
                self.leaf_max_size,
            );
            leaf::insert::<N>(data, key, value, self.comparator);
        }
        self.pool.unpin_page(page_id, true);

        self.set_root_page_id(page_id);
        header_page::set_record(header, &self.name, page_id)?;
        debug!(index = %self.name, root = %page_id, "started new tree");
        Ok(())
    }

    fn insert_into_leaf<'a>(
        &'a self,
        key: &IndexKey<N>,
        value: RecordId,
        txn: &mut Transaction<'a>,
    ) -> Result<bool> {
        let leaf_pid = self.find_leaf_with_latch(Some(key), txn)?;

        if leaf::lookup::<N>(self.tx_page(txn, leaf_pid)?, key, self.comparator).is_some() {
            txn.release_and_unpin(&self.pool)?;
            return Ok(false);
        }

        let new_size =
            leaf::insert::<N>(self.tx_page_mut(txn, leaf_pid)?, key, value, self.comparator);
        if new_size == self.leaf_max_size {
            self.split_leaf(leaf_pid, txn)?;
        }

        txn.release_and_unpin(&self.pool)?;
        Ok(true)
    }

    /// Splits a full leaf, linking the new right sibling into the leaf
    /// chain and promoting its first key.
    fn split_leaf<'a>(&'a self, leaf_pid: PageId, txn: &mut Transaction<'a>) -> Result<()> {
        let (new_pid, frame) = self.pool.new_page()?;
        let mut guard = frame.write_data();
        let new_leaf: &mut PageBuf = &mut guard;

        let parent = tree_page::parent_page_id(self.tx_page(txn, leaf_pid)?);
        tree_page::init(
            new_leaf,
            IndexPageType::Leaf,
            new_pid,
            parent,
            self.leaf_max_size,
        );

        {
            let data = self.tx_page_mut(txn, leaf_pid)?;
            leaf::move_half_to::<N>(data, new_leaf);
            leaf::set_next_page_id(new_leaf, leaf::next_page_id(data));
            leaf::set_next_page_id(data, new_pid);
        }

        let separator = leaf::key_at::<N>(new_leaf, 0);
        debug!(left = %leaf_pid, right = %new_pid, "split leaf page");
        self.insert_into_parent(leaf_pid, separator, new_pid, new_leaf, txn)?;

        drop(guard);
        self.pool.unpin_page(new_pid, true);
        Ok(())
    }

    /// Hooks a freshly split-off `new_pid` into `old_pid`'s parent,
    /// growing a new root or splitting the parent as needed.
    ///
    /// `new_data` is the new page's bytes, which this operation already
    /// holds exclusively; parent-pointer updates for it must go through
    /// this reference rather than a second latch acquisition.
    fn insert_into_parent<'a>(
        &'a self,
        old_pid: PageId,
        key: IndexKey<N>,
        new_pid: PageId,
        new_data: &mut PageBuf,
        txn: &mut Transaction<'a>,
    ) -> Result<()> {
        let parent_pid = tree_page::parent_page_id(self.tx_page(txn, old_pid)?);

        if !parent_pid.is_valid() {
            // The old node was the root: grow the tree by one level.
            let (root_pid, frame) = self.pool.new_page()?;
            {
                let mut guard = frame.write_data();
                let root: &mut PageBuf = &mut guard;
                tree_page::init(
                    root,
                    IndexPageType::Internal,
                    root_pid,
                    PageId::INVALID,
                    self.internal_max_size,
                );
                internal::populate_new_root::<N>(root, old_pid, &key, new_pid);
            }
            self.pool.unpin_page(root_pid, true);

            tree_page::set_parent_page_id(self.tx_page_mut(txn, old_pid)?, root_pid);
            tree_page::set_parent_page_id(new_data, root_pid);

            self.set_root_page_id(root_pid);
            self.update_root_record(txn)?;
            debug!(index = %self.name, root = %root_pid, "grew tree with new root");
            return Ok(());
        }

        let new_size = internal::insert_node_after::<N>(
            self.tx_page_mut(txn, parent_pid)?,
            old_pid,
            &key,
            new_pid,
        );
        if new_size > self.internal_max_size {
            // The parent overflowed by one slot: split it too.
            let (right_pid, frame) = self.pool.new_page()?;
            let mut guard = frame.write_data();
            let right: &mut PageBuf = &mut guard;

            let grandparent = tree_page::parent_page_id(self.tx_page(txn, parent_pid)?);
            tree_page::init(
                right,
                IndexPageType::Internal,
                right_pid,
                grandparent,
                self.internal_max_size,
            );

            let moved = internal::move_half_to::<N>(self.tx_page_mut(txn, parent_pid)?, right);
            for child in moved {
                if child == new_pid {
                    tree_page::set_parent_page_id(new_data, right_pid);
                } else {
                    self.reparent(child, right_pid, txn)?;
                }
            }

            let promoted = internal::key_at::<N>(right, 0);
            debug!(left = %parent_pid, right = %right_pid, "split internal page");
            self.insert_into_parent(parent_pid, promoted, right_pid, right, txn)?;

            drop(guard);
            self.pool.unpin_page(right_pid, true);
        }
        Ok(())
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Removes `key` if present. Absent keys are a silent no-op.
    pub fn remove<'a>(&'a self, key: &IndexKey<N>, txn: &mut Transaction<'a>) -> Result<()> {
        txn.begin(OpMode::Delete);

        let frame = self.pool.fetch_page(PageId::HEADER)?;
        let guard = frame.write_data();
        if self.is_empty() {
            drop(guard);
            self.pool.unpin_page(PageId::HEADER, true);
            return Ok(());
        }
        txn.push(PageId::HEADER, PageLatch::Write(guard));

        let result = self.remove_from_leaf(key, txn);
        if result.is_err() {
            let _ = txn.release_and_unpin(&self.pool);
        }
        result
    }

    fn remove_from_leaf<'a>(&'a self, key: &IndexKey<N>, txn: &mut Transaction<'a>) -> Result<()> {
        let leaf_pid = self.find_leaf_with_latch(Some(key), txn)?;

        let (old_size, new_size) = {
            let data = self.tx_page_mut(txn, leaf_pid)?;
            let old = tree_page::size(data);
            let new = leaf::remove_and_delete::<N>(data, key, self.comparator);
            (old, new)
        };
        if old_size == new_size {
            return txn.release_and_unpin(&self.pool);
        }

        if new_size < tree_page::min_size(self.tx_page(txn, leaf_pid)?) {
            self.coalesce_or_redistribute(leaf_pid, txn)?;
        }
        txn.release_and_unpin(&self.pool)
    }

    /// Cures an underflowed node by merging it with a sibling when the
    /// pair fits in one page, or stealing one entry otherwise.
    ///
    /// Returns true if `node_pid` was merged away (scheduled for deletion).
    fn coalesce_or_redistribute<'a>(
        &'a self,
        node_pid: PageId,
        txn: &mut Transaction<'a>,
    ) -> Result<bool> {
        let (is_root, parent_pid, node_size, node_max, node_is_leaf) = {
            let node = self.tx_page(txn, node_pid)?;
            (
                tree_page::is_root(node),
                tree_page::parent_page_id(node),
                tree_page::size(node),
                tree_page::max_size(node),
                tree_page::is_leaf(node),
            )
        };

        if is_root {
            let delete_root = self.adjust_root(node_pid, txn)?;
            if delete_root {
                txn.schedule_delete(node_pid);
            }
            return Ok(delete_root);
        }

        let (parent_size, index) = {
            let parent = self.tx_page(txn, parent_pid)?;
            let index = internal::value_index::<N>(parent, node_pid).ok_or_else(|| {
                SiltError::TreeCorrupted(format!(
                    "{node_pid} missing from its parent {parent_pid}"
                ))
            })?;
            (tree_page::size(parent), index)
        };

        // Try to merge with the left sibling, then the right.
        if index > 0 {
            let left_pid = internal::value_at::<N>(self.tx_page(txn, parent_pid)?, index - 1);
            let frame = self.pool.fetch_page(left_pid)?;
            let mut guard = frame.write_data();
            if node_size + tree_page::size(&guard) < node_max {
                let parent_underflow = self.coalesce_into_left(
                    left_pid, &mut guard, node_pid, parent_pid, index, txn,
                )?;
                drop(guard);
                self.pool.unpin_page(left_pid, true);
                if parent_underflow {
                    self.coalesce_or_redistribute(parent_pid, txn)?;
                }
                return Ok(true);
            }
            drop(guard);
            self.pool.unpin_page(left_pid, false);
        }
        if index + 1 < parent_size {
            let right_pid = internal::value_at::<N>(self.tx_page(txn, parent_pid)?, index + 1);
            let frame = self.pool.fetch_page(right_pid)?;
            let mut guard = frame.write_data();
            if node_size + tree_page::size(&guard) < node_max {
                let parent_underflow = self.coalesce_from_right(
                    node_pid, right_pid, &mut guard, parent_pid, index + 1, txn,
                )?;
                drop(guard);
                self.pool.unpin_page(right_pid, true);
                if parent_underflow {
                    self.coalesce_or_redistribute(parent_pid, txn)?;
                }
                return Ok(true);
            }
            drop(guard);
            self.pool.unpin_page(right_pid, false);
        }

        // Neither merge fits: steal one entry, preferring the left sibling.
        if index > 0 {
            let left_pid = internal::value_at::<N>(self.tx_page(txn, parent_pid)?, index - 1);
            let frame = self.pool.fetch_page(left_pid)?;
            let mut guard = frame.write_data();
            let sib: &mut PageBuf = &mut guard;
            if node_is_leaf {
                let separator = leaf::key_at::<N>(sib, tree_page::size(sib) - 1);
                internal::set_key_at::<N>(self.tx_page_mut(txn, parent_pid)?, index, &separator);
                leaf::move_last_to_front_of::<N>(sib, self.tx_page_mut(txn, node_pid)?);
            } else {
                // The parent's separator flows down into the receiver and
                // the sibling's boundary key flows up into the parent.
                let middle = internal::key_at::<N>(self.tx_page(txn, parent_pid)?, index);
                let boundary = internal::key_at::<N>(sib, tree_page::size(sib) - 1);
                internal::set_key_at::<N>(self.tx_page_mut(txn, parent_pid)?, index, &boundary);
                let moved = internal::move_last_to_front_of::<N>(
                    sib,
                    self.tx_page_mut(txn, node_pid)?,
                    &middle,
                );
                self.reparent(moved, node_pid, txn)?;
            }
            debug!(node = %node_pid, sibling = %left_pid, "redistributed from left sibling");
            drop(guard);
            self.pool.unpin_page(left_pid, true);
        } else {
            let right_pid = internal::value_at::<N>(self.tx_page(txn, parent_pid)?, index + 1);
            let frame = self.pool.fetch_page(right_pid)?;
            let mut guard = frame.write_data();
            let sib: &mut PageBuf = &mut guard;
            if node_is_leaf {
                let separator = leaf::key_at::<N>(sib, 1);
                internal::set_key_at::<N>(
                    self.tx_page_mut(txn, parent_pid)?,
                    index + 1,
                    &separator,
                );
                leaf::move_first_to_end_of::<N>(sib, self.tx_page_mut(txn, node_pid)?);
            } else {
                let middle = internal::key_at::<N>(self.tx_page(txn, parent_pid)?, index + 1);
                let boundary = internal::key_at::<N>(sib, 1);
                internal::set_key_at::<N>(
                    self.tx_page_mut(txn, parent_pid)?,
                    index + 1,
                    &boundary,
                );
                let moved = internal::move_first_to_end_of::<N>(
                    sib,
                    self.tx_page_mut(txn, node_pid)?,
                    &middle,
                );
                self.reparent(moved, node_pid, txn)?;
            }
            debug!(node = %node_pid, sibling = %right_pid, "redistributed from right sibling");
            drop(guard);
            self.pool.unpin_page(right_pid, true);
        }
        Ok(false)
    }

    /// Merges `node_pid` into its left sibling and drops the separator.
    ///
    /// Returns true if the parent underflowed; the caller recurses after
    /// releasing the sibling latch.
    fn coalesce_into_left<'a>(
        &'a self,
        left_pid: PageId,
        left: &mut PageBuf,
        node_pid: PageId,
        parent_pid: PageId,
        index: u32,
        txn: &mut Transaction<'a>,
    ) -> Result<bool> {
        if tree_page::is_leaf(left) {
            let node = self.tx_page_mut(txn, node_pid)?;
            let next = leaf::next_page_id(node);
            leaf::move_all_to::<N>(node, left);
            leaf::set_next_page_id(left, next);
        } else {
            let middle = internal::key_at::<N>(self.tx_page(txn, parent_pid)?, index);
            let moved =
                internal::move_all_to::<N>(self.tx_page_mut(txn, node_pid)?, left, &middle);
            for child in moved {
                self.reparent(child, left_pid, txn)?;
            }
        }
        debug!(survivor = %left_pid, merged = %node_pid, "coalesced into left sibling");
        txn.schedule_delete(node_pid);

        let parent = self.tx_page_mut(txn, parent_pid)?;
        internal::remove::<N>(parent, index);
        Ok(tree_page::size(parent) < tree_page::min_size(parent))
    }

    /// Merges the right sibling into `node_pid` and drops the separator.
    ///
    /// Returns true if the parent underflowed.
    fn coalesce_from_right<'a>(
        &'a self,
        node_pid: PageId,
        right_pid: PageId,
        right: &mut PageBuf,
        parent_pid: PageId,
        right_index: u32,
        txn: &mut Transaction<'a>,
    ) -> Result<bool> {
        if tree_page::is_leaf(right) {
            let next = leaf::next_page_id(right);
            let node = self.tx_page_mut(txn, node_pid)?;
            leaf::move_all_to::<N>(right, node);
            leaf::set_next_page_id(node, next);
        } else {
            let middle = internal::key_at::<N>(self.tx_page(txn, parent_pid)?, right_index);
            let moved =
                internal::move_all_to::<N>(right, self.tx_page_mut(txn, node_pid)?, &middle);
            for child in moved {
                self.reparent(child, node_pid, txn)?;
            }
        }
        debug!(survivor = %node_pid, merged = %right_pid, "coalesced right sibling");
        txn.schedule_delete(right_pid);

        let parent = self.tx_page_mut(txn, parent_pid)?;
        internal::remove::<N>(parent, right_index);
        Ok(tree_page::size(parent) < tree_page::min_size(parent))
    }

    /// Handles underflow at the root.
    ///
    /// A leaf root emptied of its last key clears the tree; an internal
    /// root left with a single child hands the root role to that child.
    /// Returns true if the old root should be deleted.
    fn adjust_root<'a>(&'a self, root_pid: PageId, txn: &mut Transaction<'a>) -> Result<bool> {
        let (is_leaf, size) = {
            let data = self.tx_page(txn, root_pid)?;
            (tree_page::is_leaf(data), tree_page::size(data))
        };

        if is_leaf && size == 0 {
            self.set_root_page_id(PageId::INVALID);
            self.update_root_record(txn)?;
            debug!(index = %self.name, "removed last key, tree is empty");
            Ok(true)
        } else if !is_leaf && size == 1 {
            let only_child =
                internal::remove_and_return_only_child::<N>(self.tx_page_mut(txn, root_pid)?);
            self.reparent(only_child, PageId::INVALID, txn)?;
            self.set_root_page_id(only_child);
            self.update_root_record(txn)?;
            debug!(index = %self.name, root = %only_child, "collapsed root into only child");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // =========================================================================
    // Crabbing and shared helpers
    // =========================================================================

    /// A node is safe when the pending operation cannot propagate a
    /// structural change to its parent.
    fn is_safe(&self, data: &PageBuf, op: OpMode) -> bool {
        match op {
            OpMode::Insert => tree_page::size(data) + 1 < tree_page::max_size(data),
            OpMode::Delete => tree_page::size(data) > tree_page::min_size(data),
            OpMode::Read => true,
        }
    }

    /// Descends from the root to the leaf responsible for `key` (or the
    /// leftmost leaf when `key` is None), latch-crabbing per the
    /// transaction's mode. Every latched page joins the transaction's
    /// latch set; the caller reads the leaf through it.
    fn find_leaf_with_latch<'a>(
        &'a self,
        key: Option<&IndexKey<N>>,
        txn: &mut Transaction<'a>,
    ) -> Result<PageId> {
        let mut page_id = self.root_page_id();
        loop {
            let frame = self.pool.fetch_page(page_id)?;
            let latch = match txn.op() {
                OpMode::Read => PageLatch::Read(frame.read_data()),
                OpMode::Insert | OpMode::Delete => PageLatch::Write(frame.write_data()),
            };

            let next = {
                let data = latch.bytes();
                if tree_page::is_leaf(data) {
                    None
                } else {
                    Some(match key {
                        Some(key) => internal::lookup::<N>(data, key, self.comparator),
                        None => internal::value_at::<N>(data, 0),
                    })
                }
            };

            let release_ancestors = match txn.op() {
                OpMode::Read => true,
                op => self.is_safe(latch.bytes(), op),
            };
            if release_ancestors {
                txn.release_and_unpin(&self.pool)?;
            }
            txn.push(page_id, latch);

            match next {
                None => return Ok(page_id),
                Some(next) => page_id = next,
            }
        }
    }

    /// Points `child`'s parent pointer at `parent`.
    ///
    /// Children already write-latched by this operation are updated through
    /// the transaction's guard; anything else is fetched and briefly
    /// write-latched. Concurrent structural access to these children is
    /// excluded because their current parent is write-latched by us.
    fn reparent<'a>(
        &'a self,
        child: PageId,
        parent: PageId,
        txn: &mut Transaction<'a>,
    ) -> Result<()> {
        if let Some(data) = txn.page_mut(child) {
            tree_page::set_parent_page_id(data, parent);
            return Ok(());
        }
        let frame = self.pool.fetch_page(child)?;
        {
            let mut guard = frame.write_data();
            tree_page::set_parent_page_id(&mut guard, parent);
        }
        self.pool.unpin_page(child, true);
        Ok(())
    }

    /// Rewrites this index's root record on the already-latched header page.
    fn update_root_record(&self, txn: &mut Transaction<'_>) -> Result<()> {
        let root = self.root_page_id();
        let header = txn
            .page_mut(PageId::HEADER)
            .ok_or_else(|| SiltError::Internal("header page not write-latched".to_string()))?;
        header_page::set_record(header, &self.name, root)
    }

    fn tx_page<'t>(&self, txn: &'t Transaction<'_>, page_id: PageId) -> Result<&'t PageBuf> {
        txn.page(page_id)
            .ok_or_else(|| SiltError::Internal(format!("{page_id} not in latch set")))
    }

    fn tx_page_mut<'t>(
        &self,
        txn: &'t mut Transaction<'_>,
        page_id: PageId,
    ) -> Result<&'t mut PageBuf> {
        txn.page_mut(page_id)
            .ok_or_else(|| SiltError::Internal(format!("{page_id} not write-latched")))
    }

    // =========================================================================
    // Iterator entry points
    // =========================================================================

    /// Cursor over the whole tree in ascending key order.
    pub fn begin(&self) -> Result<crate::btree::iterator::IndexIterator<'_, N>> {
        match self.find_leaf_page(None, false)? {
            Some((page_id, frame)) => Ok(crate::btree::iterator::IndexIterator::new(
                &self.pool, page_id, frame, 0,
            )),
            None => Ok(crate::btree::iterator::IndexIterator::exhausted(&self.pool)),
        }
    }

    /// Cursor starting at the first key `>= key`.
    pub fn begin_at(
        &self,
        key: &IndexKey<N>,
    ) -> Result<crate::btree::iterator::IndexIterator<'_, N>> {
        match self.find_leaf_page(Some(key), false)? {
            Some((page_id, frame)) => {
                let index = {
                    let guard = frame.read_data();
                    leaf::key_index::<N>(&guard, key, self.comparator)
                };
                Ok(crate::btree::iterator::IndexIterator::new(
                    &self.pool, page_id, frame, index,
                ))
            }
            None => Ok(crate::btree::iterator::IndexIterator::exhausted(&self.pool)),
        }
    }

    /// The past-the-end cursor: (rightmost leaf, its size).
    pub fn end(&self) -> Result<crate::btree::iterator::IndexIterator<'_, N>> {
        match self.find_leaf_page(None, true)? {
            Some((page_id, frame)) => {
                let size = {
                    let guard = frame.read_data();
                    tree_page::size(&guard)
                };
                Ok(crate::btree::iterator::IndexIterator::new(
                    &self.pool, page_id, frame, size,
                ))
            }
            None => Ok(crate::btree::iterator::IndexIterator::exhausted(&self.pool)),
        }
    }

    /// Unlatched root-to-leaf descent for cursor construction: by key,
    /// leftmost (`key` None), or rightmost via the last slot.
    ///
    /// The returned leaf frame stays pinned; the cursor owns that pin.
    fn find_leaf_page(
        &self,
        key: Option<&IndexKey<N>>,
        rightmost: bool,
    ) -> Result<Option<(PageId, &BufferFrame)>> {
        let mut page_id = self.root_page_id();
        if !page_id.is_valid() {
            return Ok(None);
        }

        let mut frame = self.pool.fetch_page(page_id)?;
        loop {
            let next = {
                let guard = frame.read_data();
                let data: &PageBuf = &guard;
                if tree_page::is_leaf(data) {
                    None
                } else if rightmost {
                    Some(internal::value_at::<N>(data, tree_page::size(data) - 1))
                } else {
                    Some(match key {
                        Some(key) => internal::lookup::<N>(data, key, self.comparator),
                        None => internal::value_at::<N>(data, 0),
                    })
                }
            };
            match next {
                None => return Ok(Some((page_id, frame))),
                Some(next_pid) => {
                    let next_frame = self.pool.fetch_page(next_pid)?;
                    self.pool.unpin_page(page_id, false);
                    page_id = next_pid;
                    frame = next_frame;
                }
            }
        }
    }

    // =========================================================================
    // Debug dump
    // =========================================================================

    /// Writes the tree as a Graphviz DOT file.
    pub fn draw(&self, path: &Path) -> Result<()> {
        let mut out = String::from("digraph BPlusTree {\n  node [shape=record];\n");
        let root = self.root_page_id();
        if root.is_valid() {
            self.page_to_dot(root, &mut out)?;
        }
        out.push_str("}\n");
        std::fs::write(path, out)?;
        Ok(())
    }

    fn page_to_dot(&self, page_id: PageId, out: &mut String) -> Result<()> {
        use std::fmt::Write as _;

        let frame = self.pool.fetch_page(page_id)?;
        let children = {
            let guard = frame.read_data();
            let data: &PageBuf = &guard;
            let size = tree_page::size(data);
            if tree_page::is_leaf(data) {
                let keys: Vec<String> = (0..size)
                    .map(|i| leaf::key_at::<N>(data, i).to_string())
                    .collect();
                let _ = writeln!(
                    out,
                    "  p{} [color=green label=\"{}\"];",
                    page_id.0,
                    keys.join("|")
                );
                let next = leaf::next_page_id(data);
                if next.is_valid() {
                    let _ = writeln!(out, "  p{} -> p{} [style=dashed];", page_id.0, next.0);
                }
                Vec::new()
            } else {
                let mut labels = vec!["*".to_string()];
                labels.extend((1..size).map(|i| internal::key_at::<N>(data, i).to_string()));
                let _ = writeln!(
                    out,
                    "  p{} [color=pink label=\"{}\"];",
                    page_id.0,
                    labels.join("|")
                );
                let children: Vec<PageId> =
                    (0..size).map(|i| internal::value_at::<N>(data, i)).collect();
                for child in &children {
                    let _ = writeln!(out, "  p{} -> p{};", page_id.0, child.0);
                }
                children
            }
        };
        self.pool.unpin_page(page_id, false);

        for child in children {
            self.page_to_dot(child, out)?;
        }
        Ok(())
    }
}
