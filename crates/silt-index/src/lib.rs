//! B+ tree index for SiltDB.
//!
//! This crate provides a concurrent, buffer-pool-managed B+ tree over
//! fixed-width keys:
//! - On-page layouts for leaf and internal nodes
//! - Header-page records mapping index names to root pages
//! - Latch-crabbing search, insert, and delete
//! - Ordered forward iteration across the leaf chain

pub mod btree;
pub mod header;
pub mod key;

pub use btree::iterator::IndexIterator;
pub use btree::transaction::{OpMode, Transaction};
pub use btree::tree::BPlusTree;
pub use key::{IndexKey, KeyComparator};
