//! Page identifiers and sizing for SiltDB storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB). The unit of disk I/O and cache residency.
pub const PAGE_SIZE: usize = 4096;

/// A page's raw bytes.
pub type PageBuf = [u8; PAGE_SIZE];

/// Unique identifier for a page within the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel for "no page".
    pub const INVALID: PageId = PageId(u32::MAX);

    /// The header page holding index-name to root-page records.
    pub const HEADER: PageId = PageId(0);

    /// Returns true if this is a valid page ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Byte offset of this page in the data file.
    pub fn file_offset(&self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "page:{}", self.0)
        } else {
            write!(f, "page:invalid")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_validity() {
        assert!(PageId(0).is_valid());
        assert!(PageId(42).is_valid());
        assert!(!PageId::INVALID.is_valid());
    }

    #[test]
    fn test_header_page_id() {
        assert_eq!(PageId::HEADER, PageId(0));
        assert!(PageId::HEADER.is_valid());
    }

    #[test]
    fn test_page_id_file_offset() {
        assert_eq!(PageId(0).file_offset(), 0);
        assert_eq!(PageId(3).file_offset(), 3 * 4096);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(7).to_string(), "page:7");
        assert_eq!(PageId::INVALID.to_string(), "page:invalid");
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId(1) < PageId(2));
        assert!(PageId(2) < PageId::INVALID);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
