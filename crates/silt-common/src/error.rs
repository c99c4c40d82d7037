//! Error types for SiltDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using SiltError.
pub type Result<T> = std::result::Result<T, SiltError>;

/// Errors that can occur in SiltDB storage operations.
#[derive(Debug, Error)]
pub enum SiltError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Header page full, cannot insert index record")]
    HeaderPageFull,

    #[error("Index name too long: {len} bytes (max {max})")]
    IndexNameTooLong { len: usize, max: usize },

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: SiltError = io_err.into();
        assert!(matches!(err, SiltError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = SiltError::PageNotFound(PageId(42));
        assert_eq!(err.to_string(), "Page not found: page:42");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = SiltError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_index_name_too_long_display() {
        let err = SiltError::IndexNameTooLong { len: 64, max: 32 };
        assert_eq!(err.to_string(), "Index name too long: 64 bytes (max 32)");
    }

    #[test]
    fn test_tree_corrupted_display() {
        let err = SiltError::TreeCorrupted("leaf chain broken".to_string());
        assert_eq!(err.to_string(), "B+ tree corrupted: leaf chain broken");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(SiltError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SiltError>();
    }
}
