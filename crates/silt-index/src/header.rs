//! Header-page record table.
//!
//! Page 0 holds a persistent table of `(index name, root page id)` records
//! so indexes can find their roots again after reopening the file. The page
//! also serves as the tree's root-pointer guard: every tree operation
//! latches it before reading or changing the root. All functions here
//! operate on the raw page bytes under the caller's latch.

use silt_common::page::{PageBuf, PageId};
use silt_common::{Result, SiltError};

/// Maximum index name length in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Record layout: name (32 bytes, zero padded) + root page id (4 bytes).
const RECORD_SIZE: usize = MAX_NAME_LEN + 4;

/// Record count field at offset 0.
const COUNT_OFFSET: usize = 0;

/// First record starts after the count field.
const RECORDS_OFFSET: usize = 4;

/// Maximum number of records on the header page.
pub const MAX_RECORDS: usize = (silt_common::PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn record_count(data: &PageBuf) -> usize {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize
}

fn set_record_count(data: &mut PageBuf, count: usize) {
    data[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&(count as u32).to_le_bytes());
}

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn encode_name(name: &str) -> Result<[u8; MAX_NAME_LEN]> {
    let bytes = name.as_bytes();
    if bytes.len() > MAX_NAME_LEN {
        return Err(SiltError::IndexNameTooLong {
            len: bytes.len(),
            max: MAX_NAME_LEN,
        });
    }
    let mut padded = [0u8; MAX_NAME_LEN];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

fn find_record(data: &PageBuf, name: &[u8; MAX_NAME_LEN]) -> Option<usize> {
    (0..record_count(data)).find(|&i| {
        let off = record_offset(i);
        &data[off..off + MAX_NAME_LEN] == name
    })
}

/// Looks up the root page id recorded for `name`.
pub fn get_root_id(data: &PageBuf, name: &str) -> Result<Option<PageId>> {
    let encoded = encode_name(name)?;
    Ok(find_record(data, &encoded).map(|i| {
        let off = record_offset(i) + MAX_NAME_LEN;
        PageId(u32::from_le_bytes([
            data[off],
            data[off + 1],
            data[off + 2],
            data[off + 3],
        ]))
    }))
}

/// Inserts a new record. Returns false if the name is already present.
pub fn insert_record(data: &mut PageBuf, name: &str, root_id: PageId) -> Result<bool> {
    let encoded = encode_name(name)?;
    if find_record(data, &encoded).is_some() {
        return Ok(false);
    }

    let count = record_count(data);
    if count >= MAX_RECORDS {
        return Err(SiltError::HeaderPageFull);
    }

    let off = record_offset(count);
    data[off..off + MAX_NAME_LEN].copy_from_slice(&encoded);
    data[off + MAX_NAME_LEN..off + RECORD_SIZE].copy_from_slice(&root_id.0.to_le_bytes());
    set_record_count(data, count + 1);
    Ok(true)
}

/// Updates an existing record. Returns false if the name is absent.
pub fn update_record(data: &mut PageBuf, name: &str, root_id: PageId) -> Result<bool> {
    let encoded = encode_name(name)?;
    match find_record(data, &encoded) {
        Some(i) => {
            let off = record_offset(i) + MAX_NAME_LEN;
            data[off..off + 4].copy_from_slice(&root_id.0.to_le_bytes());
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Inserts or updates the record for `name`.
///
/// The first root assignment of an index inserts its record; every later
/// root change (including re-creating a previously emptied index) updates
/// the record in place.
pub fn set_record(data: &mut PageBuf, name: &str, root_id: PageId) -> Result<()> {
    if !update_record(data, name, root_id)? {
        insert_record(data, name, root_id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use silt_common::PAGE_SIZE;

    fn empty_page() -> PageBuf {
        [0u8; PAGE_SIZE]
    }

    #[test]
    fn test_empty_page_has_no_records() {
        let data = empty_page();
        assert_eq!(get_root_id(&data, "idx").unwrap(), None);
    }

    #[test]
    fn test_insert_and_get() {
        let mut data = empty_page();

        assert!(insert_record(&mut data, "orders_pk", PageId(5)).unwrap());
        assert_eq!(
            get_root_id(&data, "orders_pk").unwrap(),
            Some(PageId(5))
        );
        assert_eq!(get_root_id(&data, "other").unwrap(), None);
    }

    #[test]
    fn test_insert_duplicate_returns_false() {
        let mut data = empty_page();

        assert!(insert_record(&mut data, "idx", PageId(1)).unwrap());
        assert!(!insert_record(&mut data, "idx", PageId(2)).unwrap());
        // First record wins.
        assert_eq!(get_root_id(&data, "idx").unwrap(), Some(PageId(1)));
    }

    #[test]
    fn test_update_record() {
        let mut data = empty_page();

        assert!(!update_record(&mut data, "idx", PageId(9)).unwrap());

        insert_record(&mut data, "idx", PageId(1)).unwrap();
        assert!(update_record(&mut data, "idx", PageId(9)).unwrap());
        assert_eq!(get_root_id(&data, "idx").unwrap(), Some(PageId(9)));
    }

    #[test]
    fn test_set_record_inserts_then_updates() {
        let mut data = empty_page();

        set_record(&mut data, "idx", PageId(1)).unwrap();
        assert_eq!(get_root_id(&data, "idx").unwrap(), Some(PageId(1)));

        set_record(&mut data, "idx", PageId::INVALID).unwrap();
        assert_eq!(get_root_id(&data, "idx").unwrap(), Some(PageId::INVALID));

        set_record(&mut data, "idx", PageId(3)).unwrap();
        assert_eq!(get_root_id(&data, "idx").unwrap(), Some(PageId(3)));
    }

    #[test]
    fn test_multiple_indexes() {
        let mut data = empty_page();

        for i in 0..10u32 {
            insert_record(&mut data, &format!("idx_{i}"), PageId(i + 100)).unwrap();
        }
        for i in 0..10u32 {
            assert_eq!(
                get_root_id(&data, &format!("idx_{i}")).unwrap(),
                Some(PageId(i + 100))
            );
        }
    }

    #[test]
    fn test_name_too_long() {
        let mut data = empty_page();
        let long = "x".repeat(MAX_NAME_LEN + 1);

        assert!(matches!(
            insert_record(&mut data, &long, PageId(1)),
            Err(SiltError::IndexNameTooLong { .. })
        ));
    }

    #[test]
    fn test_header_page_full() {
        let mut data = empty_page();

        for i in 0..MAX_RECORDS {
            insert_record(&mut data, &format!("i{i}"), PageId(1)).unwrap();
        }
        assert!(matches!(
            insert_record(&mut data, "overflow", PageId(1)),
            Err(SiltError::HeaderPageFull)
        ));
    }
}
