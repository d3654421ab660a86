use crate::common::types::{Page, PageId, SlotNum, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::header::PageHeader;
use crate::storage::page::layout::{RecordLocation, HEADER_SIZE, RECORD_SLOT_SIZE};

/// Slotted-page operations for table heap pages.
///
/// Record data grows forward from the header; the slot array grows backwards
/// from the end of the page. Deleting is a two-step affair: `mark_delete`
/// sets a tombstone that `rollback_delete` can clear, and `apply_delete`
/// makes the removal permanent.
pub struct PageManager;

impl Default for PageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    pub fn init_page(&self, page: &mut Page) {
        let header = PageHeader::new();
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn get_header(&self, page: &Page) -> PageHeader {
        PageHeader::from_bytes(&page.data[0..HEADER_SIZE])
    }

    pub fn set_header(&self, page: &mut Page, header: &PageHeader) {
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    /// Append a record, returning its slot number.
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<SlotNum, PageError> {
        let mut header = self.get_header(page);

        let record_size = data.len() as u32;
        let total_space_needed = record_size + RECORD_SLOT_SIZE as u32;
        if header.free_space_size < total_space_needed {
            return Err(PageError::InsufficientSpace);
        }

        let slot_pos = Self::slot_position(header.record_count);
        let location = RecordLocation {
            offset: header.free_space_offset,
            length: record_size,
            deleted: false,
        };

        let data_start = header.free_space_offset as usize;
        page.data[data_start..data_start + data.len()].copy_from_slice(data);
        page.data[slot_pos..slot_pos + RECORD_SLOT_SIZE].copy_from_slice(&location.to_bytes());

        header.free_space_offset += record_size;
        header.free_space_size -= total_space_needed;
        header.record_count += 1;
        self.set_header(page, &header);

        Ok(header.record_count - 1)
    }

    /// Read a live record's bytes.
    pub fn get_record(&self, page: &Page, slot: SlotNum) -> Result<Vec<u8>, PageError> {
        let location = self.get_location(page, slot)?;
        if location.deleted || location.length == 0 {
            return Err(PageError::RecordNotFound);
        }

        let start = location.offset as usize;
        Ok(page.data[start..start + location.length as usize].to_vec())
    }

    /// Overwrite a live record. Growing records relocate within the page;
    /// the slot number is stable either way.
    pub fn update_record(&self, page: &mut Page, slot: SlotNum, data: &[u8]) -> Result<(), PageError> {
        let location = self.get_location(page, slot)?;
        if location.deleted || location.length == 0 {
            return Err(PageError::RecordNotFound);
        }

        let new_size = data.len() as u32;
        let slot_pos = Self::slot_position(slot);

        if new_size <= location.length {
            let start = location.offset as usize;
            page.data[start..start + data.len()].copy_from_slice(data);
            let new_location = RecordLocation {
                offset: location.offset,
                length: new_size,
                deleted: false,
            };
            page.data[slot_pos..slot_pos + RECORD_SLOT_SIZE]
                .copy_from_slice(&new_location.to_bytes());
            return Ok(());
        }

        // Larger record: relocate to the free area, abandoning the old bytes.
        let mut header = self.get_header(page);
        if header.free_space_size < new_size {
            return Err(PageError::InsufficientSpace);
        }

        let start = header.free_space_offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);

        let new_location = RecordLocation {
            offset: header.free_space_offset,
            length: new_size,
            deleted: false,
        };
        page.data[slot_pos..slot_pos + RECORD_SLOT_SIZE].copy_from_slice(&new_location.to_bytes());

        header.free_space_offset += new_size;
        header.free_space_size -= new_size;
        self.set_header(page, &header);

        Ok(())
    }

    /// Set the tombstone on a record.
    pub fn mark_delete(&self, page: &mut Page, slot: SlotNum) -> Result<(), PageError> {
        let mut location = self.get_location(page, slot)?;
        if location.deleted || location.length == 0 {
            return Err(PageError::RecordDeleted);
        }

        location.deleted = true;
        self.set_location(page, slot, &location);
        Ok(())
    }

    /// Clear the tombstone on a record.
    pub fn rollback_delete(&self, page: &mut Page, slot: SlotNum) -> Result<(), PageError> {
        let mut location = self.get_location(page, slot)?;
        if !location.deleted {
            return Err(PageError::RecordNotDeleted);
        }

        location.deleted = false;
        self.set_location(page, slot, &location);
        Ok(())
    }

    /// Permanently remove a record; its slot stays but is dead forever.
    pub fn apply_delete(&self, page: &mut Page, slot: SlotNum) -> Result<(), PageError> {
        let location = self.get_location(page, slot)?;
        if location.length == 0 {
            return Err(PageError::RecordNotFound);
        }

        let dead = RecordLocation {
            offset: location.offset,
            length: 0,
            deleted: false,
        };
        self.set_location(page, slot, &dead);
        Ok(())
    }

    /// Whether the slot holds a readable (non-deleted) record.
    pub fn is_live(&self, page: &Page, slot: SlotNum) -> bool {
        match self.get_location(page, slot) {
            Ok(location) => !location.deleted && location.length > 0,
            Err(_) => false,
        }
    }

    pub fn record_count(&self, page: &Page) -> u32 {
        self.get_header(page).record_count
    }

    pub fn next_page_id(&self, page: &Page) -> Option<PageId> {
        self.get_header(page).next_page_id
    }

    pub fn set_next_page_id(&self, page: &mut Page, next: Option<PageId>) {
        let mut header = self.get_header(page);
        header.next_page_id = next;
        self.set_header(page, &header);
    }

    fn get_location(&self, page: &Page, slot: SlotNum) -> Result<RecordLocation, PageError> {
        let header = self.get_header(page);
        if slot >= header.record_count {
            return Err(PageError::InvalidRecordId);
        }

        let slot_pos = Self::slot_position(slot);
        Ok(RecordLocation::from_bytes(
            &page.data[slot_pos..slot_pos + RECORD_SLOT_SIZE],
        ))
    }

    fn set_location(&self, page: &mut Page, slot: SlotNum, location: &RecordLocation) {
        let slot_pos = Self::slot_position(slot);
        page.data[slot_pos..slot_pos + RECORD_SLOT_SIZE].copy_from_slice(&location.to_bytes());
    }

    fn slot_position(slot: SlotNum) -> usize {
        PAGE_SIZE - RECORD_SLOT_SIZE * (slot as usize + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Page;

    #[test]
    fn test_insert_and_get_record() {
        let manager = PageManager::new();
        let mut page = Page::new(1);
        manager.init_page(&mut page);

        let slot = manager.insert_record(&mut page, b"hello").unwrap();
        assert_eq!(slot, 0);
        assert_eq!(manager.get_record(&page, slot).unwrap(), b"hello");

        let slot2 = manager.insert_record(&mut page, b"world!").unwrap();
        assert_eq!(slot2, 1);
        assert_eq!(manager.get_record(&page, slot2).unwrap(), b"world!");
        assert_eq!(manager.record_count(&page), 2);
    }

    #[test]
    fn test_mark_rollback_apply_delete() {
        let manager = PageManager::new();
        let mut page = Page::new(1);
        manager.init_page(&mut page);

        let slot = manager.insert_record(&mut page, b"row").unwrap();

        manager.mark_delete(&mut page, slot).unwrap();
        assert!(manager.get_record(&page, slot).is_err());
        assert!(!manager.is_live(&page, slot));

        manager.rollback_delete(&mut page, slot).unwrap();
        assert_eq!(manager.get_record(&page, slot).unwrap(), b"row");

        manager.mark_delete(&mut page, slot).unwrap();
        manager.apply_delete(&mut page, slot).unwrap();
        assert!(manager.get_record(&page, slot).is_err());
    }

    #[test]
    fn test_update_record_in_place_and_relocated() {
        let manager = PageManager::new();
        let mut page = Page::new(1);
        manager.init_page(&mut page);

        let slot = manager.insert_record(&mut page, b"abcdef").unwrap();

        manager.update_record(&mut page, slot, b"xyz").unwrap();
        assert_eq!(manager.get_record(&page, slot).unwrap(), b"xyz");

        manager.update_record(&mut page, slot, b"a much longer record").unwrap();
        assert_eq!(manager.get_record(&page, slot).unwrap(), b"a much longer record");
    }

    #[test]
    fn test_insert_fails_when_full() {
        let manager = PageManager::new();
        let mut page = Page::new(1);
        manager.init_page(&mut page);

        let big = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            manager.insert_record(&mut page, &big),
            Err(PageError::InsufficientSpace)
        ));
    }
}
