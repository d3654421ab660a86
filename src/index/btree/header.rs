use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

/// Directory of (index name, root page id) records stored in the well-known
/// header page (page 0). Names occupy a fixed 32-byte field.
pub struct HeaderPage;

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_LEN: usize = 32;
const RECORD_LEN: usize = NAME_LEN + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_LEN;

impl HeaderPage {
    pub fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]) as usize
    }

    /// Root page id stored under `name`, if any.
    pub fn get_record(page: &Page, name: &str) -> Option<PageId> {
        let slot = Self::find(page, name)?;
        let offset = Self::record_offset(slot);
        Some(LittleEndian::read_u32(
            &page.data[offset + NAME_LEN..offset + RECORD_LEN],
        ))
    }

    /// Add a (name, root) record. Fails when the name exists, is too long,
    /// or the directory is full.
    pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_LEN || Self::find(page, name).is_some() {
            return false;
        }

        let count = Self::record_count(page);
        if count >= MAX_RECORDS {
            return false;
        }

        let offset = Self::record_offset(count);
        page.data[offset..offset + NAME_LEN].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(
            &mut page.data[offset + NAME_LEN..offset + RECORD_LEN],
            root_page_id,
        );
        LittleEndian::write_u32(
            &mut page.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4],
            (count + 1) as u32,
        );

        true
    }

    /// Overwrite the root recorded under `name`.
    pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        match Self::find(page, name) {
            Some(slot) => {
                let offset = Self::record_offset(slot);
                LittleEndian::write_u32(
                    &mut page.data[offset + NAME_LEN..offset + RECORD_LEN],
                    root_page_id,
                );
                true
            }
            None => false,
        }
    }

    fn find(page: &Page, name: &str) -> Option<usize> {
        if name.len() > NAME_LEN {
            return None;
        }

        let mut padded = [0u8; NAME_LEN];
        padded[..name.len()].copy_from_slice(name.as_bytes());

        (0..Self::record_count(page)).find(|&slot| {
            let offset = Self::record_offset(slot);
            page.data[offset..offset + NAME_LEN] == padded
        })
    }

    fn record_offset(slot: usize) -> usize {
        RECORDS_OFFSET + slot * RECORD_LEN
    }
}
