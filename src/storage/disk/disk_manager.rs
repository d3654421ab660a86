use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::trace;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O: bit-exact page reads
/// and writes plus page id allocation.
///
/// Page 0 is reserved at creation for the index header page; `allocate_page`
/// hands out monotonically increasing ids starting at 1. Reading a page that
/// has never been written yields a zeroed image.
pub struct DiskManager {
    db_file: Mutex<File>,
    deallocated: Mutex<HashSet<PageId>>,
}

impl DiskManager {
    /// Open (or create) the database file backing this manager.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
            deallocated: Mutex::new(HashSet::new()),
        })
    }

    /// Read a page from disk into `page`.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();

        // Pages past the end of the file have never been written; hand back
        // a zeroed image rather than failing.
        if offset as u64 >= file_size {
            page.reset();
            page.page_id = page_id;
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(&mut page.data)?;
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page image to disk.
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = Self::page_offset(page.page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a new page on disk and return its id.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();

        // Page 0 is the header page, so the first allocated id is 1 even on
        // an empty file.
        let new_page_id = ((file_size / PAGE_SIZE as u64) as PageId).max(HEADER_PAGE_ID + 1);

        file.seek(SeekFrom::Start((Self::page_offset(new_page_id)) as u64))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        trace!("allocated page {}", new_page_id);
        Ok(new_page_id)
    }

    /// Mark a page id as no longer in use. Ids are not recycled.
    pub fn deallocate_page(&self, page_id: PageId) {
        trace!("deallocated page {}", page_id);
        self.deallocated.lock().insert(page_id);
    }

    /// Whether `deallocate_page` has been called for this id.
    pub fn is_deallocated(&self, page_id: PageId) -> bool {
        self.deallocated.lock().contains(&page_id)
    }

    fn page_offset(page_id: PageId) -> usize {
        page_id as usize * PAGE_SIZE
    }
}
