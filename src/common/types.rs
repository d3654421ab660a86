use std::fmt;
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// The well-known page holding the index-name -> root-page-id directory
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Transaction ID type
pub type TxnId = u32;

/// Slot number within a heap page
pub type SlotNum = u32;

/// Table OID type
pub type TableOid = u32;

/// Index OID type
pub type IndexOid = u32;

/// Row identifier: a (page, slot) pair locating a tuple in a table heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: SlotNum,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: SlotNum) -> Self {
        Self { page_id, slot_num }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}

/// Page structure: the in-memory image of one on-disk page.
///
/// Pin count and dirty flag live in the buffer pool's frame metadata; the
/// `RwLock` wrapping a `Page` is the page latch used for crabbing.
#[derive(Clone)]
pub struct Page {
    pub page_id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: [0; PAGE_SIZE],
        }
    }

    pub fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.data = [0; PAGE_SIZE];
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").field("page_id", &self.page_id).finish()
    }
}

/// Smart pointer to a page; cloning shares the same latch and data.
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read latch on a page, holdable across call boundaries.
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write latch on a page, holdable across call boundaries.
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;
