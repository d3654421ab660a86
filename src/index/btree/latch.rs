use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::common::types::{Page, PageId, PageReadGuard, PageWriteGuard, PagePtr};
use crate::storage::buffer::BufferPoolManager;

/// A pinned page held under its read latch. Dropping releases the latch and
/// the pin, in that order.
pub(crate) struct ReadLatch {
    buffer_pool: Arc<BufferPoolManager>,
    page_id: PageId,
    guard: Option<PageReadGuard>,
}

impl ReadLatch {
    pub fn acquire(buffer_pool: Arc<BufferPoolManager>, page_id: PageId, page: PagePtr) -> Self {
        let guard = page.read_arc();
        Self {
            buffer_pool,
            page_id,
            guard: Some(guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadLatch {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.guard.as_ref().expect("read latch already released")
    }
}

impl Drop for ReadLatch {
    fn drop(&mut self) {
        drop(self.guard.take());
        let _ = self.buffer_pool.unpin_page(self.page_id, false);
    }
}

/// A pinned page held under its write latch. Dropping releases the latch and
/// the pin, carrying the dirty flag set via `mark_dirty`.
pub(crate) struct WriteLatch {
    buffer_pool: Arc<BufferPoolManager>,
    page_id: PageId,
    guard: Option<PageWriteGuard>,
    dirty: bool,
}

impl WriteLatch {
    pub fn acquire(buffer_pool: Arc<BufferPoolManager>, page_id: PageId, page: PagePtr) -> Self {
        let guard = page.write_arc();
        Self {
            buffer_pool,
            page_id,
            guard: Some(guard),
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Deref for WriteLatch {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.guard.as_ref().expect("write latch already released")
    }
}

impl DerefMut for WriteLatch {
    fn deref_mut(&mut self) -> &mut Page {
        self.guard.as_mut().expect("write latch already released")
    }
}

impl Drop for WriteLatch {
    fn drop(&mut self) {
        drop(self.guard.take());
        let _ = self.buffer_pool.unpin_page(self.page_id, self.dirty);
    }
}
