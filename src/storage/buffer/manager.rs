use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping, kept under the pool mutex.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    frames: Vec<FrameMeta>,
}

/// The buffer pool: a fixed arena of frames fronting the disk manager.
///
/// All bookkeeping (page table, free list, replacer, pin counts) is mutated
/// under a single pool-wide mutex; disk I/O also happens under that mutex,
/// a documented simplification. The `Arc<RwLock<Page>>` handed to callers
/// doubles as the page latch and stays valid across evictions of the frame,
/// which is why callers must hold a pin while using it.
pub struct BufferPoolManager {
    pool_size: usize,
    pages: Vec<PagePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Create a pool of `pool_size` frames over a database file at `db_path`.
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager))
    }

    pub fn with_disk_manager(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            pages.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta::new());
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            pages,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                frames,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, pinning it. Fails with `BufferPoolFull` when every frame
    /// is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut state = self.state.lock();

        // Already resident: pin and return.
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let meta = &mut state.frames[frame_id as usize];
            meta.pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(self.pages[frame_id as usize].clone());
        }

        // Cache miss: claim a frame, write back its old dirty page, read the
        // requested page in its place.
        let frame_id = self.evict_frame(&mut state)?;

        {
            let mut page = self.pages[frame_id as usize].write();
            self.disk_manager.read_page(page_id, &mut page)?;
        }

        let meta = &mut state.frames[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        trace!("fetched page {} into frame {}", page_id, frame_id);
        Ok(self.pages[frame_id as usize].clone())
    }

    /// Allocate a fresh page on disk and pin it in a frame, zeroed.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        // Claim the frame first: allocating a disk page is pointless when
        // every frame is pinned.
        let frame_id = self.evict_frame(&mut state)?;
        let page_id = self.disk_manager.allocate_page()?;

        {
            let mut page = self.pages[frame_id as usize].write();
            page.reset();
            page.page_id = page_id;
        }

        let meta = &mut state.frames[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        trace!("new page {} in frame {}", page_id, frame_id);
        Ok((self.pages[frame_id as usize].clone(), page_id))
    }

    /// Drop one pin on a page, OR-ing in the dirty flag. When the pin count
    /// reaches zero the frame becomes a victim candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let meta = &mut state.frames[frame_id as usize];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;

        if meta.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk and clear its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        {
            let page = self.pages[frame_id as usize].read();
            self.disk_manager.write_page(&page)?;
        }
        state.frames[frame_id as usize].is_dirty = false;

        Ok(())
    }

    /// Flush every resident dirty page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let resident: Vec<(PageId, FrameId)> =
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect();

        for (_page_id, frame_id) in resident {
            if state.frames[frame_id as usize].is_dirty {
                let page = self.pages[frame_id as usize].read();
                self.disk_manager.write_page(&page)?;
                drop(page);
                state.frames[frame_id as usize].is_dirty = false;
            }
        }

        Ok(())
    }

    /// Remove a page from the pool and deallocate it on disk. Succeeds
    /// trivially when the page is not resident; fails when it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => {
                self.disk_manager.deallocate_page(page_id);
                return Ok(());
            }
        };

        if state.frames[frame_id as usize].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.disk_manager.deallocate_page(page_id);
        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);

        let meta = &mut state.frames[frame_id as usize];
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;
        self.pages[frame_id as usize].write().reset();

        state.free_list.push_back(frame_id);
        debug!("deleted page {} (frame {})", page_id, frame_id);

        Ok(())
    }

    /// Claim a frame for reuse: free list first, then the replacer. Writes
    /// back the old page when it left the frame dirty.
    fn evict_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.victim().ok_or(BufferPoolError::BufferPoolFull)?;
        let meta = &mut state.frames[frame_id as usize];
        let old_page_id = meta.page_id;

        if meta.is_dirty {
            // pin_count is zero, so nobody holds the latch for long.
            let page = self.pages[frame_id as usize].read();
            self.disk_manager.write_page(&page)?;
            drop(page);
            meta.is_dirty = false;
        }

        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
            debug!("evicted page {} from frame {}", old_page_id, frame_id);
        }

        Ok(frame_id)
    }
}
