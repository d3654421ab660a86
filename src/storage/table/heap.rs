use std::sync::Arc;

use log::trace;
use thiserror::Error;

use crate::common::types::{PageId, Rid};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageError, PageManager};
use crate::storage::table::tuple::Tuple;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Buffer pool error: {0}")]
    Buffer(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Tuple serialization error: {0}")]
    Serialization(String),

    #[error("Tuple {0} not found")]
    TupleNotFound(Rid),
}

impl From<bincode::Error> for TableError {
    fn from(err: bincode::Error) -> Self {
        TableError::Serialization(err.to_string())
    }
}

/// A heap of tuples stored in a chain of slotted pages.
///
/// Inserts walk the chain looking for room and append a fresh page when
/// every existing one is full. Deletes go through mark/rollback/apply so a
/// transaction abort can resurrect a tuple.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: PageManager,
    first_page_id: PageId,
}

impl TableHeap {
    /// Create a heap with one empty page.
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, TableError> {
        let page_manager = PageManager::new();
        let (page, first_page_id) = buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            page_manager.init_page(&mut guard);
        }
        buffer_pool.unpin_page(first_page_id, true)?;

        Ok(Self {
            buffer_pool,
            page_manager,
            first_page_id,
        })
    }

    /// Re-open a heap whose first page already exists.
    pub fn open(buffer_pool: Arc<BufferPoolManager>, first_page_id: PageId) -> Self {
        Self {
            buffer_pool,
            page_manager: PageManager::new(),
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Append a tuple, returning its RID.
    pub fn insert_tuple(&self, tuple: &Tuple) -> Result<Rid, TableError> {
        let bytes = tuple.to_bytes()?;
        let mut page_id = self.first_page_id;

        loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let mut guard = page.write();

            match self.page_manager.insert_record(&mut guard, &bytes) {
                Ok(slot) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, true)?;
                    let rid = Rid::new(page_id, slot);
                    trace!("inserted tuple at {}", rid);
                    return Ok(rid);
                }
                Err(PageError::InsufficientSpace) => {
                    if let Some(next) = self.page_manager.next_page_id(&guard) {
                        drop(guard);
                        self.buffer_pool.unpin_page(page_id, false)?;
                        page_id = next;
                        continue;
                    }

                    // End of the chain: append a page and link it in.
                    let (new_page, new_page_id) = self.buffer_pool.new_page()?;
                    {
                        let mut new_guard = new_page.write();
                        self.page_manager.init_page(&mut new_guard);
                    }
                    self.page_manager.set_next_page_id(&mut guard, Some(new_page_id));
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, true)?;
                    self.buffer_pool.unpin_page(new_page_id, true)?;
                    page_id = new_page_id;
                }
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false)?;
                    return Err(e.into());
                }
            }
        }
    }

    /// Read a live tuple by RID.
    pub fn get_tuple(&self, rid: Rid) -> Result<Option<Tuple>, TableError> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let guard = page.read();
        let record = match self.page_manager.get_record(&guard, rid.slot_num) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(PageError::RecordNotFound) | Err(PageError::InvalidRecordId) => Ok(None),
            Err(e) => Err(e),
        };
        drop(guard);
        self.buffer_pool.unpin_page(rid.page_id, false)?;

        match record? {
            Some(bytes) => Ok(Some(Tuple::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite the tuple at `rid`.
    pub fn update_tuple(&self, tuple: &Tuple, rid: Rid) -> Result<(), TableError> {
        let bytes = tuple.to_bytes()?;
        self.with_page_mut(rid, |page_manager, guard| {
            page_manager.update_record(guard, rid.slot_num, &bytes)
        })
    }

    /// Tombstone the tuple at `rid`; reversible until `apply_delete`.
    pub fn mark_delete(&self, rid: Rid) -> Result<(), TableError> {
        self.with_page_mut(rid, |page_manager, guard| {
            page_manager.mark_delete(guard, rid.slot_num)
        })
    }

    /// Clear the tombstone set by `mark_delete`.
    pub fn rollback_delete(&self, rid: Rid) -> Result<(), TableError> {
        self.with_page_mut(rid, |page_manager, guard| {
            page_manager.rollback_delete(guard, rid.slot_num)
        })
    }

    /// Make a deletion permanent.
    pub fn apply_delete(&self, rid: Rid) -> Result<(), TableError> {
        self.with_page_mut(rid, |page_manager, guard| {
            page_manager.apply_delete(guard, rid.slot_num)
        })
    }

    /// Iterator over live tuples in RID order.
    pub fn iter(&self) -> TableIterator {
        TableIterator {
            buffer_pool: self.buffer_pool.clone(),
            page_manager: PageManager::new(),
            page_id: Some(self.first_page_id),
            slot: 0,
        }
    }

    fn with_page_mut<F>(&self, rid: Rid, op: F) -> Result<(), TableError>
    where
        F: FnOnce(&PageManager, &mut crate::common::types::Page) -> Result<(), PageError>,
    {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let mut guard = page.write();
        let result = op(&self.page_manager, &mut guard);
        drop(guard);
        self.buffer_pool.unpin_page(rid.page_id, result.is_ok())?;
        result.map_err(Into::into)
    }
}

/// Walks the page chain, yielding live tuples. Owns its handles, so it can
/// outlive the borrow that created it.
pub struct TableIterator {
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: PageManager,
    page_id: Option<PageId>,
    slot: u32,
}

impl TableIterator {
    fn next_inner(&mut self) -> Result<Option<(Rid, Tuple)>, TableError> {
        while let Some(page_id) = self.page_id {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let guard = page.read();

            let record_count = self.page_manager.record_count(&guard);
            while self.slot < record_count {
                let slot = self.slot;
                self.slot += 1;

                if self.page_manager.is_live(&guard, slot) {
                    let bytes = self.page_manager.get_record(&guard, slot);
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false)?;
                    let tuple = Tuple::from_bytes(&bytes?)?;
                    return Ok(Some((Rid::new(page_id, slot), tuple)));
                }
            }

            let next = self.page_manager.next_page_id(&guard);
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            self.page_id = next;
            self.slot = 0;
        }

        Ok(None)
    }
}

impl Iterator for TableIterator {
    type Item = Result<(Rid, Tuple), TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_inner().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::value::Value;
    use tempfile::NamedTempFile;

    fn test_heap(pool_size: usize) -> (TableHeap, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let buffer_pool =
            Arc::new(BufferPoolManager::new(pool_size, file.path()).unwrap());
        (TableHeap::new(buffer_pool).unwrap(), file)
    }

    fn row(id: i64) -> Tuple {
        Tuple::new(vec![Value::Integer(id), Value::Text(format!("row-{}", id))])
    }

    #[test]
    fn test_insert_and_get() {
        let (heap, _file) = test_heap(10);

        let rid = heap.insert_tuple(&row(1)).unwrap();
        assert_eq!(heap.get_tuple(rid).unwrap(), Some(row(1)));
    }

    #[test]
    fn test_mark_and_rollback_delete() {
        let (heap, _file) = test_heap(10);

        let rid = heap.insert_tuple(&row(1)).unwrap();
        heap.mark_delete(rid).unwrap();
        assert_eq!(heap.get_tuple(rid).unwrap(), None);

        heap.rollback_delete(rid).unwrap();
        assert_eq!(heap.get_tuple(rid).unwrap(), Some(row(1)));
    }

    #[test]
    fn test_iterator_spans_pages() {
        let (heap, _file) = test_heap(10);

        let count = 300usize;
        for i in 0..count {
            heap.insert_tuple(&row(i as i64)).unwrap();
        }

        let rows: Vec<_> = heap.iter().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(rows.len(), count);
        assert_eq!(rows[0].1, row(0));
        assert_eq!(rows[count - 1].1, row(count as i64 - 1));
    }

    #[test]
    fn test_iterator_skips_deleted() {
        let (heap, _file) = test_heap(10);

        let r0 = heap.insert_tuple(&row(0)).unwrap();
        let _r1 = heap.insert_tuple(&row(1)).unwrap();
        let r2 = heap.insert_tuple(&row(2)).unwrap();

        heap.mark_delete(r0).unwrap();
        heap.mark_delete(r2).unwrap();

        let rows: Vec<_> = heap.iter().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, row(1));
    }
}
