use std::sync::Arc;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::latch::ReadLatch;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::BufferPoolManager;

/// Key-ordered scan over the leaf chain.
///
/// Holds the current leaf pinned under its read latch; advancing past the
/// last entry crabs to the next leaf, releasing the old latch only after the
/// new one is held. At most one leaf latch is held at any time.
pub struct TreeIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    current: Option<(ReadLatch, BTreeNode<K>)>,
    index: usize,
}

impl<K: IndexKey> TreeIterator<K> {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        latch: ReadLatch,
        node: BTreeNode<K>,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            current: Some((latch, node)),
            index,
        }
    }

    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            current: None,
            index: 0,
        }
    }

    fn advance(&mut self) -> Result<Option<(K, Rid)>, BTreeError> {
        loop {
            let (_, node) = match &self.current {
                Some(current) => current,
                None => return Ok(None),
            };

            if self.index < node.size() {
                let item = (node.keys[self.index].clone(), node.rids[self.index]);
                self.index += 1;
                return Ok(Some(item));
            }

            // Leaf exhausted: latch the next leaf before letting go of this
            // one, then swap.
            let next_page_id = node.next_page_id;
            if next_page_id == INVALID_PAGE_ID {
                self.current = None;
                return Ok(None);
            }

            let page = self.buffer_pool.fetch_page(next_page_id)?;
            let next_latch = ReadLatch::acquire(self.buffer_pool.clone(), next_page_id, page);
            let next_node = deserialize_node::<K>(&next_latch)?;
            self.current = Some((next_latch, next_node));
            self.index = 0;
        }
    }
}

impl<K: IndexKey> Iterator for TreeIterator<K> {
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                // Poison the iterator so the error surfaces once.
                self.current = None;
                Some(Err(e))
            }
        }
    }
}
