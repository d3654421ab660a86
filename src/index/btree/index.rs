use std::sync::Arc;

use crate::catalog::value::Value;
use crate::common::types::Rid;
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::TreeIterator;
use crate::index::btree::tree::BPlusTree;
use crate::storage::buffer::BufferPoolManager;

/// A B+ tree index over a single integer column, as handed out by the
/// catalog. Translates between `Value` keys and the tree's native key type.
pub struct BPlusTreeIndex {
    tree: BPlusTree<i64>,
}

impl BPlusTreeIndex {
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        Ok(Self {
            tree: BPlusTree::new(name, buffer_pool, leaf_max_size, internal_max_size)?,
        })
    }

    pub fn with_default_sizes(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        Ok(Self {
            tree: BPlusTree::with_default_sizes(name, buffer_pool)?,
        })
    }

    pub fn name(&self) -> &str {
        self.tree.index_name()
    }

    pub fn tree(&self) -> &BPlusTree<i64> {
        &self.tree
    }

    /// Insert an entry; false on duplicate key.
    pub fn insert_entry(&self, key: &Value, rid: Rid) -> Result<bool, BTreeError> {
        self.tree.insert(Self::key_of(key)?, rid)
    }

    pub fn delete_entry(&self, key: &Value) -> Result<(), BTreeError> {
        self.tree.remove(&Self::key_of(key)?)
    }

    /// All RIDs under `key` (zero or one, keys being unique).
    pub fn scan_key(&self, key: &Value) -> Result<Vec<Rid>, BTreeError> {
        Ok(self
            .tree
            .get_value(&Self::key_of(key)?)?
            .into_iter()
            .collect())
    }

    /// Full scan in key order.
    pub fn iter(&self) -> Result<IndexIterator, BTreeError> {
        Ok(IndexIterator {
            inner: self.tree.iter()?,
        })
    }

    fn key_of(value: &Value) -> Result<i64, BTreeError> {
        match value {
            Value::Integer(i) => Ok(*i),
            _ => Err(BTreeError::InvalidKeyType),
        }
    }
}

/// Iterator adapter yielding `Value` keys.
pub struct IndexIterator {
    inner: TreeIterator<i64>,
}

impl Iterator for IndexIterator {
    type Item = Result<(Value, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|entry| entry.map(|(key, rid)| (Value::Integer(key), rid)))
    }
}
