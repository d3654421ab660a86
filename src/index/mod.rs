pub mod btree;

pub use btree::{BPlusTree, BPlusTreeIndex, BTreeError, IndexKey, TreeIterator};
