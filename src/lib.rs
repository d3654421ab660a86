// Export public modules
pub mod catalog;
pub mod common;
pub mod index;
pub mod query;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use catalog::Catalog;
pub use index::btree::{BPlusTree, BPlusTreeIndex};
pub use storage::buffer::BufferPoolManager;
pub use storage::buffer::BufferPoolError;
pub use storage::table::TableHeap;
pub use transaction::{LockManager, Transaction, TransactionManager};
