use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Out of memory: no free frame for a new tree page")]
    OutOfMemory,

    #[error("Node does not fit in a page")]
    NodeTooLarge,

    #[error("Index keys must be integers")]
    InvalidKeyType,

    #[error("Corrupted tree page: {0}")]
    Corrupted(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Buffer pool error: {0}")]
    Buffer(#[from] BufferPoolError),
}
