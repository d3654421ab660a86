pub mod heap;
pub mod tuple;

pub use heap::{TableError, TableHeap, TableIterator};
pub use tuple::Tuple;
