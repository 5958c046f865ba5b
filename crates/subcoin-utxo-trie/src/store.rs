//! Durable node storage.

mod memory;
#[cfg(feature = "rocksdb")]
mod rocksdb;

use crate::Result;
use std::sync::Arc;

pub use self::memory::MemoryNodeStore;
#[cfg(feature = "rocksdb")]
pub use self::rocksdb::RocksDbNodeStore;

/// Iteration order over stored prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Node and status entries yielded by [`NodeStore::iter`].
pub type StoreIter<'a> = Box<dyn Iterator<Item = Result<(String, Vec<u8>)>> + 'a>;

/// Ordered map from node prefix to serialized node, plus a small auxiliary keyspace for
/// the status record.
pub trait NodeStore: Send + Sync {
    /// Returns the serialized node stored under `prefix`.
    fn get(&self, prefix: &str) -> Result<Option<Vec<u8>>>;

    /// Applies all writes atomically. `None` deletes the entry.
    fn write_batch(&self, batch: Vec<(String, Option<Vec<u8>>)>) -> Result<()>;

    /// Iterates over all stored nodes in prefix order.
    fn iter(&self, direction: Direction) -> StoreIter<'_>;

    /// Removes every node and auxiliary entry.
    fn clear(&self) -> Result<()>;

    fn get_aux(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn insert_aux(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Stores a single node.
    fn put(&self, prefix: String, value: Vec<u8>) -> Result<()> {
        self.write_batch(vec![(prefix, Some(value))])
    }
}

impl<T: NodeStore + ?Sized> NodeStore for Arc<T> {
    fn get(&self, prefix: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(prefix)
    }

    fn write_batch(&self, batch: Vec<(String, Option<Vec<u8>>)>) -> Result<()> {
        (**self).write_batch(batch)
    }

    fn iter(&self, direction: Direction) -> StoreIter<'_> {
        (**self).iter(direction)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }

    fn get_aux(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get_aux(key)
    }

    fn insert_aux(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).insert_aux(key, value)
    }
}
