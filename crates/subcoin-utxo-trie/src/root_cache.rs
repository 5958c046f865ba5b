use crate::node::NodeHash;
use bitcoin::BlockHash;
use parking_lot::Mutex;
use schnellru::{ByLength, LruMap};

/// Bounded cache of root hashes of recently applied blocks.
///
/// Has its own lock so that historical lookups never wait for a block being applied.
pub struct RootHashCache {
    inner: Mutex<LruMap<BlockHash, NodeHash, ByLength>>,
}

impl RootHashCache {
    pub fn new(capacity: u32) -> Self {
        Self {
            inner: Mutex::new(LruMap::new(ByLength::new(capacity.max(1)))),
        }
    }

    pub fn insert(&self, block_hash: BlockHash, root: NodeHash) {
        self.inner.lock().insert(block_hash, root);
    }

    pub fn get(&self, block_hash: &BlockHash) -> Option<NodeHash> {
        self.inner.lock().get(block_hash).copied()
    }

    pub fn contains(&self, block_hash: &BlockHash) -> bool {
        self.inner.lock().peek(block_hash).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops the root of a block that is no longer applied.
    pub fn remove(&self, block_hash: &BlockHash) {
        self.inner.lock().remove(block_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = RootHashCache::new(2);
        let block = |n: u8| BlockHash::from_byte_array([n; 32]);
        let root = |n: u8| NodeHash::from_byte_array([n; 32]);

        cache.insert(block(1), root(1));
        cache.insert(block(2), root(2));
        assert_eq!(cache.get(&block(1)), Some(root(1)));

        cache.insert(block(3), root(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&block(1)));
        assert!(!cache.contains(&block(2)));
        assert_eq!(cache.get(&block(3)), Some(root(3)));

        cache.remove(&block(3));
        assert_eq!(cache.get(&block(3)), None);
    }
}
