//! In-memory overlay in front of the node store.
//!
//! Two layers, each behind its own lock:
//! - `dirty`: nodes created, changed or removed since the last flush. A `None` entry is a
//!   removal that has not reached the store yet.
//! - `warm`: clean nodes read from the store by prefetch or lookups, dropped on flush.

use crate::node::TrieNode;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Result of looking a prefix up in the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// The overlay has a current version of the node.
    Found(TrieNode),
    /// The node was removed since the last flush.
    Removed,
    /// The overlay knows nothing, the store must be consulted.
    Unknown,
}

#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    dirty: RwLock<BTreeMap<String, Option<TrieNode>>>,
    warm: RwLock<HashMap<String, TrieNode>>,
}

impl PendingSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, prefix: &str) -> Lookup {
        if let Some(entry) = self.dirty.read().get(prefix) {
            return match entry {
                Some(node) => Lookup::Found(node.clone()),
                None => Lookup::Removed,
            };
        }
        match self.warm.read().get(prefix) {
            Some(node) => Lookup::Found(node.clone()),
            None => Lookup::Unknown,
        }
    }

    /// Records a changed or new node.
    pub(crate) fn put(&self, node: TrieNode) {
        self.warm.write().remove(node.prefix());
        self.dirty.write().insert(node.prefix().to_string(), Some(node));
    }

    /// Records the removal of a node.
    pub(crate) fn remove(&self, prefix: &str) {
        self.warm.write().remove(prefix);
        self.dirty.write().insert(prefix.to_string(), None);
    }

    /// Caches a clean node read from the store. Ignored if a newer version is pending.
    pub(crate) fn warm(&self, node: TrieNode) {
        if self.dirty.read().contains_key(node.prefix()) {
            return;
        }
        self.warm.write().insert(node.prefix().to_string(), node);
    }

    /// Number of nodes waiting to be flushed.
    pub(crate) fn dirty_len(&self) -> usize {
        self.dirty.read().len()
    }

    #[cfg(test)]
    pub(crate) fn warm_len(&self) -> usize {
        self.warm.read().len()
    }

    /// Returns a copy of the pending writes, keyed by prefix.
    pub(crate) fn snapshot(&self) -> BTreeMap<String, Option<TrieNode>> {
        self.dirty.read().clone()
    }

    /// Drops every pending write and warmed node.
    pub(crate) fn clear(&self) {
        self.dirty.write().clear();
        self.warm.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_shadows_warm() {
        let pending = PendingSet::new();
        let mut node = TrieNode::new_branch("aa");
        pending.warm(node.clone());
        assert_eq!(pending.get("aa"), Lookup::Found(node.clone()));

        node.insert_child("aa00".to_string());
        pending.put(node.clone());
        assert_eq!(pending.warm_len(), 0);

        // A stale clean copy must not replace the pending one.
        pending.warm(TrieNode::new_branch("aa"));
        assert_eq!(pending.get("aa"), Lookup::Found(node));

        pending.remove("aa");
        assert_eq!(pending.get("aa"), Lookup::Removed);
        assert_eq!(pending.get("bb"), Lookup::Unknown);
        assert_eq!(pending.dirty_len(), 1);

        pending.clear();
        assert_eq!(pending.get("aa"), Lookup::Unknown);
    }
}
