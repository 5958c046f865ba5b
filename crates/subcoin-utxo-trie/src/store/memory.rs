use super::{Direction, NodeStore, StoreIter};
use crate::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// In-memory [`NodeStore`], used by tests and short-lived tooling.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<BTreeMap<String, Vec<u8>>>,
    aux: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeStore for MemoryNodeStore {
    fn get(&self, prefix: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.nodes.read().get(prefix).cloned())
    }

    fn write_batch(&self, batch: Vec<(String, Option<Vec<u8>>)>) -> Result<()> {
        let mut nodes = self.nodes.write();
        for (prefix, value) in batch {
            match value {
                Some(value) => {
                    nodes.insert(prefix, value);
                }
                None => {
                    nodes.remove(&prefix);
                }
            }
        }
        Ok(())
    }

    fn iter(&self, direction: Direction) -> StoreIter<'_> {
        // Snapshot so that no lock is held while the caller iterates.
        let nodes = self.nodes.read();
        let entries: Vec<_> = match direction {
            Direction::Ascending => nodes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Direction::Descending => nodes
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Box::new(entries.into_iter().map(Ok))
    }

    fn clear(&self) -> Result<()> {
        self.nodes.write().clear();
        self.aux.write().clear();
        Ok(())
    }

    fn get_aux(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.aux.read().get(key).cloned())
    }

    fn insert_aux(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.aux.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}
