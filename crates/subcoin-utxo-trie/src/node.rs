//! Trie nodes and their hashes.

use crate::key::{is_leaf_prefix, validate_prefix};
use crate::Result;
use bitcoin::hashes::{sha256d, Hash, HashEngine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound;

/// Hash of a trie subtree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeHash([u8; 32]);

impl NodeHash {
    /// Sentinel returned when the root of a block is unknown.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Constructs a hash from raw bytes.
    pub const fn from_byte_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parses a hash from 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Computes `SHA256d(skip || child_1 || child_2 || ...)`.
    pub fn compute(skip: &[u8], children: &[NodeHash]) -> Self {
        let mut engine = sha256d::Hash::engine();
        engine.input(skip);
        for child in children {
            engine.input(&child.0);
        }
        Self(sha256d::Hash::from_engine(engine).to_byte_array())
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({self})")
    }
}

/// A node of the UTXO trie, identified by its prefix.
///
/// A node whose prefix is a full UTXO key is a leaf and has no children. Every other node
/// is a branch holding the prefixes of its immediate children in ascending order. Nodes
/// never refer to each other directly, children are resolved by prefix through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieNode {
    prefix: String,
    children: BTreeSet<String>,
    /// Memoized subtree hash, `None` once a descendant changed.
    hash: Option<NodeHash>,
}

impl TrieNode {
    /// Creates an empty branch at `prefix`.
    pub fn new_branch(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            children: BTreeSet::new(),
            hash: None,
        }
    }

    /// Creates a leaf for a full key.
    pub fn new_leaf(key: impl Into<String>) -> Self {
        Self::new_branch(key)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn children(&self) -> &BTreeSet<String> {
        &self.children
    }

    /// Whether this node stands for a single full key.
    pub fn is_leaf(&self) -> bool {
        is_leaf_prefix(&self.prefix)
    }

    /// Returns the memoized hash, if still valid.
    pub fn cached_hash(&self) -> Option<NodeHash> {
        self.hash
    }

    pub(crate) fn set_hash(&mut self, hash: NodeHash) {
        self.hash = Some(hash);
    }

    pub(crate) fn invalidate(&mut self) {
        self.hash = None;
    }

    pub(crate) fn insert_child(&mut self, child: String) {
        self.children.insert(child);
        self.hash = None;
    }

    pub(crate) fn remove_child(&mut self, child: &str) -> bool {
        self.hash = None;
        self.children.remove(child)
    }

    /// Returns the child whose subtree `key` belongs to, i.e. the child sharing the first
    /// byte following this node's prefix.
    ///
    /// Children of a branch always differ in that byte, so at most one can match.
    pub fn child_for(&self, key: &str) -> Option<&String> {
        let next = self.prefix.len() + 2;
        if key.len() < next || !key.starts_with(self.prefix.as_str()) {
            return None;
        }
        let selector = &key[..next];
        self.children
            .range::<str, _>((Bound::Included(selector), Bound::Unbounded))
            .next()
            .filter(|child| child.starts_with(selector))
    }

    /// Computes the subtree hash from the hashes of the children, in ascending prefix order.
    pub fn compute_hash(&self, child_hashes: &[NodeHash]) -> Result<NodeHash> {
        let skip = hex::decode(&self.prefix)?;
        Ok(NodeHash::compute(&skip, child_hashes))
    }

    /// Serializes the node for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserializes a stored node.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let node: Self = bincode::deserialize(bytes)?;
        validate_prefix(&node.prefix)?;
        Ok(node)
    }
}
