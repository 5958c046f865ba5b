//! Compressed radix trie over UTXO keys.
//!
//! The trie is an arena of [`TrieNode`]s keyed by prefix. Reads go through the pending
//! overlay first and fall back to the [`NodeStore`]; writes only touch the overlay until
//! [`UtxoTrie::flush`] persists them.
//!
//! Structure invariants maintained by [`UtxoTrie::insert`] and [`UtxoTrie::remove`]:
//! - The root (prefix `""`) always exists and may have any number of children.
//! - Every other branch has at least two children, whose first byte after the branch
//!   prefix differs. A branch prefix is therefore the longest common byte-aligned prefix
//!   of the keys below it.
//! - A leaf is a node whose prefix is a full key.

use crate::key::{common_prefix_len, is_leaf_prefix, validate_prefix, KEY_HEX_LEN};
use crate::node::{NodeHash, TrieNode};
use crate::pending::{Lookup, PendingSet};
use crate::status::{UtxoTrieStatus, STATUS_KEY};
use crate::store::NodeStore;
use crate::{Error, Result, ROOT_PREFIX};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Network};
use std::io::{self, Read, Write};
use std::time::Instant;

pub(crate) const LOG_TARGET: &str = "utxo-trie";

/// Number of backup records written to the store per batch.
const LOAD_BATCH_SIZE: usize = 1000;

/// Upper bound of a serialized node in a backup stream.
const MAX_BACKUP_RECORD: usize = 1 << 20;

/// Outcome of [`UtxoTrie::verify_store`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// Number of reachable nodes, the root included.
    pub nodes: usize,
    /// Number of leaves, i.e. keys in the trie.
    pub leaves: usize,
    /// Human readable description of every violated invariant.
    pub issues: Vec<String>,
}

impl StoreReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// UTXO commitment trie backed by a [`NodeStore`].
///
/// Methods taking `&self` only read and may run concurrently, prefetch in particular.
/// Mutations take `&mut self`, the owner is responsible for serializing them.
pub struct UtxoTrie<S> {
    store: S,
    pending: PendingSet,
    last_added: Option<BlockHash>,
    last_flushed: Option<BlockHash>,
}

impl<S: NodeStore> UtxoTrie<S> {
    /// Creates a trie over `store`. No status is loaded, see [`Self::load_status`].
    ///
    /// A store without a root node reads as an empty trie.
    pub fn new(store: S) -> Self {
        Self {
            store,
            pending: PendingSet::new(),
            last_added: None,
            last_flushed: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Last block applied to the in-memory trie.
    pub fn last_added(&self) -> Option<BlockHash> {
        self.last_added
    }

    /// Last block whose nodes have been persisted.
    pub fn last_flushed(&self) -> Option<BlockHash> {
        self.last_flushed
    }

    pub fn set_last_added(&mut self, block_hash: BlockHash) {
        self.last_added = Some(block_hash);
    }

    /// Number of nodes changed since the last flush.
    pub fn pending_len(&self) -> usize {
        self.pending.dirty_len()
    }

    fn read(&self, prefix: &str, warm: bool) -> Result<Option<TrieNode>> {
        match self.pending.get(prefix) {
            Lookup::Found(node) => return Ok(Some(node)),
            Lookup::Removed => return Ok(None),
            Lookup::Unknown => {}
        }

        let Some(bytes) = self.store.get(prefix)? else {
            return Ok(None);
        };
        let node = TrieNode::decode(&bytes)?;
        if warm {
            self.pending.warm(node.clone());
        }
        Ok(Some(node))
    }

    /// Reads a node referenced by its parent. A dangling reference is logged and reads as
    /// absent.
    fn child_node(&self, prefix: &str, warm: bool) -> Result<Option<TrieNode>> {
        let node = self.read(prefix, warm)?;
        if node.is_none() {
            tracing::error!(target: LOG_TARGET, prefix, "Missing UTXO trie node");
        }
        Ok(node)
    }

    fn root(&self) -> Result<TrieNode> {
        Ok(self
            .read(ROOT_PREFIX, true)?
            .unwrap_or_else(|| TrieNode::new_branch(ROOT_PREFIX)))
    }

    /// Returns the node stored under `prefix`, if any.
    pub fn get_node(&self, prefix: &str) -> Result<Option<TrieNode>> {
        validate_prefix(prefix)?;
        self.read(prefix, true)
    }

    /// Inserts a full key. Returns `false` if the key was already present.
    pub fn insert(&mut self, key: &str) -> Result<bool> {
        check_key(key)?;

        let mut root = self.root()?;
        let inserted = self.insert_below(&mut root, key)?;
        if inserted {
            self.pending.put(root);
        } else {
            tracing::warn!(target: LOG_TARGET, key, "UTXO key already present");
        }
        Ok(inserted)
    }

    /// Inserts `key` below the branch `node`, whose prefix is a prefix of `key`.
    ///
    /// On change `node` is updated in place and left for the caller to store.
    fn insert_below(&self, node: &mut TrieNode, key: &str) -> Result<bool> {
        let Some(child_prefix) = node.child_for(key).cloned() else {
            self.pending.put(TrieNode::new_leaf(key));
            node.insert_child(key.to_string());
            return Ok(true);
        };

        if child_prefix == key {
            return Ok(false);
        }

        if key.starts_with(child_prefix.as_str()) {
            let Some(mut child) = self.child_node(&child_prefix, true)? else {
                node.remove_child(&child_prefix);
                self.pending.put(TrieNode::new_leaf(key));
                node.insert_child(key.to_string());
                return Ok(true);
            };
            let inserted = self.insert_below(&mut child, key)?;
            if inserted {
                self.pending.put(child);
                node.invalidate();
            }
            return Ok(inserted);
        }

        // The child shares at least the next byte with `key` but diverges before its end,
        // put both under a new branch at the divergence point.
        let split = common_prefix_len(&child_prefix, key);
        let mut branch = TrieNode::new_branch(&key[..split]);
        branch.insert_child(child_prefix.clone());
        branch.insert_child(key.to_string());

        node.remove_child(&child_prefix);
        node.insert_child(branch.prefix().to_string());

        self.pending.put(TrieNode::new_leaf(key));
        self.pending.put(branch);

        Ok(true)
    }

    /// Removes a full key. Returns `false` if the key was not present.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        check_key(key)?;

        let mut root = self.root()?;
        let removed = self.remove_below(&mut root, key)?;
        if removed {
            self.pending.put(root);
        } else {
            tracing::warn!(target: LOG_TARGET, key, "Removing UTXO key not in trie");
        }
        Ok(removed)
    }

    fn remove_below(&self, node: &mut TrieNode, key: &str) -> Result<bool> {
        let Some(child_prefix) = node.child_for(key).cloned() else {
            return Ok(false);
        };

        if child_prefix == key {
            node.remove_child(key);
            self.pending.remove(key);
            return Ok(true);
        }

        if !key.starts_with(child_prefix.as_str()) {
            return Ok(false);
        }

        let Some(mut child) = self.child_node(&child_prefix, true)? else {
            return Ok(false);
        };
        if !self.remove_below(&mut child, key)? {
            return Ok(false);
        }

        if child.children().len() >= 2 {
            self.pending.put(child);
            node.invalidate();
        } else {
            // A branch left with a single child is replaced by that child.
            let only = child.children().iter().next().cloned();
            node.remove_child(&child_prefix);
            self.pending.remove(&child_prefix);
            if let Some(only) = only {
                node.insert_child(only);
            }
        }

        Ok(true)
    }

    /// Returns the hash of the subtree at `prefix`, or `None` if no such node exists.
    pub fn hash(&self, prefix: &str) -> Result<Option<NodeHash>> {
        validate_prefix(prefix)?;
        if prefix == ROOT_PREFIX {
            return self.root_hash().map(Some);
        }
        match self.read(prefix, true)? {
            Some(node) => self.hash_node(node).map(Some),
            None => Ok(None),
        }
    }

    /// Hash of the whole trie.
    pub fn root_hash(&self) -> Result<NodeHash> {
        let root = self.root()?;
        self.hash_node(root)
    }

    fn hash_node(&self, mut node: TrieNode) -> Result<NodeHash> {
        if let Some(hash) = node.cached_hash() {
            return Ok(hash);
        }

        let mut child_hashes = Vec::with_capacity(node.children().len());
        for child in node.children() {
            if let Some(child) = self.child_node(child, true)? {
                child_hashes.push(self.hash_node(child)?);
            }
        }

        let hash = node.compute_hash(&child_hashes)?;
        node.set_hash(hash);
        self.pending.put(node);

        Ok(hash)
    }

    /// Loads every node on the path from the root to `key` into memory.
    pub fn prefetch(&self, key: &str) -> Result<()> {
        let mut current = self.read(ROOT_PREFIX, true)?;
        while let Some(node) = current {
            match node.child_for(key) {
                Some(child) if key.starts_with(child.as_str()) => {
                    current = self.read(child, true)?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Returns every key starting with `prefix`, in ascending order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;

        let mut keys = Vec::new();
        let root = self.root()?;
        self.collect_keys(&root, prefix, &mut keys)?;
        Ok(keys)
    }

    fn collect_keys(&self, node: &TrieNode, prefix: &str, keys: &mut Vec<String>) -> Result<()> {
        for child in node.children() {
            if !child.starts_with(prefix) && !prefix.starts_with(child.as_str()) {
                continue;
            }
            if is_leaf_prefix(child) {
                keys.push(child.clone());
            } else if let Some(child) = self.child_node(child, true)? {
                self.collect_keys(&child, prefix, keys)?;
            }
        }
        Ok(())
    }

    /// Visits every reachable node depth first, parents before children and siblings in
    /// ascending order. The callback receives the node and its depth.
    ///
    /// Nodes read from the store while visiting are not cached.
    pub fn visit_nodes<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&TrieNode, usize) -> Result<()>,
    {
        let root = self
            .read(ROOT_PREFIX, false)?
            .unwrap_or_else(|| TrieNode::new_branch(ROOT_PREFIX));
        let mut stack = vec![(root, 0usize)];

        while let Some((node, depth)) = stack.pop() {
            f(&node, depth)?;
            for child in node.children().iter().rev() {
                if let Some(child) = self.child_node(child, false)? {
                    stack.push((child, depth + 1));
                }
            }
        }

        Ok(())
    }

    /// Reads the durable status record.
    pub fn read_status(&self) -> Result<Option<UtxoTrieStatus>> {
        self.store
            .get_aux(STATUS_KEY)?
            .map(|bytes| UtxoTrieStatus::decode(&bytes))
            .transpose()
    }

    fn write_status(&self, status: UtxoTrieStatus) -> Result<()> {
        self.store.insert_aux(STATUS_KEY, &status.encode()?)
    }

    /// Loads the durable status record. An absent or unreadable record resets the trie to
    /// the genesis block of `network`.
    pub fn load_status(&mut self, network: Network) -> Result<UtxoTrieStatus> {
        let status = match self.read_status() {
            Ok(Some(status)) => status,
            Ok(None) => {
                tracing::warn!(target: LOG_TARGET, "No UTXO trie status found, starting fresh");
                return self.reset_everything(network);
            }
            Err(err @ Error::Bincode(_)) => {
                tracing::warn!(target: LOG_TARGET, "Problem loading UTXO trie status: {err}, starting fresh");
                return self.reset_everything(network);
            }
            Err(err) => return Err(err),
        };

        self.last_added = Some(status.block_hash);
        self.last_flushed = Some(status.flushed_block_hash());

        Ok(status)
    }

    /// Wipes all trie state and reinitializes an empty trie at the genesis block.
    pub fn reset_everything(&mut self, network: Network) -> Result<UtxoTrieStatus> {
        let genesis_hash = bitcoin::constants::genesis_block(network).block_hash();

        tracing::warn!(target: LOG_TARGET, "Resetting UTXO trie to genesis block {genesis_hash}");

        self.store.clear()?;
        self.pending.clear();
        self.pending.put(TrieNode::new_branch(ROOT_PREFIX));
        self.last_added = Some(genesis_hash);
        self.last_flushed = Some(genesis_hash);
        self.flush()?;

        Ok(UtxoTrieStatus::consistent(genesis_hash))
    }

    /// Persists every pending node.
    ///
    /// The status record is first written with the range `(last flushed, last added]`,
    /// then the nodes are written children first as a single batch, then the status is
    /// written again with both ends equal. A crash in between leaves an inconsistent status
    /// which recovery replays.
    pub fn flush(&mut self) -> Result<()> {
        let added = self.last_added.ok_or(Error::NotInitialized)?;
        let flushed = self.last_flushed.unwrap_or(added);

        // Persist nodes with their memoized hashes.
        self.root_hash()?;

        let now = Instant::now();
        let pending = self.pending.snapshot();
        let count = pending.len();

        tracing::info!(target: LOG_TARGET, "Flushing UTXO trie: {count} nodes at block {added}");

        self.write_status(UtxoTrieStatus::in_flight(added, flushed))?;

        let mut batch = Vec::with_capacity(count);
        for (prefix, node) in pending.into_iter().rev() {
            let value = match node {
                Some(node) => Some(node.encode()?),
                None => None,
            };
            batch.push((prefix, value));
        }
        self.store.write_batch(batch)?;

        self.pending.clear();
        self.write_status(UtxoTrieStatus::consistent(added))?;
        self.last_flushed = Some(added);

        tracing::info!(
            target: LOG_TARGET,
            "UTXO trie flush complete, took {}ms",
            now.elapsed().as_millis()
        );

        Ok(())
    }

    /// Writes a backup of the trie as of the last added block and returns that block.
    ///
    /// Layout: 32 byte block hash, then one record per node (4 byte big-endian length
    /// followed by the serialized node), then a zero length record.
    pub fn dump<W: Write>(&self, out: &mut W) -> Result<BlockHash> {
        let status = self.read_status()?.ok_or(Error::NotInitialized)?;
        if !status.is_consistent() {
            return Err(Error::InconsistentStatus {
                block_hash: status.block_hash,
                prev_block_hash: status.flushed_block_hash(),
            });
        }
        let block_hash = self.last_added.unwrap_or(status.block_hash);

        // Make sure every dumped node carries its hash.
        let root_hash = self.root_hash()?;

        tracing::info!(target: LOG_TARGET, "Dumping UTXO trie at block {block_hash}, root hash {root_hash}");

        out.write_all(block_hash.as_byte_array())?;

        let mut records = 0usize;
        self.visit_nodes(|node, _depth| {
            let bytes = node.encode()?;
            out.write_all(&(bytes.len() as u32).to_be_bytes())?;
            out.write_all(&bytes)?;
            records += 1;
            Ok(())
        })?;

        out.write_all(&0u32.to_be_bytes())?;
        out.flush()?;

        tracing::info!(target: LOG_TARGET, "Dumped {records} UTXO trie nodes");

        Ok(block_hash)
    }

    /// Replaces the trie with the content of a backup written by [`Self::dump`] and returns
    /// the block it was taken at.
    pub fn load<R: Read>(&mut self, input: &mut R) -> Result<BlockHash> {
        self.store.clear()?;
        self.pending.clear();
        self.last_added = None;
        self.last_flushed = None;

        let mut header = [0u8; 32];
        read_backup(input, &mut header, "header")?;
        let block_hash = BlockHash::from_byte_array(header);

        tracing::info!(target: LOG_TARGET, "Loading UTXO trie backup at block {block_hash}");

        let mut batch = Vec::with_capacity(LOAD_BATCH_SIZE);
        let mut records = 0usize;

        loop {
            let mut len = [0u8; 4];
            read_backup(input, &mut len, "record length")?;
            let len = u32::from_be_bytes(len) as usize;
            if len == 0 {
                break;
            }
            if len > MAX_BACKUP_RECORD {
                return Err(Error::InvalidBackup(format!("record {records} too large: {len} bytes")));
            }

            let mut bytes = vec![0u8; len];
            read_backup(input, &mut bytes, "record")?;
            let node = TrieNode::decode(&bytes)
                .map_err(|err| Error::InvalidBackup(format!("record {records}: {err}")))?;

            batch.push((node.prefix().to_string(), Some(bytes)));
            records += 1;

            if batch.len() >= LOAD_BATCH_SIZE {
                self.store.write_batch(std::mem::take(&mut batch))?;
            }
        }

        if !batch.is_empty() {
            self.store.write_batch(batch)?;
        }

        self.write_status(UtxoTrieStatus::consistent(block_hash))?;
        self.last_added = Some(block_hash);
        self.last_flushed = Some(block_hash);

        tracing::info!(
            target: LOG_TARGET,
            "Loaded {records} UTXO trie nodes, root hash {}",
            self.root_hash()?
        );

        Ok(block_hash)
    }

    /// Walks the whole trie, checking the structure invariants and recomputing every hash.
    pub fn verify_store(&self) -> Result<StoreReport> {
        let mut report = StoreReport::default();
        let root = self
            .read(ROOT_PREFIX, false)?
            .unwrap_or_else(|| TrieNode::new_branch(ROOT_PREFIX));
        self.verify_node(&root, &mut report)?;
        Ok(report)
    }

    fn verify_node(&self, node: &TrieNode, report: &mut StoreReport) -> Result<NodeHash> {
        let prefix = node.prefix();
        report.nodes += 1;

        if node.is_leaf() {
            report.leaves += 1;
            if !node.children().is_empty() {
                report.issues.push(format!("leaf {prefix} has children"));
            }
        } else if prefix != ROOT_PREFIX && node.children().len() < 2 {
            report.issues.push(format!(
                "branch {prefix:?} has {} children",
                node.children().len()
            ));
        }

        let mut child_hashes = Vec::with_capacity(node.children().len());
        let mut last_selector: Option<&str> = None;
        for child in node.children() {
            if child.len() <= prefix.len() || !child.starts_with(prefix) {
                report
                    .issues
                    .push(format!("child {child} is not below {prefix:?}"));
                continue;
            }
            let selector = &child[..prefix.len() + 2];
            if last_selector == Some(selector) {
                report
                    .issues
                    .push(format!("children of {prefix:?} share selector {selector}"));
            }
            last_selector = Some(selector);

            match self.read(child, false)? {
                Some(child_node) if child_node.prefix() == child => {
                    child_hashes.push(self.verify_node(&child_node, report)?);
                }
                Some(child_node) => report.issues.push(format!(
                    "node stored under {child} has prefix {}",
                    child_node.prefix()
                )),
                None => report.issues.push(format!("missing node {child}")),
            }
        }

        let hash = node.compute_hash(&child_hashes)?;
        if let Some(cached) = node.cached_hash() {
            if cached != hash {
                report
                    .issues
                    .push(format!("stale hash at {prefix:?}: {cached} != {hash}"));
            }
        }
        Ok(hash)
    }

    /// Writes an indented rendering of the trie.
    pub fn print_tree<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "UTXO TREE:")?;
        self.visit_nodes(|node, depth| {
            let prefix = if node.prefix().is_empty() {
                "<root>"
            } else {
                node.prefix()
            };
            match node.cached_hash() {
                Some(hash) => writeln!(out, "{:indent$}{prefix} {hash}", "", indent = depth * 2)?,
                None => writeln!(out, "{:indent$}{prefix} -", "", indent = depth * 2)?,
            }
            Ok(())
        })
    }

    #[cfg(test)]
    pub(crate) fn pending_snapshot(
        &self,
    ) -> std::collections::BTreeMap<String, Option<TrieNode>> {
        self.pending.snapshot()
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.len() != KEY_HEX_LEN {
        return Err(Error::InvalidKey {
            key: key.to_string(),
            reason: "UTXO key must be 112 hex characters",
        });
    }
    validate_prefix(key)
}

fn read_backup<R: Read>(input: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    input.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::InvalidBackup(format!("truncated {what}")),
        _ => Error::Io(err),
    })
}
