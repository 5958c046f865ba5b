//! Derivation of the trie keys a block adds and removes.

use crate::chain::PrevoutProvider;
use crate::key::{AccountKey, UtxoKey};
use crate::resolver::{AccountResolver, StandardResolver};
use crate::{Error, Result};
use bitcoin::{Block, OutPoint, Script, Transaction, TxOut, Txid};
use std::collections::HashMap;
use std::sync::Arc;

/// Keys created and spent by a block, in transaction order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockKeys {
    /// One key per resolvable output.
    pub to_add: Vec<String>,
    /// One key per non-coinbase input whose spent output is resolvable.
    pub to_remove: Vec<String>,
}

impl BlockKeys {
    /// Every key touched by the block, for prefetching.
    pub fn all_keys(&self) -> Vec<String> {
        self.to_add.iter().chain(&self.to_remove).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// A single trie mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOp {
    Insert(String),
    Remove(String),
}

impl KeyOp {
    pub fn key(&self) -> &str {
        match self {
            Self::Insert(key) | Self::Remove(key) => key,
        }
    }
}

/// Maps block transactions to trie keys.
#[derive(Clone)]
pub struct BlockApplier {
    resolver: Arc<dyn AccountResolver>,
}

impl Default for BlockApplier {
    fn default() -> Self {
        Self::new(Arc::new(StandardResolver))
    }
}

impl BlockApplier {
    pub fn new(resolver: Arc<dyn AccountResolver>) -> Self {
        Self { resolver }
    }

    /// Resolves the account owning an output script.
    pub fn resolve(&self, script_pubkey: &Script) -> Option<AccountKey> {
        self.resolver.resolve(script_pubkey)
    }

    /// Keys added and removed when `block` is connected.
    ///
    /// Spent outputs are looked up in the block itself first, then in `prevouts`. Fails
    /// with [`Error::PrevoutNotFound`] if a spent output is unknown.
    pub fn block_keys(&self, block: &Block, prevouts: &dyn PrevoutProvider) -> Result<BlockKeys> {
        let in_block = index_transactions(block);
        let mut keys = BlockKeys::default();

        for tx in &block.txdata {
            let txid = tx.compute_txid();
            keys.to_add.extend(self.output_keys(txid, tx));
            for outpoint in spent_outpoints(tx) {
                if let Some(key) = self.input_key(outpoint, &in_block, prevouts)? {
                    keys.to_remove.push(key);
                }
            }
        }

        Ok(keys)
    }

    /// Mutations undoing `block`: transactions last to first, each removing its outputs
    /// and restoring the outputs it spent.
    pub fn rollback_ops(&self, block: &Block, prevouts: &dyn PrevoutProvider) -> Result<Vec<KeyOp>> {
        let in_block = index_transactions(block);
        let mut ops = Vec::new();

        for tx in block.txdata.iter().rev() {
            let txid = tx.compute_txid();
            ops.extend(self.output_keys(txid, tx).map(KeyOp::Remove));
            for outpoint in spent_outpoints(tx) {
                if let Some(key) = self.input_key(outpoint, &in_block, prevouts)? {
                    ops.push(KeyOp::Insert(key));
                }
            }
        }

        Ok(ops)
    }

    fn output_keys<'a>(&'a self, txid: Txid, tx: &'a Transaction) -> impl Iterator<Item = String> + 'a {
        tx.output.iter().enumerate().filter_map(move |(vout, txout)| {
            self.resolve(&txout.script_pubkey).map(|account| {
                UtxoKey::new(
                    account,
                    OutPoint {
                        txid,
                        vout: vout as u32,
                    },
                )
                .encode()
            })
        })
    }

    fn input_key(
        &self,
        outpoint: OutPoint,
        in_block: &HashMap<Txid, &Transaction>,
        prevouts: &dyn PrevoutProvider,
    ) -> Result<Option<String>> {
        let txout: TxOut = match in_block.get(&outpoint.txid) {
            Some(tx) => tx
                .output
                .get(outpoint.vout as usize)
                .cloned()
                .ok_or(Error::PrevoutNotFound(outpoint))?,
            None => prevouts
                .prev_output(&outpoint)
                .ok_or(Error::PrevoutNotFound(outpoint))?,
        };

        Ok(self
            .resolve(&txout.script_pubkey)
            .map(|account| UtxoKey::new(account, outpoint).encode()))
    }
}

fn index_transactions(block: &Block) -> HashMap<Txid, &Transaction> {
    block
        .txdata
        .iter()
        .map(|tx| (tx.compute_txid(), tx))
        .collect()
}

fn spent_outpoints(tx: &Transaction) -> impl Iterator<Item = OutPoint> + '_ {
    tx.input
        .iter()
        .filter(|_| !tx.is_coinbase())
        .map(|txin| txin.previous_output)
}
