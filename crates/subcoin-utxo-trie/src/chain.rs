use bitcoin::block::Header as BitcoinHeader;
use bitcoin::{Block, BlockHash, OutPoint, TxOut};
use std::collections::HashMap;
use std::sync::Arc;

/// Looks up the output spent by an input.
pub trait PrevoutProvider {
    /// Returns the output referenced by `outpoint`, spent or not.
    fn prev_output(&self, outpoint: &OutPoint) -> Option<TxOut>;
}

impl PrevoutProvider for HashMap<OutPoint, TxOut> {
    fn prev_output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        self.get(outpoint).cloned()
    }
}

/// Best chain the trie follows.
///
/// Lookups return `None` for blocks that are not (yet) available, the catch-up loop
/// retries them.
pub trait ChainSource: PrevoutProvider + Send + Sync {
    /// Hash of the current best block.
    fn best_hash(&self) -> Option<BlockHash>;

    /// Returns the number for given block hash.
    fn block_number(&self, block_hash: BlockHash) -> Option<u32>;

    /// Returns the hash of the best chain block at `block_number`.
    fn block_hash(&self, block_number: u32) -> Option<BlockHash>;

    /// Whether `block_hash` is part of the current best chain.
    fn is_on_main_chain(&self, block_hash: BlockHash) -> bool;

    /// Returns the header for given block hash.
    fn block_header(&self, block_hash: BlockHash) -> Option<BitcoinHeader>;

    /// Returns the full block for given block hash.
    fn block(&self, block_hash: BlockHash) -> Option<Block>;

    /// Whether the node is short on storage and catch-up should back off.
    fn is_space_limited(&self) -> bool {
        false
    }
}

impl<T: PrevoutProvider + ?Sized> PrevoutProvider for Arc<T> {
    fn prev_output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        (**self).prev_output(outpoint)
    }
}

impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    fn best_hash(&self) -> Option<BlockHash> {
        (**self).best_hash()
    }

    fn block_number(&self, block_hash: BlockHash) -> Option<u32> {
        (**self).block_number(block_hash)
    }

    fn block_hash(&self, block_number: u32) -> Option<BlockHash> {
        (**self).block_hash(block_number)
    }

    fn is_on_main_chain(&self, block_hash: BlockHash) -> bool {
        (**self).is_on_main_chain(block_hash)
    }

    fn block_header(&self, block_hash: BlockHash) -> Option<BitcoinHeader> {
        (**self).block_header(block_hash)
    }

    fn block(&self, block_hash: BlockHash) -> Option<Block> {
        (**self).block(block_hash)
    }

    fn is_space_limited(&self) -> bool {
        (**self).is_space_limited()
    }
}
