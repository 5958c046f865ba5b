//! UTXO commitment trie for Subcoin.
//!
//! This crate maintains a single root hash committing to the entire set of currently
//! unspent outputs, updated incrementally as blocks are applied and rolled back.
//!
//! ## Architecture
//!
//! - **Trie**: A byte-aligned compressed radix trie over 56-byte UTXO keys
//!   (`hash160(owner) || txid || vout`), addressed by hex prefix. Nodes reference
//!   children by prefix only and are resolved through the node store.
//! - **Pending overlay**: Nodes mutated since the last flush, plus a warm cache of clean
//!   nodes read from the store, sit in front of the durable [`NodeStore`].
//! - **Prefetch**: Before a block is applied, every node on the path of every affected key
//!   is warmed in parallel; mutation then runs serially from memory.
//! - **Flush**: Pending nodes are persisted between two status record writes, so an
//!   interrupted flush is detected and replayed on the next start.
//! - **Catch-up**: A background loop follows the best chain, rolling back on reorgs and
//!   reporting each root hash to an external consistency auditor.

mod audit;
mod block_keys;
mod catchup;
mod chain;
mod config;
mod error;
mod key;
mod manager;
mod node;
mod pending;
mod prefetch;
mod resolver;
mod root_cache;
mod signal;
mod status;
mod store;
mod trie;

pub use self::audit::{
    AuditConfig, AuditReport, CheckEntry, ConsensusOracle, ConsistencyAuditor, HttpOracle,
    DEFAULT_AUDIT_URL,
};
pub use self::block_keys::{BlockApplier, BlockKeys, KeyOp};
pub use self::catchup::CatchupLoop;
pub use self::chain::{ChainSource, PrevoutProvider};
pub use self::config::{FlushPolicy, UtxoTrieConfig};
pub use self::error::Error;
pub use self::key::{common_prefix_len, AccountKey, UtxoKey, KEY_HEX_LEN, KEY_SIZE};
pub use self::manager::{SyncState, UtxoTrieMgr};
pub use self::node::{NodeHash, TrieNode};
pub use self::prefetch::Prefetcher;
pub use self::resolver::{AccountResolver, StandardResolver};
pub use self::root_cache::RootHashCache;
pub use self::status::UtxoTrieStatus;
#[cfg(feature = "rocksdb")]
pub use self::store::RocksDbNodeStore;
pub use self::store::{Direction, MemoryNodeStore, NodeStore, StoreIter};
pub use self::trie::{StoreReport, UtxoTrie};

/// Result type for UTXO trie operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Prefix of the root node.
pub const ROOT_PREFIX: &str = "";
