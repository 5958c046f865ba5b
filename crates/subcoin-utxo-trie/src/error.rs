//! Error types for the UTXO commitment trie.

use bitcoin::{BlockHash, OutPoint};

/// Errors that can occur during UTXO trie operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// RocksDB error.
    #[cfg(feature = "rocksdb")]
    #[error("RocksDB error: {0}")]
    Rocksdb(#[from] rocksdb::Error),

    /// Bincode serialization/deserialization error.
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Hex decoding error.
    #[error("Hex error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Key or prefix is not valid trie text.
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// Storage not initialized.
    #[error("Storage not initialized")]
    NotInitialized,

    /// Stored key is not valid UTF-8.
    #[error("Stored node key is not valid UTF-8")]
    InvalidStoreKey,

    /// Block is not available from the chain source.
    #[error("Block {0} not found")]
    BlockNotFound(BlockHash),

    /// Block number is not known to the chain source.
    #[error("Block number for {0} not found")]
    BlockNumberNotFound(BlockHash),

    /// The output spent by an input could not be found.
    #[error("Previous output {0} not found")]
    PrevoutNotFound(OutPoint),

    /// Only the last applied block can be rolled back.
    #[error("Block {block_hash} is not the last applied block {last_added:?}")]
    NotLastAdded {
        block_hash: BlockHash,
        last_added: Option<BlockHash>,
    },

    /// Recovery could not reconnect the two ends of the inconsistent range.
    #[error("Unable to recover UTXO trie between {start} and {end}")]
    UnrecoverableRange { start: BlockHash, end: BlockHash },

    /// Operation requires a consistent durable status.
    #[error("UTXO trie status inconsistent: {block_hash} (flushed at {prev_block_hash})")]
    InconsistentStatus {
        block_hash: BlockHash,
        prev_block_hash: BlockHash,
    },

    /// Malformed backup stream.
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    /// Malformed response from the consistency oracle.
    #[error("Invalid audit response {line:?}: {reason}")]
    InvalidAuditResponse { line: String, reason: String },

    /// HTTP error talking to the consistency oracle.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to build the prefetch thread pool.
    #[error("Failed to build prefetch pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The trie is disabled by configuration.
    #[error("UTXO trie is disabled")]
    Disabled,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
