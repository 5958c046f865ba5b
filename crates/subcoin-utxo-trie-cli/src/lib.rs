//! Maintenance tool of the Subcoin UTXO commitment trie.
//!
//! Queries, backups and integrity checks operate on the RocksDB store under the base
//! path. The `sync` command follows a block explorer and reports every root hash to the
//! consistency auditor.

mod cli;
mod commands;
mod rpc_client;

pub use self::cli::{run, Error, Result};
