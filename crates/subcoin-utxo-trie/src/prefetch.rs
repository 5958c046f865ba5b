//! Parallel warming of trie paths ahead of a block's mutation.

use crate::store::NodeStore;
use crate::trie::{UtxoTrie, LOG_TARGET};
use crate::Result;
use rayon::prelude::*;
use std::time::Instant;

/// Fixed-size worker pool loading the root-to-leaf path of many keys concurrently.
///
/// [`Prefetcher::prefetch`] returns only once every key has been processed, so the
/// mutation that follows reads from memory.
pub struct Prefetcher {
    pool: rayon::ThreadPool,
}

impl Prefetcher {
    /// Create a pool with `threads` workers.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("utxo-prefetch-{index}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Warms the path of every key in `keys`.
    pub fn prefetch<S: NodeStore>(&self, trie: &UtxoTrie<S>, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let now = Instant::now();

        self.pool
            .install(|| keys.par_iter().try_for_each(|key| trie.prefetch(key)))?;

        tracing::trace!(
            target: LOG_TARGET,
            keys = keys.len(),
            elapsed_us = now.elapsed().as_micros() as u64,
            "Prefetched UTXO trie paths"
        );

        Ok(())
    }
}
