use bitcoin::Network;
use std::time::Duration;

/// When the catch-up loop flushes pending nodes.
///
/// Blocks grow over the chain's history, so the number of blocks between two flushes
/// shrinks with height to bound the size of the pending overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlushPolicy {
    /// `(height, interval)` pairs in ascending height order. Blocks above `height` are
    /// flushed every `interval` blocks.
    pub steps: Vec<(u32, u32)>,

    /// Interval below the first step.
    pub base_interval: u32,

    /// Time after which a catch-up pass that added blocks flushes regardless of height.
    pub max_interval: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            steps: vec![(220_000, 100), (320_000, 10)],
            base_interval: 1000,
            max_interval: Duration::from_secs(15),
        }
    }
}

impl FlushPolicy {
    /// Number of blocks between flushes at `height`.
    pub fn interval_at(&self, height: u32) -> u32 {
        self.steps
            .iter()
            .rev()
            .find(|(threshold, _)| height > *threshold)
            .map_or(self.base_interval, |(_, interval)| *interval)
            .max(1)
    }

    /// Whether the block at `height` is followed by a flush.
    pub fn should_flush(&self, height: u32) -> bool {
        height % self.interval_at(height) == 0
    }
}

/// Configuration of the UTXO trie manager.
#[derive(Clone, Debug)]
pub struct UtxoTrieConfig {
    /// When disabled the manager never starts and reports no root hashes.
    pub enabled: bool,

    /// Wipe all trie state on startup.
    pub reset: bool,

    /// Network whose genesis block an empty trie starts at.
    pub network: Network,

    /// Size of the prefetch worker pool.
    pub prefetch_threads: usize,

    /// Number of block root hashes kept in memory.
    pub root_cache_capacity: u32,

    /// Bound of the audit queue. Entries are dropped when it is full.
    pub check_queue_capacity: usize,

    pub flush_policy: FlushPolicy,

    /// How long the caught-up loop waits for a new block notification.
    pub new_block_timeout: Duration,

    /// Upper bound of [`crate::UtxoTrieMgr::notify_block`] waits.
    pub block_wait_timeout: Duration,

    /// Delay before retrying a block the chain source does not have yet.
    pub block_retry_delay: Duration,

    /// Delay while the chain source reports low storage space.
    pub space_limited_delay: Duration,
}

impl Default for UtxoTrieConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reset: false,
            network: Network::Bitcoin,
            prefetch_threads: 12,
            root_cache_capacity: 256,
            check_queue_capacity: 4,
            flush_policy: FlushPolicy::default(),
            new_block_timeout: Duration::from_secs(10),
            block_wait_timeout: Duration::from_secs(15),
            block_retry_delay: Duration::from_millis(250),
            space_limited_delay: Duration::from_secs(5),
        }
    }
}

impl UtxoTrieConfig {
    /// Default configuration for `network`.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Default::default()
        }
    }
}
