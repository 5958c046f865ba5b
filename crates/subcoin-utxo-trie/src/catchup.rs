use crate::chain::ChainSource;
use crate::manager::{SyncState, UtxoTrieMgr};
use crate::store::NodeStore;
use crate::{Error, Result};
use bitcoin::BlockHash;
use std::sync::Arc;
use std::time::Instant;

const LOG_TARGET: &str = "utxo-trie::catchup";

/// Background task keeping the trie at the head of `C`'s best chain.
pub struct CatchupLoop<S, C> {
    mgr: Arc<UtxoTrieMgr<S>>,
    chain: C,
    last_flush: Instant,
    added_since_flush: usize,
}

impl<S, C> CatchupLoop<S, C>
where
    S: NodeStore,
    C: ChainSource,
{
    pub fn new(mgr: Arc<UtxoTrieMgr<S>>, chain: C) -> Self {
        Self {
            mgr,
            chain,
            last_flush: Instant::now(),
            added_since_flush: 0,
        }
    }

    /// Follows the chain until [`UtxoTrieMgr::stop`] is called. The trie must have been
    /// recovered already, see [`UtxoTrieMgr::start`].
    pub fn run(mut self) {
        while !self.mgr.is_stopped() {
            let generation = self.mgr.block_signal.generation();

            match self.catchup() {
                Ok(true) => {}
                Ok(false) => {
                    if self.mgr.is_stopped() {
                        break;
                    }
                    self.mgr.set_state(SyncState::CaughtUp);
                    self.mgr.done_signal.notify();
                    self.mgr
                        .block_signal
                        .wait_since(generation, self.mgr.config().new_block_timeout);
                }
                Err(err) => {
                    tracing::warn!(target: LOG_TARGET, "UTXO trie catch-up failed: {err}");
                    std::thread::sleep(self.mgr.config().block_retry_delay);
                }
            }
        }

        if let Err(err) = self.flush() {
            tracing::warn!(target: LOG_TARGET, "Failed to flush UTXO trie on exit: {err}");
        }
        tracing::debug!(target: LOG_TARGET, "UTXO trie catch-up stopped");
    }

    /// Runs one catch-up pass towards the current chain head.
    ///
    /// Returns `true` if the pass ended early and should be repeated, `false` once the
    /// trie is at the head.
    pub fn catchup(&mut self) -> Result<bool> {
        let config = self.mgr.config().clone();

        let tip = loop {
            let tip = self.mgr.last_added().ok_or(Error::NotInitialized)?;
            if self.chain.is_on_main_chain(tip) {
                break tip;
            }
            self.rollback(tip)?;
        };

        let Some(best_hash) = self.chain.best_hash() else {
            return Ok(false);
        };
        let current = self
            .chain
            .block_number(tip)
            .ok_or(Error::BlockNumberNotFound(tip))?;
        let head = self
            .chain
            .block_number(best_hash)
            .ok_or(Error::BlockNumberNotFound(best_hash))?;

        let near_tip = self.mgr.sync_state() == SyncState::CaughtUp;

        for height in current + 1..=head {
            while self.chain.is_space_limited() {
                if self.mgr.is_stopped() {
                    return Ok(false);
                }
                tracing::debug!(target: LOG_TARGET, "Storage space limited, pausing UTXO trie");
                std::thread::sleep(config.space_limited_delay);
            }

            if self.mgr.is_stopped() {
                return Ok(false);
            }

            let Some(block) = self
                .chain
                .block_hash(height)
                .and_then(|block_hash| self.chain.block(block_hash))
            else {
                tracing::trace!(target: LOG_TARGET, "Block #{height} not available yet");
                std::thread::sleep(config.block_retry_delay);
                return Ok(true);
            };

            self.mgr.set_state(SyncState::CatchingUp);

            let block_hash = block.block_hash();
            if Some(block.header.prev_blockhash) != self.mgr.last_added() {
                tracing::debug!(
                    target: LOG_TARGET,
                    "Parent of block #{height},{block_hash} is not the UTXO trie tip, restarting"
                );
                std::thread::sleep(config.block_retry_delay);
                return Ok(true);
            }

            let root = self.mgr.add_block(&block, &self.chain)?;
            self.mgr.record_block(height, block_hash, root);
            self.added_since_flush += 1;

            if near_tip {
                tracing::info!(target: LOG_TARGET, "UTXO added block #{height},{block_hash}: {root}");
            } else {
                tracing::debug!(target: LOG_TARGET, "UTXO added block #{height},{block_hash}: {root}");
            }

            if config.flush_policy.should_flush(height) {
                self.flush()?;
            }
        }

        self.mgr.done_signal.notify();

        if self.added_since_flush > 0 && self.last_flush.elapsed() >= config.flush_policy.max_interval {
            self.flush()?;
        }

        Ok(false)
    }

    /// Undoes the block at `tip`, moving the trie to its parent, and flushes.
    ///
    /// The tip is moved before the flush, so an interrupted flush is recovered by rolling
    /// back again.
    fn rollback(&mut self, tip: BlockHash) -> Result<()> {
        self.mgr.set_state(SyncState::RollingBack);

        tracing::warn!(target: LOG_TARGET, "UTXO rolling back {tip}");

        let block = self.chain.block(tip).ok_or(Error::BlockNotFound(tip))?;
        self.mgr.rollback_block(&block, &self.chain)?;
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.mgr.flush()?;
        self.added_since_flush = 0;
        self.last_flush = Instant::now();
        Ok(())
    }
}
