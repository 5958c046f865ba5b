//! Orchestration of the UTXO trie: block application, queries and recovery.

use crate::audit::CheckEntry;
use crate::block_keys::{BlockApplier, KeyOp};
use crate::catchup::CatchupLoop;
use crate::chain::{ChainSource, PrevoutProvider};
use crate::config::UtxoTrieConfig;
use crate::key::{AccountKey, UtxoKey};
use crate::node::NodeHash;
use crate::prefetch::Prefetcher;
use crate::resolver::{AccountResolver, StandardResolver};
use crate::root_cache::RootHashCache;
use crate::signal::BlockSignal;
use crate::status::UtxoTrieStatus;
use crate::store::NodeStore;
use crate::trie::{UtxoTrie, LOG_TARGET};
use crate::{Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::{Address, Block, BlockHash, OutPoint};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// State of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Status not loaded yet, or recovery failed.
    Uninitialized,
    /// Replaying the range of an interrupted flush.
    Recovering,
    /// Applying blocks towards the chain head.
    CatchingUp,
    /// Applied up to the chain head, waiting for new blocks.
    CaughtUp,
    /// Undoing blocks that left the best chain.
    RollingBack,
}

/// Owner of the UTXO trie.
///
/// All mutations go through a single lock around the trie. The root hash cache and the
/// sync state have their own locks, so queries about already processed blocks never wait
/// for a block being applied.
pub struct UtxoTrieMgr<S> {
    config: UtxoTrieConfig,
    trie: Mutex<UtxoTrie<S>>,
    prefetcher: Prefetcher,
    applier: BlockApplier,
    root_cache: RootHashCache,
    state: RwLock<SyncState>,
    /// Wakes the catch-up loop.
    pub(crate) block_signal: BlockSignal,
    /// Fired whenever a block root is recorded or the loop reaches the head.
    pub(crate) done_signal: BlockSignal,
    check_sender: async_channel::Sender<CheckEntry>,
    check_receiver: async_channel::Receiver<CheckEntry>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<S: NodeStore> UtxoTrieMgr<S> {
    /// Creates a manager over `store` using the standard script resolver.
    pub fn new(store: S, config: UtxoTrieConfig) -> Result<Self> {
        Self::with_resolver(store, config, Arc::new(StandardResolver))
    }

    /// Creates a manager over `store`.
    ///
    /// Loads the durable status, resetting the trie to genesis if the status is absent,
    /// unreadable or `config.reset` is set. Nothing is loaded when the trie is disabled.
    pub fn with_resolver(
        store: S,
        config: UtxoTrieConfig,
        resolver: Arc<dyn AccountResolver>,
    ) -> Result<Self> {
        let mut trie = UtxoTrie::new(store);

        if config.enabled {
            if config.reset {
                trie.reset_everything(config.network)?;
            }
            let status = trie.load_status(config.network)?;
            tracing::debug!(target: LOG_TARGET, ?status, "Loaded UTXO trie status");
        }

        let (check_sender, check_receiver) = async_channel::bounded(config.check_queue_capacity.max(1));

        Ok(Self {
            prefetcher: Prefetcher::new(config.prefetch_threads)?,
            applier: BlockApplier::new(resolver),
            root_cache: RootHashCache::new(config.root_cache_capacity),
            trie: Mutex::new(trie),
            state: RwLock::new(SyncState::Uninitialized),
            block_signal: BlockSignal::new(),
            done_signal: BlockSignal::new(),
            check_sender,
            check_receiver,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &UtxoTrieConfig {
        &self.config
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(Error::Disabled)
        }
    }

    /// Applies `block` on top of the current trie and returns the new root hash.
    ///
    /// All keys are derived before the trie is touched, so a missing previous output
    /// leaves the trie unchanged.
    pub fn add_block(&self, block: &Block, prevouts: &dyn PrevoutProvider) -> Result<NodeHash> {
        self.ensure_enabled()?;
        let mut trie = self.trie.lock();
        self.apply_block(&mut trie, block, prevouts)
    }

    /// Undoes `block`, which must be the last applied block, and returns the new root hash.
    ///
    /// Fails with [`Error::NotLastAdded`] for any other block.
    pub fn rollback_block(&self, block: &Block, prevouts: &dyn PrevoutProvider) -> Result<NodeHash> {
        self.ensure_enabled()?;
        let mut trie = self.trie.lock();
        self.undo_block(&mut trie, block, prevouts)
    }

    fn apply_block(
        &self,
        trie: &mut UtxoTrie<S>,
        block: &Block,
        prevouts: &dyn PrevoutProvider,
    ) -> Result<NodeHash> {
        let block_hash = block.block_hash();
        let keys = self.applier.block_keys(block, prevouts)?;

        let now = Instant::now();
        self.prefetcher.prefetch(trie, &keys.all_keys())?;
        let prefetched = now.elapsed();

        for key in &keys.to_add {
            trie.insert(key)?;
        }
        for key in &keys.to_remove {
            trie.remove(key)?;
        }
        trie.set_last_added(block_hash);

        let root = trie.root_hash()?;

        tracing::debug!(
            target: LOG_TARGET,
            added = keys.to_add.len(),
            removed = keys.to_remove.len(),
            prefetch_ms = prefetched.as_millis() as u64,
            total_ms = now.elapsed().as_millis() as u64,
            "Applied block {block_hash} to UTXO trie"
        );

        Ok(root)
    }

    fn undo_block(
        &self,
        trie: &mut UtxoTrie<S>,
        block: &Block,
        prevouts: &dyn PrevoutProvider,
    ) -> Result<NodeHash> {
        let block_hash = block.block_hash();
        if trie.last_added() != Some(block_hash) {
            return Err(Error::NotLastAdded {
                block_hash,
                last_added: trie.last_added(),
            });
        }

        let ops = self.applier.rollback_ops(block, prevouts)?;

        let keys = ops.iter().map(|op| op.key().to_string()).collect::<Vec<_>>();
        self.prefetcher.prefetch(trie, &keys)?;

        for op in &ops {
            match op {
                KeyOp::Insert(key) => trie.insert(key)?,
                KeyOp::Remove(key) => trie.remove(key)?,
            };
        }
        trie.set_last_added(block.header.prev_blockhash);
        self.root_cache.remove(&block_hash);

        let root = trie.root_hash()?;

        tracing::debug!(
            target: LOG_TARGET,
            ops = ops.len(),
            "Rolled back block {block_hash} from UTXO trie, new root {root}"
        );

        Ok(root)
    }

    /// Persists all pending nodes.
    pub fn flush(&self) -> Result<()> {
        self.ensure_enabled()?;
        self.trie.lock().flush()
    }

    /// Root hash of the trie at `block_hash`, or at the current tip if `None`.
    ///
    /// Returns [`NodeHash::ZERO`] for a block that is neither cached nor the current tip,
    /// and whenever the trie is disabled.
    pub fn get_root_hash(&self, block_hash: Option<BlockHash>) -> Result<NodeHash> {
        if !self.config.enabled {
            return Ok(NodeHash::ZERO);
        }

        if let Some(root) = block_hash.and_then(|hash| self.root_cache.get(&hash)) {
            return Ok(root);
        }

        let trie = self.trie.lock();
        match block_hash {
            None => trie.root_hash(),
            Some(hash) if trie.last_added() == Some(hash) => trie.root_hash(),
            Some(_) => Ok(NodeHash::ZERO),
        }
    }

    /// Unspent outputs paying to `address`. Addresses whose script does not map to an
    /// account yield nothing.
    pub fn get_unspent_for_address(&self, address: &Address) -> Result<Vec<OutPoint>> {
        match self.applier.resolve(&address.script_pubkey()) {
            Some(account) => self.get_unspent_for_account(&account),
            None => Ok(Vec::new()),
        }
    }

    /// Unspent outputs owned by `account`, in key order.
    pub fn get_unspent_for_account(&self, account: &AccountKey) -> Result<Vec<OutPoint>> {
        let keys = self.trie.lock().keys_with_prefix(&account.to_prefix())?;
        keys.iter()
            .map(|key| UtxoKey::decode(key).map(|key| key.outpoint))
            .collect()
    }

    /// Last block applied to the trie.
    pub fn last_added(&self) -> Option<BlockHash> {
        self.trie.lock().last_added()
    }

    pub fn sync_state(&self) -> SyncState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        let mut current = self.state.write();
        if *current != state {
            tracing::debug!(target: LOG_TARGET, "UTXO trie state {:?} -> {state:?}", *current);
            *current = state;
        }
    }

    /// Whether the catch-up loop has reached the chain head.
    pub fn is_up_to_date(&self) -> bool {
        self.sync_state() == SyncState::CaughtUp
    }

    /// Durable status record.
    pub fn status(&self) -> Result<Option<UtxoTrieStatus>> {
        self.trie.lock().read_status()
    }

    /// Receiver of the root hash of every applied block, see
    /// [`crate::ConsistencyAuditor`]. Entries are dropped while the queue is full.
    pub fn audit_entries(&self) -> async_channel::Receiver<CheckEntry> {
        self.check_receiver.clone()
    }

    /// Makes the root of an applied block available to queries and the auditor.
    pub(crate) fn record_block(&self, height: u32, block_hash: BlockHash, utxo_root: NodeHash) {
        self.root_cache.insert(block_hash, utxo_root);

        let entry = CheckEntry {
            height,
            block_hash,
            utxo_root,
        };
        if self.check_sender.try_send(entry).is_err() {
            tracing::trace!(target: LOG_TARGET, "UTXO check queue full, dropping #{height}");
        }

        self.done_signal.notify();
    }

    /// Wakes the catch-up loop. With `wait_for`, blocks until the root of that block is
    /// cached or `block_wait_timeout` elapses, and returns whether it became available.
    pub fn notify_block(&self, wait_for: Option<BlockHash>) -> bool {
        self.block_signal.notify();

        match wait_for {
            Some(block_hash) => self
                .done_signal
                .wait_until(self.config.block_wait_timeout, || {
                    self.root_cache.contains(&block_hash)
                }),
            None => true,
        }
    }

    /// Asks the catch-up loop to exit after the current block.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.block_signal.notify();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Brings the trie back to a consistent state after an interrupted flush and returns
    /// the block it is consistent at.
    ///
    /// The status of an interrupted flush covers the range between the last flushed block
    /// and the last added one. If the added end descends from the flushed end the blocks
    /// in between are applied again, if it is an ancestor (interrupted rollback) they are
    /// rolled back again. Fails with [`Error::UnrecoverableRange`] if the chain source
    /// connects neither way.
    pub fn recover<C: ChainSource>(&self, chain: &C) -> Result<BlockHash> {
        self.ensure_enabled()?;
        self.set_state(SyncState::Recovering);

        let mut trie = self.trie.lock();
        let status = trie.read_status()?.ok_or(Error::NotInitialized)?;

        if status.is_consistent() {
            trie.set_last_added(status.block_hash);
            return Ok(status.block_hash);
        }

        let start = status.flushed_block_hash();
        let end = status.block_hash;

        tracing::warn!(
            target: LOG_TARGET,
            "UTXO trie status inconsistent, attempting recovery from {start} to {end}"
        );

        // Nodes on disk are those of the last completed flush.
        trie.set_last_added(start);

        if let Some(path) = ancestors_until(chain, end, start) {
            tracing::warn!(target: LOG_TARGET, "UTXO trie recovery: re-applying {} blocks", path.len());
            for block_hash in path.into_iter().rev() {
                let block = chain.block(block_hash).ok_or(Error::BlockNotFound(block_hash))?;
                self.apply_block(&mut trie, &block, chain)?;
            }
        } else if let Some(path) = ancestors_until(chain, start, end) {
            tracing::warn!(target: LOG_TARGET, "UTXO trie recovery: rolling back {} blocks", path.len());
            for block_hash in path {
                let block = chain.block(block_hash).ok_or(Error::BlockNotFound(block_hash))?;
                self.undo_block(&mut trie, &block, chain)?;
            }
        } else {
            return Err(Error::UnrecoverableRange { start, end });
        }

        trie.flush()?;

        tracing::info!(target: LOG_TARGET, "UTXO trie recovered at block {end}");

        Ok(end)
    }

    /// Recovers the trie, then spawns the catch-up loop on a dedicated thread. Returns
    /// `None` if the trie is disabled or the loop is already running.
    ///
    /// A failed recovery is returned to the caller and no thread is spawned.
    pub fn start<C>(self: &Arc<Self>, chain: C) -> Result<Option<JoinHandle<()>>>
    where
        S: 'static,
        C: ChainSource + 'static,
    {
        if !self.config.enabled {
            tracing::info!(target: LOG_TARGET, "UTXO trie disabled");
            return Ok(None);
        }

        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        if let Err(err) = self.recover(&chain) {
            tracing::error!(target: LOG_TARGET, "UTXO trie recovery failed: {err}");
            self.set_state(SyncState::Uninitialized);
            self.started.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let catchup = CatchupLoop::new(self.clone(), chain);
        let handle = std::thread::Builder::new()
            .name("utxo-trie-catchup".to_string())
            .spawn(move || catchup.run())?;

        Ok(Some(handle))
    }

    /// Runs `f` with exclusive access to the trie.
    pub fn with_trie<R>(&self, f: impl FnOnce(&mut UtxoTrie<S>) -> R) -> R {
        let mut trie = self.trie.lock();
        f(&mut trie)
    }
}

/// Hashes from `from` back to `to`, tip first and excluding `to`. `None` if `to` is not an
/// ancestor of `from` as far as `chain` knows.
fn ancestors_until<C: ChainSource>(chain: &C, from: BlockHash, to: BlockHash) -> Option<Vec<BlockHash>> {
    let floor = chain.block_number(to);
    let mut path = Vec::new();
    let mut current = from;

    while current != to {
        if let (Some(floor), Some(number)) = (floor, chain.block_number(current)) {
            if number <= floor {
                return None;
            }
        }
        let header = chain.block_header(current)?;
        if header.prev_blockhash == BlockHash::all_zeros() {
            return None;
        }
        path.push(current);
        current = header.prev_blockhash;
    }

    Some(path)
}
