//! Synthetic regtest chain shared by the integration tests.

#![allow(dead_code)]

use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version as TxVersion;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, Network, OutPoint, PubkeyHash, ScriptBuf, Sequence,
    Transaction, TxIn, TxMerkleNode, TxOut, Txid, Witness,
};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use subcoin_utxo_trie::{
    AccountKey, ChainSource, Direction, Error, MemoryNodeStore, NodeHash, NodeStore,
    PrevoutProvider, Result, StoreIter, UtxoKey, UtxoTrie, UtxoTrieConfig, UtxoTrieStatus,
};

pub fn test_config() -> UtxoTrieConfig {
    UtxoTrieConfig {
        prefetch_threads: 4,
        block_retry_delay: std::time::Duration::from_millis(10),
        new_block_timeout: std::time::Duration::from_millis(50),
        space_limited_delay: std::time::Duration::from_millis(20),
        ..UtxoTrieConfig::new(Network::Regtest)
    }
}

pub fn p2pkh(owner: u8) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([owner; 20]))
}

pub fn account(owner: u8) -> AccountKey {
    AccountKey::from_byte_array([owner; 20])
}

fn txout(owner: u8) -> TxOut {
    TxOut {
        value: Amount::from_sat(50_000),
        script_pubkey: p2pkh(owner),
    }
}

/// Coinbase paying one output to each of `owners`. `tag` keeps txids unique.
pub fn coinbase(tag: u32, owners: &[u8]) -> Transaction {
    let mut script_sig = vec![0x04];
    script_sig.extend_from_slice(&tag.to_le_bytes());
    Transaction {
        version: TxVersion::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(script_sig),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: owners.iter().copied().map(txout).collect(),
    }
}

/// Transaction spending `inputs` into one output per owner.
pub fn spend(inputs: &[OutPoint], owners: &[u8]) -> Transaction {
    Transaction {
        version: TxVersion::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|previous_output| TxIn {
                previous_output: *previous_output,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: owners.iter().copied().map(txout).collect(),
    }
}

pub fn outpoint(tx: &Transaction, vout: u32) -> OutPoint {
    OutPoint {
        txid: tx.compute_txid(),
        vout,
    }
}

#[derive(Default)]
struct ChainData {
    blocks: HashMap<BlockHash, (u32, Block)>,
    best_chain: Vec<BlockHash>,
    transactions: HashMap<Txid, Transaction>,
    /// Height lookups answered differently from the best chain, `None` meaning unavailable.
    served: HashMap<u32, Option<BlockHash>>,
    nonce: u32,
}

/// In-memory block tree with a switchable best chain.
pub struct MockChain {
    data: RwLock<ChainData>,
    space_limited: AtomicBool,
}

impl MockChain {
    /// Chain holding only the regtest genesis block.
    pub fn new() -> Arc<Self> {
        let genesis = bitcoin::constants::genesis_block(Network::Regtest);
        let genesis_hash = genesis.block_hash();

        let mut data = ChainData::default();
        data.best_chain.push(genesis_hash);
        data.blocks.insert(genesis_hash, (0, genesis));

        Arc::new(Self {
            data: RwLock::new(data),
            space_limited: AtomicBool::new(false),
        })
    }

    pub fn genesis_hash(&self) -> BlockHash {
        self.data.read().best_chain[0]
    }

    pub fn tip(&self) -> BlockHash {
        *self.data.read().best_chain.last().expect("Chain has genesis; qed")
    }

    pub fn height(&self) -> u32 {
        self.data.read().best_chain.len() as u32 - 1
    }

    pub fn hash_at(&self, height: u32) -> BlockHash {
        self.data.read().best_chain[height as usize]
    }

    /// Stores a block on top of `parent` without changing the best chain. The first
    /// transaction must be a coinbase.
    pub fn add_block(&self, parent: BlockHash, txdata: Vec<Transaction>) -> Block {
        let mut data = self.data.write();
        let height = data.blocks[&parent].0 + 1;
        data.nonce += 1;

        let block = Block {
            header: Header {
                version: Version::ONE,
                prev_blockhash: parent,
                merkle_root: TxMerkleNode::all_zeros(),
                time: 1_296_688_602 + height,
                bits: CompactTarget::from_consensus(0x207fffff),
                nonce: data.nonce,
            },
            txdata,
        };

        for tx in &block.txdata {
            data.transactions.insert(tx.compute_txid(), tx.clone());
        }
        data.blocks.insert(block.block_hash(), (height, block.clone()));

        block
    }

    /// Makes the chain ending at `tip` the best chain.
    pub fn set_best(&self, tip: BlockHash) {
        let mut data = self.data.write();
        let mut chain = Vec::new();
        let mut current = tip;
        loop {
            chain.push(current);
            let (height, block) = &data.blocks[&current];
            if *height == 0 {
                break;
            }
            current = block.header.prev_blockhash;
        }
        chain.reverse();
        data.best_chain = chain;
    }

    /// Appends a block to the best chain.
    pub fn extend(&self, txdata: Vec<Transaction>) -> Block {
        let block = self.add_block(self.tip(), txdata);
        self.set_best(block.block_hash());
        block
    }

    /// Appends a block with a coinbase paying `owners` and the given transactions.
    pub fn mine(&self, owners: &[u8], mut txdata: Vec<Transaction>) -> Block {
        let tag = self.data.read().nonce + 1;
        txdata.insert(0, coinbase(tag, owners));
        self.extend(txdata)
    }

    /// Pretends the block at `height` has not arrived yet.
    pub fn withhold(&self, height: u32) {
        self.data.write().served.insert(height, None);
    }

    /// Answers lookups of `height` with `block_hash` instead of the best chain block.
    pub fn serve_at(&self, height: u32, block_hash: BlockHash) {
        self.data.write().served.insert(height, Some(block_hash));
    }

    /// Answers every height lookup from the best chain again.
    pub fn serve_best_chain(&self) {
        self.data.write().served.clear();
    }

    pub fn set_space_limited(&self, limited: bool) {
        self.space_limited.store(limited, Ordering::SeqCst);
    }

    /// Keys of the unspent outputs of the best chain, computed without the trie.
    pub fn utxo_keys(&self) -> BTreeSet<String> {
        let data = self.data.read();
        let mut keys = BTreeSet::new();

        for block_hash in data.best_chain.iter().skip(1) {
            let block = &data.blocks[block_hash].1;
            let mut spent = Vec::new();
            for tx in &block.txdata {
                let txid = tx.compute_txid();
                for (vout, output) in tx.output.iter().enumerate() {
                    keys.insert(output_key(txid, vout as u32, output));
                }
                if !tx.is_coinbase() {
                    for input in &tx.input {
                        let prev = input.previous_output;
                        let output = &data.transactions[&prev.txid].output[prev.vout as usize];
                        spent.push(output_key(prev.txid, prev.vout, output));
                    }
                }
            }
            for key in spent {
                keys.remove(&key);
            }
        }

        keys
    }

    /// Root hash the trie must have at the best tip.
    pub fn expected_root(&self) -> NodeHash {
        root_of(self.utxo_keys())
    }
}

fn output_key(txid: Txid, vout: u32, output: &TxOut) -> String {
    let account = AccountKey::from_slice(&output.script_pubkey.as_bytes()[3..23])
        .expect("Test outputs are P2PKH; qed");
    UtxoKey::new(account, OutPoint { txid, vout }).encode()
}

/// Root hash of a trie holding exactly `keys`.
pub fn root_of(keys: impl IntoIterator<Item = String>) -> NodeHash {
    let mut trie = UtxoTrie::new(MemoryNodeStore::new());
    for key in keys {
        trie.insert(&key).unwrap();
    }
    trie.root_hash().unwrap()
}

impl PrevoutProvider for MockChain {
    fn prev_output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        self.data
            .read()
            .transactions
            .get(&outpoint.txid)
            .and_then(|tx| tx.output.get(outpoint.vout as usize).cloned())
    }
}

impl ChainSource for MockChain {
    fn best_hash(&self) -> Option<BlockHash> {
        Some(self.tip())
    }

    fn block_number(&self, block_hash: BlockHash) -> Option<u32> {
        self.data.read().blocks.get(&block_hash).map(|(height, _)| *height)
    }

    fn block_hash(&self, block_number: u32) -> Option<BlockHash> {
        let data = self.data.read();
        match data.served.get(&block_number) {
            Some(served) => *served,
            None => data.best_chain.get(block_number as usize).copied(),
        }
    }

    fn is_on_main_chain(&self, block_hash: BlockHash) -> bool {
        let data = self.data.read();
        data.blocks.get(&block_hash).is_some_and(|(height, _)| {
            data.best_chain.get(*height as usize) == Some(&block_hash)
        })
    }

    fn block_header(&self, block_hash: BlockHash) -> Option<Header> {
        self.data.read().blocks.get(&block_hash).map(|(_, block)| block.header)
    }

    fn block(&self, block_hash: BlockHash) -> Option<Block> {
        self.data.read().blocks.get(&block_hash).map(|(_, block)| block.clone())
    }

    fn is_space_limited(&self) -> bool {
        self.space_limited.load(Ordering::SeqCst)
    }
}

/// Node store whose batch writes can be made to fail, simulating a crash in the middle of
/// a flush.
#[derive(Clone)]
pub struct FailingStore {
    inner: Arc<MemoryNodeStore>,
    fail_batches: Arc<AtomicBool>,
    fail_commits: Arc<AtomicBool>,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryNodeStore>) -> Self {
        Self {
            inner,
            fail_batches: Arc::new(AtomicBool::new(false)),
            fail_commits: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Loses node batches while the status writes still land.
    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    /// Loses consistent status writes, so a flush stops right after its node batch.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl NodeStore for FailingStore {
    fn get(&self, prefix: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(prefix)
    }

    fn write_batch(&self, entries: Vec<(String, Option<Vec<u8>>)>) -> Result<()> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("injected write failure")));
        }
        self.inner.write_batch(entries)
    }

    fn iter(&self, direction: Direction) -> StoreIter<'_> {
        self.inner.iter(direction)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }

    fn get_aux(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get_aux(key)
    }

    fn insert_aux(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst)
            && UtxoTrieStatus::decode(value).is_ok_and(|status| status.is_consistent())
        {
            return Err(Error::Io(std::io::Error::other("injected commit failure")));
        }
        self.inner.insert_aux(key, value)
    }
}
