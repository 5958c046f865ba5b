use bitcoin::block::Header;
use bitcoin::consensus::Decodable;
use bitcoin::{Block, BlockHash, Network, OutPoint, Transaction, TxOut, Txid};
use parking_lot::Mutex;
use reqwest::Client;
use schnellru::{ByLength, LruMap};
use serde::Deserialize;
use subcoin_utxo_trie::{ChainSource, PrevoutProvider};
use thiserror::Error;
use tokio::runtime::Handle;

const BLOCKSTREAM_API_URL: &str = "https://blockstream.info/api";

const LOG_TARGET: &str = "utxo-trie::rpc";

/// Default explorer API of `network`.
pub fn default_api_url(network: Network) -> Option<String> {
    match network {
        Network::Bitcoin => Some(BLOCKSTREAM_API_URL.to_string()),
        Network::Testnet => Some(format!("{BLOCKSTREAM_API_URL}/testnet")),
        Network::Signet => Some(format!("{BLOCKSTREAM_API_URL}/signet")),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid block hash")]
    InvalidBlockHash,
    #[error("Invalid block number")]
    InvalidBlockNumber,
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("HTTP request failed: {0}")]
    HttpRequestError(#[from] reqwest::Error),
    #[error(transparent)]
    BitcoinIO(#[from] bitcoin::io::Error),
    #[error(transparent)]
    BitcoinEncode(#[from] bitcoin::consensus::encode::Error),
}

/// Confirmation status of a block.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockStatus {
    pub in_best_chain: bool,
    pub height: Option<u32>,
    pub next_best: Option<BlockHash>,
}

/// Summary of a block, available for stale blocks as well.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockInfo {
    pub id: BlockHash,
    pub height: u32,
    pub previousblockhash: Option<BlockHash>,
}

/// Client for interacting with the Blockstream API.
pub struct BlockstreamClient {
    client: Client,
    base_url: String,
}

impl BlockstreamClient {
    /// Create a new instance of [`BlockstreamClient`] talking to `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn get_text(&self, path: &str) -> Result<String, ApiError> {
        let url = format!("{}{path}", self.base_url);
        Ok(self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }

    async fn get_raw(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let bytes = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    /// Fetch the height of the latest block.
    pub async fn get_tip_height(&self) -> Result<u32, ApiError> {
        let height = self.get_text("/blocks/tip/height").await?;
        height.trim().parse().map_err(|_| ApiError::InvalidBlockNumber)
    }

    /// Fetch the hash of the latest block (tip hash).
    pub async fn get_tip_hash(&self) -> Result<BlockHash, ApiError> {
        let hash = self.get_text("/blocks/tip/hash").await?;
        hash.trim().parse().map_err(|_| ApiError::InvalidBlockHash)
    }

    /// Fetch hash of the block specified by the height.
    pub async fn get_block_hash(&self, height: u32) -> Result<BlockHash, ApiError> {
        let hash = self.get_text(&format!("/block-height/{height}")).await?;
        hash.trim().parse().map_err(|_| ApiError::InvalidBlockHash)
    }

    /// Fetch block by its height.
    pub async fn get_block_by_height(&self, height: u32) -> Result<Block, ApiError> {
        let hash = self.get_block_hash(height).await?;
        self.get_block(hash).await
    }

    /// Fetch block by its hash.
    pub async fn get_block(&self, hash: BlockHash) -> Result<Block, ApiError> {
        let raw_block = self.get_raw(&format!("/block/{hash}/raw")).await?;
        let block = Block::consensus_decode(&mut raw_block.as_slice())?;
        Ok(block)
    }

    /// Fetch the header of a block.
    pub async fn get_block_header(&self, hash: BlockHash) -> Result<Header, ApiError> {
        let header_hex = self.get_text(&format!("/block/{hash}/header")).await?;
        let raw_header = hex::decode(header_hex.trim())?;
        Ok(Header::consensus_decode(&mut raw_header.as_slice())?)
    }

    /// Fetch the summary of a block.
    pub async fn get_block_info(&self, hash: BlockHash) -> Result<BlockInfo, ApiError> {
        let url = format!("{}/block/{hash}", self.base_url);
        Ok(self.client.get(&url).send().await?.error_for_status()?.json().await?)
    }

    /// Fetch the confirmation status of a block.
    pub async fn get_block_status(&self, hash: BlockHash) -> Result<BlockStatus, ApiError> {
        let url = format!("{}/block/{hash}/status", self.base_url);
        Ok(self.client.get(&url).send().await?.error_for_status()?.json().await?)
    }

    /// Fetch a transaction by its id.
    pub async fn get_transaction(&self, txid: Txid) -> Result<Transaction, ApiError> {
        let raw_tx = self.get_raw(&format!("/tx/{txid}/raw")).await?;
        Ok(Transaction::consensus_decode(&mut raw_tx.as_slice())?)
    }
}

/// Blocking [`ChainSource`] on top of a [`BlockstreamClient`].
///
/// Must be used outside of the tokio runtime driving the requests, the catch-up thread in
/// particular. Failed requests read as missing data, which the catch-up loop retries.
pub struct RemoteChain {
    client: BlockstreamClient,
    runtime: Handle,
    transactions: Mutex<LruMap<Txid, Transaction, ByLength>>,
}

impl RemoteChain {
    pub fn new(client: BlockstreamClient, runtime: Handle, tx_cache_size: u32) -> Self {
        Self {
            client,
            runtime,
            transactions: Mutex::new(LruMap::new(ByLength::new(tx_cache_size.max(1)))),
        }
    }

    fn request<T>(&self, what: &str, fut: impl Future<Output = Result<T, ApiError>>) -> Option<T> {
        match self.runtime.block_on(fut) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(target: LOG_TARGET, "Failed to fetch {what}: {err}");
                None
            }
        }
    }

    fn transaction(&self, txid: Txid) -> Option<Transaction> {
        if let Some(tx) = self.transactions.lock().get(&txid) {
            return Some(tx.clone());
        }
        let tx = self.request("transaction", self.client.get_transaction(txid))?;
        self.transactions.lock().insert(txid, tx.clone());
        Some(tx)
    }
}

impl PrevoutProvider for RemoteChain {
    fn prev_output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        self.transaction(outpoint.txid)?
            .output
            .get(outpoint.vout as usize)
            .cloned()
    }
}

impl ChainSource for RemoteChain {
    fn best_hash(&self) -> Option<BlockHash> {
        self.request("tip hash", self.client.get_tip_hash())
    }

    fn block_number(&self, block_hash: BlockHash) -> Option<u32> {
        self.request("block info", self.client.get_block_info(block_hash))
            .map(|info| info.height)
    }

    fn block_hash(&self, block_number: u32) -> Option<BlockHash> {
        self.request("block hash", self.client.get_block_hash(block_number))
    }

    fn is_on_main_chain(&self, block_hash: BlockHash) -> bool {
        // An unreachable explorer must not trigger rollbacks.
        self.request("block status", self.client.get_block_status(block_hash))
            .is_none_or(|status| status.in_best_chain)
    }

    fn block_header(&self, block_hash: BlockHash) -> Option<Header> {
        self.request("block header", self.client.get_block_header(block_hash))
    }

    fn block(&self, block_hash: BlockHash) -> Option<Block> {
        let block = self.request("block", self.client.get_block(block_hash))?;

        // Outputs of recent blocks are the most likely to be spent next.
        let mut transactions = self.transactions.lock();
        for tx in &block.txdata {
            transactions.insert(tx.compute_txid(), tx.clone());
        }

        Some(block)
    }
}
