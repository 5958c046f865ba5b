use crate::cli::{Error, Result};
use clap::Parser;
use std::path::PathBuf;
use subcoin_utxo_trie::{RocksDbNodeStore, UtxoTrieConfig};
use tracing_subscriber::EnvFilter;

/// Bitcoin network type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Network {
    /// Mainnet.
    Mainnet,
    /// Testnet.
    Testnet,
    /// Signet.
    Signet,
    /// Regtest.
    Regtest,
}

impl From<Network> for bitcoin::Network {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct CommonParams {
    /// Specify the chain network.
    #[arg(long, global = true, value_name = "NETWORK", default_value = "mainnet")]
    pub network: Network,

    /// Specify custom base path.
    #[arg(long, short = 'd', global = true, value_name = "PATH", default_value = "utxo-trie-data")]
    pub base_path: PathBuf,

    /// Sets a custom logging filter (syntax: `<target>=<level>`).
    ///
    /// Log levels (least to most verbose) are `error`, `warn`, `info`, `debug`, and `trace`.
    ///
    /// By default, all targets log `info`. The global log level can be set with `-l<level>`.
    ///
    /// Multiple `<target>=<level>` entries can be specified and separated by a comma.
    ///
    /// *Example*: `--log warn,utxo-trie::catchup=debug`.
    #[arg(short = 'l', long, global = true, value_name = "LOG_PATTERN", num_args = 1..)]
    pub log: Vec<String>,
}

impl CommonParams {
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        self.network.into()
    }

    /// Directory of the node store of the selected network.
    pub fn db_path(&self) -> PathBuf {
        self.base_path
            .join(self.bitcoin_network().to_string())
            .join("utxo-trie")
    }

    pub fn open_store(&self) -> Result<RocksDbNodeStore> {
        let path = self.db_path();
        std::fs::create_dir_all(&path)?;
        Ok(RocksDbNodeStore::open(&path)?)
    }

    /// Installs the global tracing subscriber.
    pub fn init_logging(&self) -> Result<()> {
        let directives = if self.log.is_empty() {
            "info".to_string()
        } else {
            self.log.join(",")
        };

        let filter = EnvFilter::builder()
            .parse(&directives)
            .map_err(|err| Error::Input(format!("Invalid log pattern {directives:?}: {err}")))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| Error::Input(format!("Failed to initialize logging: {err}")))
    }
}

#[derive(Debug, Clone, Parser)]
pub struct TrieParams {
    /// Number of threads loading trie nodes ahead of each block.
    #[arg(long, value_name = "COUNT", default_value_t = 12)]
    pub prefetch_threads: usize,

    /// Wipe the trie and start over from the genesis block.
    #[arg(long)]
    pub reset: bool,
}

impl TrieParams {
    pub fn config(&self, network: bitcoin::Network) -> UtxoTrieConfig {
        UtxoTrieConfig {
            prefetch_threads: self.prefetch_threads,
            reset: self.reset,
            ..UtxoTrieConfig::new(network)
        }
    }
}
