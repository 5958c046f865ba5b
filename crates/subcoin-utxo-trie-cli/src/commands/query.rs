use crate::cli::params::CommonParams;
use crate::cli::{Error, Result};
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, BlockHash};
use subcoin_utxo_trie::{UtxoTrie, UtxoTrieConfig, UtxoTrieMgr};

#[derive(Debug, clap::Subcommand)]
pub enum Query {
    /// Print the root hash of the trie.
    ///
    /// Only the current tip is known after a restart, other blocks yield the all-zero hash.
    Root {
        /// Block whose root hash is requested. Defaults to the current tip.
        #[arg(long)]
        block: Option<BlockHash>,
    },

    /// List the unspent outputs of an address.
    Unspent {
        #[arg(index = 1)]
        address: String,
    },

    /// Print the durable status record.
    Status,
}

impl Query {
    pub fn run(self, common_params: &CommonParams) -> Result<()> {
        let network = common_params.bitcoin_network();

        match self {
            Self::Root { block } => {
                let mgr = open_mgr(common_params)?;
                let root = mgr.get_root_hash(block)?;
                match block.or(mgr.last_added()) {
                    Some(block_hash) => println!("{block_hash}: {root}"),
                    None => println!("{root}"),
                }
            }
            Self::Unspent { address } => {
                let address = address
                    .parse::<Address<NetworkUnchecked>>()
                    .map_err(|err| Error::Input(format!("Invalid address {address}: {err}")))?
                    .require_network(network)
                    .map_err(|err| Error::Input(err.to_string()))?;

                let mgr = open_mgr(common_params)?;
                let unspent = mgr.get_unspent_for_address(&address)?;
                for outpoint in &unspent {
                    println!("{outpoint}");
                }
                println!("{} unspent outputs for {address}", unspent.len());
            }
            Self::Status => {
                let trie = UtxoTrie::new(common_params.open_store()?);
                match trie.read_status()? {
                    Some(status) if status.is_consistent() => {
                        println!("Consistent at block {}", status.block_hash);
                    }
                    Some(status) => {
                        println!(
                            "Interrupted flush: flushed at {}, added up to {}",
                            status.flushed_block_hash(),
                            status.block_hash
                        );
                    }
                    None => println!("No UTXO trie status found"),
                }
            }
        }

        Ok(())
    }
}

fn open_mgr(common_params: &CommonParams) -> Result<UtxoTrieMgr<subcoin_utxo_trie::RocksDbNodeStore>> {
    let config = UtxoTrieConfig {
        prefetch_threads: 1,
        ..UtxoTrieConfig::new(common_params.bitcoin_network())
    };
    Ok(UtxoTrieMgr::new(common_params.open_store()?, config)?)
}
