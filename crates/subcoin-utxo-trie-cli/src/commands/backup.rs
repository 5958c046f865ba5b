use crate::cli::params::CommonParams;
use crate::cli::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::time::Instant;
use subcoin_utxo_trie::UtxoTrie;

#[derive(Debug, clap::Subcommand)]
pub enum Backup {
    /// Export the trie to a backup file.
    ///
    /// The trie must not be in the middle of a flush.
    Dump {
        #[arg(index = 1, value_name = "PATH")]
        path: PathBuf,
    },

    /// Replace the trie with the content of a backup file.
    Load {
        #[arg(index = 1, value_name = "PATH")]
        path: PathBuf,
    },

    /// Wipe the trie and start over from the genesis block.
    Reset,

    /// Check the structure and every hash of the stored trie.
    Verify {
        /// Print the whole tree.
        #[arg(long)]
        print: bool,
    },
}

impl Backup {
    pub fn run(self, common_params: &CommonParams) -> Result<()> {
        let mut trie = UtxoTrie::new(common_params.open_store()?);
        let now = Instant::now();

        match self {
            Self::Dump { path } => {
                let mut out = BufWriter::new(File::create(&path)?);
                let block_hash = trie.dump(&mut out)?;
                println!(
                    "Dumped UTXO trie at block {block_hash} to {} in {}ms",
                    path.display(),
                    now.elapsed().as_millis()
                );
            }
            Self::Load { path } => {
                let mut input = BufReader::new(File::open(&path)?);
                let block_hash = trie.load(&mut input)?;
                println!(
                    "Loaded UTXO trie at block {block_hash}, root hash {}, in {}ms",
                    trie.root_hash()?,
                    now.elapsed().as_millis()
                );
            }
            Self::Reset => {
                let status = trie.reset_everything(common_params.bitcoin_network())?;
                println!("UTXO trie reset to block {}", status.block_hash);
            }
            Self::Verify { print } => {
                if print {
                    trie.print_tree(&mut std::io::stdout().lock())?;
                }

                let report = trie.verify_store()?;
                for issue in &report.issues {
                    println!("{issue}");
                }
                println!(
                    "Checked {} nodes, {} unspent outputs, root hash {}",
                    report.nodes,
                    report.leaves,
                    trie.root_hash()?
                );

                if !report.is_ok() {
                    return Err(Error::Application(format!(
                        "UTXO trie has {} issues",
                        report.issues.len()
                    )));
                }
            }
        }

        Ok(())
    }
}
