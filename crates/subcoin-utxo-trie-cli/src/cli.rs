pub mod params;

use crate::commands::backup::Backup;
use crate::commands::inspect_block::InspectBlock;
use crate::commands::query::Query;
use crate::commands::sync::Sync;
use crate::rpc_client::ApiError;
use clap::Parser;
use params::CommonParams;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Trie(#[from] subcoin_utxo_trie::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("{0}")]
    Application(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Query the trie.
    #[command(flatten)]
    Query(Query),

    /// Backup and maintenance.
    #[command(flatten)]
    Backup(Backup),

    /// Print the account key of every output of a block.
    InspectBlock(InspectBlock),

    /// Follow the chain of a block explorer and keep the trie at its tip.
    Sync(Sync),
}

#[derive(Debug, Parser)]
#[command(name = "utxo-trie", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub common_params: CommonParams,
}

/// Parse and run command line arguments
pub fn run() -> Result<()> {
    let Cli {
        command,
        common_params,
    } = Cli::parse();

    common_params.init_logging()?;

    match command {
        Command::Query(query) => query.run(&common_params),
        Command::Backup(backup) => backup.run(&common_params),
        Command::InspectBlock(cmd) => cmd.run(&common_params),
        Command::Sync(cmd) => cmd.run(&common_params),
    }
}
