use crate::cli::params::CommonParams;
use crate::cli::{Error, Result};
use crate::rpc_client::{default_api_url, BlockstreamClient};
use subcoin_utxo_trie::{AccountResolver, StandardResolver};

#[derive(Debug, clap::Parser)]
pub struct InspectBlock {
    /// Height of the block on the explorer's best chain.
    #[arg(index = 1)]
    height: u32,

    /// Block explorer API. Defaults to Blockstream for the selected network.
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,
}

impl InspectBlock {
    pub fn run(self, common_params: &CommonParams) -> Result<()> {
        let network = common_params.bitcoin_network();
        let api_url = self
            .api_url
            .or_else(|| default_api_url(network))
            .ok_or_else(|| Error::Input(format!("No default explorer for {network}, use --api-url")))?;

        let client = BlockstreamClient::new(api_url);
        let runtime = tokio::runtime::Runtime::new()?;
        let block = runtime.block_on(client.get_block_by_height(self.height))?;

        let resolver = StandardResolver;
        let mut num_outputs = 0;
        let mut num_unresolved = 0;

        for (i, tx) in block.txdata.iter().enumerate() {
            for (j, output) in tx.output.iter().enumerate() {
                num_outputs += 1;
                match resolver.resolve(&output.script_pubkey) {
                    Some(account) => println!("{i}:{j}: {account}"),
                    None => {
                        num_unresolved += 1;
                        println!("{i}:{j}: None");
                    }
                }
            }
        }

        println!(
            "Block #{} {}: {} transactions, {num_outputs} outputs, {num_unresolved} without account",
            self.height,
            block.block_hash(),
            block.txdata.len()
        );

        Ok(())
    }
}
