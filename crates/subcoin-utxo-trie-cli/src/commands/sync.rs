use crate::cli::params::{CommonParams, TrieParams};
use crate::cli::{Error, Result};
use crate::rpc_client::{default_api_url, BlockstreamClient, RemoteChain};
use std::sync::Arc;
use subcoin_utxo_trie::{
    AuditConfig, ConsistencyAuditor, HttpOracle, UtxoTrieMgr, DEFAULT_AUDIT_URL,
};

const LOG_TARGET: &str = "utxo-trie::sync";

#[derive(Debug, Clone, clap::Parser)]
pub struct Sync {
    #[allow(missing_docs)]
    #[clap(flatten)]
    pub trie_params: TrieParams,

    /// Block explorer API. Defaults to Blockstream for the selected network.
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Do not compare the roots of new blocks against other nodes.
    #[arg(long)]
    pub disable_audit: bool,

    /// Endpoint of the root comparison service.
    #[arg(long, value_name = "URL", default_value = DEFAULT_AUDIT_URL)]
    pub audit_url: String,

    /// Host name identifying this node in root comparison reports.
    #[arg(long, value_name = "HOST")]
    pub advertise_host: Option<String>,

    /// Number of transactions kept in memory to resolve spent outputs.
    #[arg(long, value_name = "SIZE", default_value_t = 20_000)]
    pub tx_cache_size: u32,
}

impl Sync {
    pub fn run(self, common_params: &CommonParams) -> Result<()> {
        let network = common_params.bitcoin_network();
        let api_url = self
            .api_url
            .or_else(|| default_api_url(network))
            .ok_or_else(|| Error::Input(format!("No default explorer for {network}, use --api-url")))?;

        let config = self.trie_params.config(network);
        let mgr = Arc::new(UtxoTrieMgr::new(common_params.open_store()?, config)?);

        let runtime = tokio::runtime::Runtime::new()?;
        let chain = RemoteChain::new(
            BlockstreamClient::new(api_url),
            runtime.handle().clone(),
            self.tx_cache_size,
        );

        let Some(handle) = mgr.start(chain)? else {
            return Err(Error::Application("UTXO trie is disabled".to_string()));
        };

        if !self.disable_audit {
            let audit_config = AuditConfig {
                url: self.audit_url,
                client_name: AuditConfig::default_client_name(self.advertise_host.as_deref()),
            };
            tracing::info!(
                target: LOG_TARGET,
                "Comparing UTXO roots as {}",
                audit_config.client_name
            );
            let auditor = ConsistencyAuditor::new(HttpOracle::new(audit_config), mgr.audit_entries());
            runtime.spawn(auditor.run());
        }

        runtime.block_on(tokio::signal::ctrl_c())?;

        tracing::info!(target: LOG_TARGET, "Stopping UTXO trie sync");
        mgr.stop();

        handle
            .join()
            .map_err(|_| Error::Application("UTXO trie catch-up thread panicked".to_string()))?;

        if let Some(block_hash) = mgr.last_added() {
            tracing::info!(
                target: LOG_TARGET,
                "UTXO trie at {block_hash}, root hash {}",
                mgr.get_root_hash(None)?
            );
        }

        Ok(())
    }
}
