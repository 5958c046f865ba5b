//! Best-effort comparison of local root hashes against other nodes.
//!
//! The catch-up loop pushes a [`CheckEntry`] per applied block onto a bounded queue and
//! moves on; [`ConsistencyAuditor::run`] drains the queue and asks a [`ConsensusOracle`]
//! what root other nodes reported for the same block. Disagreement is logged, it never
//! affects the local trie.

use crate::node::NodeHash;
use crate::{Error, Result};
use bitcoin::BlockHash;

const LOG_TARGET: &str = "utxo-trie::audit";

/// Comparison service queried by default.
pub const DEFAULT_AUDIT_URL: &str = "https://jelectrum-1022.appspot.com/utxo";

/// Root hash of the trie after applying a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckEntry {
    pub height: u32,
    pub block_hash: BlockHash,
    pub utxo_root: NodeHash,
}

/// Answer of a [`ConsensusOracle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditReport {
    /// Not enough reports for this block yet.
    Undetermined,
    /// Root hash agreed on by `matching` of `total` reporting nodes.
    Consensus {
        root: NodeHash,
        matching: u32,
        total: u32,
    },
}

impl AuditReport {
    /// Parses a response line, either `undetermined` or `<root hex>,<matching>,<total>`.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let invalid = |reason: &str| Error::InvalidAuditResponse {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let mut fields = line.split(',');
        let root = fields.next().unwrap_or_default().trim();
        if root == "undetermined" {
            return Ok(Self::Undetermined);
        }

        let root = NodeHash::from_hex(root).map_err(|err| invalid(&err.to_string()))?;
        let mut count = |name: &str| -> Result<u32> {
            fields
                .next()
                .ok_or_else(|| invalid(&format!("missing {name}")))?
                .trim()
                .parse()
                .map_err(|_| invalid(&format!("invalid {name}")))
        };
        let matching = count("matching count")?;
        let total = count("total count")?;

        Ok(Self::Consensus {
            root,
            matching,
            total,
        })
    }
}

/// Source of the root hash other nodes computed for a block.
#[async_trait::async_trait]
pub trait ConsensusOracle: Send + Sync {
    async fn check(&self, entry: &CheckEntry) -> Result<AuditReport>;
}

/// Settings of the HTTP comparison service.
#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub url: String,
    /// Identifies this node in reports.
    pub client_name: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_AUDIT_URL.to_string(),
            client_name: Self::default_client_name(None),
        }
    }
}

impl AuditConfig {
    /// `subcoin_<version>_<advertised host>`, or a random suffix when no host is known.
    pub fn default_client_name(advertise_host: Option<&str>) -> String {
        let suffix = match advertise_host {
            Some(host) => host.to_string(),
            None => fastrand::u32(..).to_string(),
        };
        format!("subcoin_{}_{suffix}", env!("CARGO_PKG_VERSION"))
    }
}

/// [`ConsensusOracle`] querying an HTTP endpoint with
/// `?height=<h>&block=<hash>&utxo=<root>&client=<name>`.
pub struct HttpOracle {
    client: reqwest::Client,
    config: AuditConfig,
}

impl HttpOracle {
    pub fn new(config: AuditConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait::async_trait]
impl ConsensusOracle for HttpOracle {
    async fn check(&self, entry: &CheckEntry) -> Result<AuditReport> {
        let body = self
            .client
            .get(&self.config.url)
            .query(&[
                ("height", entry.height.to_string()),
                ("block", entry.block_hash.to_string()),
                ("utxo", entry.utxo_root.to_string()),
                ("client", self.config.client_name.clone()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        AuditReport::parse(body.lines().next().unwrap_or_default())
    }
}

/// Consumer of the [`CheckEntry`] queue.
pub struct ConsistencyAuditor<O> {
    oracle: O,
    entries: async_channel::Receiver<CheckEntry>,
}

impl<O: ConsensusOracle> ConsistencyAuditor<O> {
    pub fn new(oracle: O, entries: async_channel::Receiver<CheckEntry>) -> Self {
        Self { oracle, entries }
    }

    /// Checks a single entry. Returns whether the local root matches the consensus, `None`
    /// if the oracle could not tell.
    pub async fn audit(&self, entry: &CheckEntry) -> Result<Option<bool>> {
        let report = self.oracle.check(entry).await?;

        let CheckEntry {
            height, utxo_root, ..
        } = *entry;

        match report {
            AuditReport::Undetermined => {
                tracing::info!(target: LOG_TARGET, "UTXO check at #{height}: undetermined");
                Ok(None)
            }
            AuditReport::Consensus {
                root,
                matching,
                total,
            } if root == utxo_root => {
                tracing::info!(
                    target: LOG_TARGET,
                    "UTXO check at #{height}: {root}, matching {matching} of {total}"
                );
                Ok(Some(true))
            }
            AuditReport::Consensus {
                root,
                matching,
                total,
            } => {
                tracing::error!(
                    target: LOG_TARGET,
                    "UTXO check mismatch at #{height}: local {utxo_root}, others {root}, agreement {matching} of {total}"
                );
                Ok(Some(false))
            }
        }
    }

    /// Run [`ConsistencyAuditor`] until the queue is closed.
    pub async fn run(self) {
        while let Ok(entry) = self.entries.recv().await {
            if let Err(err) = self.audit(&entry).await {
                tracing::warn!(
                    target: LOG_TARGET,
                    "UTXO check at #{} failed: {err}",
                    entry.height
                );
            }
        }
        tracing::debug!(target: LOG_TARGET, "UTXO check queue closed");
    }
}
