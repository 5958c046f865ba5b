use crate::Result;
use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};

/// Aux key of the durable status record.
pub(crate) const STATUS_KEY: &[u8] = b"utxo_trie_mgr_state";

/// Durable record of which blocks the stored trie reflects.
///
/// `block_hash` is the last block applied. `prev_block_hash` is the last block whose nodes
/// are known to be fully persisted; it is only present while a flush is in progress, so a
/// record found with differing hashes after a restart marks an interrupted flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoTrieStatus {
    pub block_hash: BlockHash,
    pub prev_block_hash: Option<BlockHash>,
}

impl UtxoTrieStatus {
    /// Status of a fully persisted trie at `block_hash`.
    pub fn consistent(block_hash: BlockHash) -> Self {
        Self {
            block_hash,
            prev_block_hash: None,
        }
    }

    /// Status written before persisting the nodes of `(flushed, added]`.
    pub fn in_flight(added: BlockHash, flushed: BlockHash) -> Self {
        Self {
            block_hash: added,
            prev_block_hash: Some(flushed),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.prev_block_hash.is_none_or(|prev| prev == self.block_hash)
    }

    /// Last block whose nodes are fully persisted.
    pub fn flushed_block_hash(&self) -> BlockHash {
        self.prev_block_hash.unwrap_or(self.block_hash)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_status_consistency() {
        let a = BlockHash::from_byte_array([1u8; 32]);
        let b = BlockHash::from_byte_array([2u8; 32]);

        assert!(UtxoTrieStatus::consistent(a).is_consistent());
        assert!(UtxoTrieStatus::in_flight(a, a).is_consistent());

        let status = UtxoTrieStatus::in_flight(b, a);
        assert!(!status.is_consistent());
        assert_eq!(status.flushed_block_hash(), a);
        assert_eq!(UtxoTrieStatus::decode(&status.encode().unwrap()).unwrap(), status);
    }

    #[test]
    fn test_corrupt_status_is_an_error() {
        assert!(UtxoTrieStatus::decode(&[1, 2, 3]).is_err());
    }
}
