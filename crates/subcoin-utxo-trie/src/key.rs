//! UTXO keys and hex prefix arithmetic.
//!
//! A key is the lowercase hex text of 56 bytes:
//!
//! ```text
//! account (20 bytes) || txid (32 bytes, display order) || vout (4 bytes, little-endian)
//! ```
//!
//! Keys and node prefixes are handled as text so that ordering and prefix tests are plain
//! string operations. Prefixes are always byte aligned (even length).

use crate::{Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, PubkeyHash, ScriptHash, Txid};
use std::fmt;

/// Size of a UTXO key in bytes.
pub const KEY_SIZE: usize = 56;

/// Length of a UTXO key in hex characters.
pub const KEY_HEX_LEN: usize = KEY_SIZE * 2;

const ACCOUNT_SIZE: usize = 20;
const TXID_END: usize = ACCOUNT_SIZE + 32;

/// Account portion of a UTXO key, the HASH160 identifying the owner of an output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey([u8; ACCOUNT_SIZE]);

impl AccountKey {
    /// Constructs an account key from raw bytes.
    pub const fn from_byte_array(bytes: [u8; ACCOUNT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Constructs an account key from a 20 byte slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_SIZE] {
        &self.0
    }

    /// Returns the trie prefix covering every output owned by this account.
    pub fn to_prefix(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<PubkeyHash> for AccountKey {
    fn from(hash: PubkeyHash) -> Self {
        Self(hash.to_byte_array())
    }
}

impl From<ScriptHash> for AccountKey {
    fn from(hash: ScriptHash) -> Self {
        Self(hash.to_byte_array())
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKey({self})")
    }
}

/// Identity of one unspent output within the trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtxoKey {
    /// Owner of the output.
    pub account: AccountKey,
    /// The output itself.
    pub outpoint: OutPoint,
}

impl UtxoKey {
    /// Creates a new [`UtxoKey`].
    pub fn new(account: AccountKey, outpoint: OutPoint) -> Self {
        Self { account, outpoint }
    }

    /// Encodes the key as the 112 character trie text.
    pub fn encode(&self) -> String {
        let mut key = String::with_capacity(KEY_HEX_LEN);
        key.push_str(&hex::encode(self.account.0));
        key.push_str(&self.outpoint.txid.to_string());
        key.push_str(&hex::encode(self.outpoint.vout.to_le_bytes()));
        key
    }

    /// Decodes trie text back into a [`UtxoKey`].
    pub fn decode(key: &str) -> Result<Self> {
        if key.len() != KEY_HEX_LEN {
            return Err(Error::InvalidKey {
                key: key.to_string(),
                reason: "UTXO key must be 112 hex characters",
            });
        }
        validate_prefix(key)?;

        let bytes = hex::decode(key)?;

        let mut account = [0u8; ACCOUNT_SIZE];
        account.copy_from_slice(&bytes[..ACCOUNT_SIZE]);

        // The key carries the txid in display order.
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&bytes[ACCOUNT_SIZE..TXID_END]);
        txid.reverse();

        let mut vout = [0u8; 4];
        vout.copy_from_slice(&bytes[TXID_END..KEY_SIZE]);

        Ok(Self {
            account: AccountKey(account),
            outpoint: OutPoint {
                txid: Txid::from_byte_array(txid),
                vout: u32::from_le_bytes(vout),
            },
        })
    }

    /// Returns the txid embedded in an encoded key without decoding the rest.
    pub fn txid_of(key: &str) -> Result<Txid> {
        Self::decode(key).map(|key| key.outpoint.txid)
    }
}

impl fmt::Display for UtxoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Checks that `prefix` is byte aligned lowercase hex no longer than a full key.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let invalid = |reason| Error::InvalidKey {
        key: prefix.to_string(),
        reason,
    };

    if prefix.len() % 2 != 0 {
        return Err(invalid("prefix must be byte aligned"));
    }
    if prefix.len() > KEY_HEX_LEN {
        return Err(invalid("prefix longer than a UTXO key"));
    }
    if !prefix
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(invalid("prefix must be lowercase hex"));
    }

    Ok(())
}

/// Returns the length of the longest common prefix of `a` and `b`, rounded down to an even
/// number of characters so that a split never happens inside a byte.
pub fn common_prefix_len(a: &str, b: &str) -> usize {
    let same = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    same - same % 2
}

/// Returns whether `prefix` denotes a leaf, i.e. a full key.
pub(crate) fn is_leaf_prefix(prefix: &str) -> bool {
    prefix.len() == KEY_HEX_LEN
}
