//! Mapping of output scripts to account keys.

use crate::key::AccountKey;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160, OP_NOP, OP_PUSHBYTES_20};
use bitcoin::Script;

/// Resolves the account owning an output.
///
/// Outputs whose script cannot be resolved do not take part in the commitment.
pub trait AccountResolver: Send + Sync {
    fn resolve(&self, script_pubkey: &Script) -> Option<AccountKey>;
}

/// Resolves the standard legacy output forms:
///
/// - P2PKH: the pubkey hash.
/// - P2SH: the script hash.
/// - P2PK: HASH160 of the public key.
/// - `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG OP_NOP`: the pushed hash.
///
/// Anything else, witness programs included, is unresolvable.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardResolver;

impl AccountResolver for StandardResolver {
    fn resolve(&self, script_pubkey: &Script) -> Option<AccountKey> {
        let bytes = script_pubkey.as_bytes();

        if script_pubkey.is_p2pkh() {
            return AccountKey::from_slice(&bytes[3..23]);
        }

        if script_pubkey.is_p2sh() {
            return AccountKey::from_slice(&bytes[2..22]);
        }

        if script_pubkey.is_p2pk() {
            // <push> <pubkey> OP_CHECKSIG
            let pubkey = &bytes[1..bytes.len() - 1];
            return Some(AccountKey::from_byte_array(
                hash160::Hash::hash(pubkey).to_byte_array(),
            ));
        }

        if is_p2pkh_with_nop(bytes) {
            return AccountKey::from_slice(&bytes[3..23]);
        }

        None
    }
}

/// P2PKH followed by a trailing `OP_NOP`, seen in a handful of early outputs.
fn is_p2pkh_with_nop(bytes: &[u8]) -> bool {
    bytes.len() == 26
        && bytes[0] == OP_DUP.to_u8()
        && bytes[1] == OP_HASH160.to_u8()
        && bytes[2] == OP_PUSHBYTES_20.to_u8()
        && bytes[23] == OP_EQUALVERIFY.to_u8()
        && bytes[24] == OP_CHECKSIG.to_u8()
        && bytes[25] == OP_NOP.to_u8()
}
