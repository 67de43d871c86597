// Output scripts and Electrum script hashes

use crate::core::sha256_hash;
use crate::error::{Error, Result};
use std::fmt;

/// Opcodes used by the standard output templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Duplicate the top stack item
    OpDup = 0x76,
    /// Hash the top stack item with HASH160
    OpHash160 = 0xa9,
    /// Push 20 bytes (pubkey or script hash size)
    OpPushBytes20 = 0x14,
    /// Check equality
    OpEqual = 0x87,
    /// Verify that the top two items are equal
    OpEqualVerify = 0x88,
    /// Check signature
    OpCheckSig = 0xac,
}

/// Script builder
pub struct Script;

impl Script {
    /// OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG
    pub fn p2pkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
        let mut script = Vec::with_capacity(25);
        script.push(OpCode::OpDup as u8);
        script.push(OpCode::OpHash160 as u8);
        script.push(OpCode::OpPushBytes20 as u8);
        script.extend_from_slice(pubkey_hash);
        script.push(OpCode::OpEqualVerify as u8);
        script.push(OpCode::OpCheckSig as u8);
        script
    }

    /// OP_HASH160 <scriptHash> OP_EQUAL
    pub fn p2sh_script_pubkey(script_hash: &[u8; 20]) -> Vec<u8> {
        let mut script = Vec::with_capacity(23);
        script.push(OpCode::OpHash160 as u8);
        script.push(OpCode::OpPushBytes20 as u8);
        script.extend_from_slice(script_hash);
        script.push(OpCode::OpEqual as u8);
        script
    }
}

/// Electrum script hash: SHA256 of the output script, shown byte-reversed.
/// This is the query and subscription key for all `blockchain.scripthash.*` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptHash([u8; 32]);

impl ScriptHash {
    pub fn from_script(script_pubkey: &[u8]) -> Self {
        Self(sha256_hash(script_pubkey))
    }

    /// Parse the 64-character wire form
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes: [u8; 32] = hex::decode(s)?
            .try_into()
            .map_err(|_| Error::Decode(format!("script hash must be 32 bytes: {}", s)))?;
        bytes.reverse();
        Ok(Self(bytes))
    }

    /// Wire form used in requests and notifications
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
