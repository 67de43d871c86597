// Block header record

use crate::core::{Hash256, hash256};
use crate::error::{Error, Result};

/// Serialized size of a Bitcoin-family block header
pub const HEADER_SIZE: usize = 80;

/// Block header - 80 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Hash of the previous block
    pub prev_block_hash: Hash256,
    /// Merkle root of all transactions in the block
    pub merkle_root: Hash256,
    /// Block timestamp (Unix epoch)
    pub timestamp: u32,
    /// Difficulty target (compact format)
    pub bits: u32,
    /// Nonce for proof-of-work
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_block_hash: Hash256,
        merkle_root: Hash256,
        timestamp: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    /// Calculate the hash of this block header
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// Serialize the block header (always 80 bytes)
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_block_hash.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Deserialize exactly one 80-byte record
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() != HEADER_SIZE {
            return Err(Error::Decode(format!(
                "block header must be {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }

        let u32_at = |offset: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[offset..offset + 4]);
            u32::from_le_bytes(bytes)
        };

        Ok(Self {
            version: u32_at(0),
            prev_block_hash: Hash256::from_slice(&data[4..36])?,
            merkle_root: Hash256::from_slice(&data[36..68])?,
            timestamp: u32_at(68),
            bits: u32_at(72),
            nonce: u32_at(76),
        })
    }

    /// Check if this header builds on `parent`
    pub fn connects_to(&self, parent: &Hash256) -> bool {
        &self.prev_block_hash == parent
    }
}
