//! Block identifiers and the minimal block representation consensus moves
//! around. Execution and full block semantics live outside this crate; here a
//! block body is an opaque byte payload.

use std::fmt;
use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::crypto::Address;
use crate::MeridianApiError;

#[cfg(test)]
#[path = "block_test.rs"]
mod block_test;

/// The height of a block in the chain.
#[derive(
    Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, PartialOrd, Ord,
)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// Returns the next block number, without checking for overflow.
    pub fn unchecked_next(&self) -> BlockNumber {
        BlockNumber(self.0 + 1)
    }

    /// Returns the previous block number, or None when called on genesis.
    pub fn prev(&self) -> Option<BlockNumber> {
        self.0.checked_sub(1).map(BlockNumber)
    }
}

impl Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Keccak-256 digest of a block's content. This is what validators vote on.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BlockDigest(pub [u8; 32]);

impl BlockDigest {
    pub const ZERO: BlockDigest = BlockDigest([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for BlockDigest {
    type Error = MeridianApiError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| MeridianApiError::InvalidByteLength {
            type_name: "BlockDigest",
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(BlockDigest(arr))
    }
}

impl Display for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for BlockDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for BlockDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(stripped).map_err(serde::de::Error::custom)?;
        BlockDigest::try_from(bytes.as_slice()).map_err(serde::de::Error::custom)
    }
}

/// The part of a block header consensus needs to reason about. Everything else
/// (state roots, receipts, gas accounting) belongs to the execution layer.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct BlockHeader {
    pub number: BlockNumber,
    pub parent_digest: BlockDigest,
    pub timestamp: u64,
    pub proposer: Address,
}

/// A candidate block: the header consensus reads plus an opaque body produced
/// and interpreted by the execution layer.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: Vec<u8>,
}

impl Block {
    /// The content digest of this block.
    pub fn digest(&self) -> BlockDigest {
        let mut hasher = Keccak256::new();
        hasher.update(self.header.number.0.to_be_bytes());
        hasher.update(self.header.parent_digest.as_bytes());
        hasher.update(self.header.timestamp.to_be_bytes());
        hasher.update(self.header.proposer.as_bytes());
        hasher.update(&self.body);
        BlockDigest(hasher.finalize().into())
    }
}
