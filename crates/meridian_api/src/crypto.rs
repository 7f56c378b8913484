//! Validator identities and signatures. Key management and the actual
//! signature scheme are owned by the node's signing component; consensus only
//! carries these values around and compares them.

use std::fmt;
use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::MeridianApiError;

/// A validator's address, derived from its public key.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = MeridianApiError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| MeridianApiError::InvalidByteLength {
            type_name: "Address",
            expected: 20,
            actual: bytes.len(),
        })?;
        Ok(Address(arr))
    }
}

// Test fixtures index validators by small integers.
impl From<u64> for Address {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Address(bytes)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(stripped).map_err(serde::de::Error::custom)?;
        Address::try_from(bytes.as_slice()).map_err(serde::de::Error::custom)
    }
}

/// An opaque signature over a consensus payload. The signing component knows
/// the scheme; consensus treats it as bytes.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct RawSignature(pub Vec<u8>);
