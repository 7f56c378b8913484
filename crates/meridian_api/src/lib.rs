//! Base types of the Meridian chain, shared by consensus and the surrounding
//! node: block numbers, content digests, validator addresses and signatures.

pub mod block;
pub mod crypto;

/// A spot for error codes so all crates agree on what went wrong with a base
/// type conversion.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum MeridianApiError {
    /// A byte string had the wrong length for the target fixed-size type.
    #[error("expected {expected} bytes for {type_name}, got {actual}")]
    InvalidByteLength { type_name: &'static str, expected: usize, actual: usize },
}
