//! Conversions between the domain types in [`crate::consensus`] and the wire
//! structs in [`crate::protobuf`].

use prost::DecodeError;

mod consensus;

/// Errors while converting a wire struct into its domain counterpart.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProtobufConversionError {
    #[error("Missing field `{field_description}`")]
    MissingField { field_description: &'static str },
    #[error("Type `{type_description}` should be {num_expected} bytes but it got {value:?}.")]
    BytesDataLengthMismatch { type_description: &'static str, num_expected: usize, value: Vec<u8> },
    #[error(transparent)]
    DecodeError(#[from] DecodeError),
}

/// Decode failure of a whole inbound message, tagged with the message kind
/// that failed so callers can log precisely which wire shape was malformed.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MessageDecodeError {
    #[error("invalid message")]
    InvalidEnvelope(#[source] ProtobufConversionError),
    #[error("failed to decode PRE-PREPARE")]
    PrePrepare(#[source] ProtobufConversionError),
    #[error("failed to decode PREPARE")]
    Prepare(#[source] ProtobufConversionError),
    #[error("failed to decode COMMIT")]
    Commit(#[source] ProtobufConversionError),
    #[error("failed to decode ROUND-CHANGE")]
    RoundChange(#[source] ProtobufConversionError),
    #[error("failed to decode piggyback messages")]
    PiggybackMessages(#[source] ProtobufConversionError),
}
