//! Wire messages of the Meridian consensus protocol.
//!
//! The network layer moves opaque byte payloads; this crate owns the typed
//! view of those payloads and the conversions in both directions.

pub mod consensus;
pub mod converters;
pub mod protobuf;
