//! Prost structs for the wire format in `proto/consensus.proto`.
//!
//! Maintained by hand (instead of a protoc build step) so the crate builds
//! without a protobuf toolchain; field numbers and shapes must match the
//! `.proto` file.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct View {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(uint32, tag = "2")]
    pub round: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Subject {
    #[prost(message, optional, tag = "1")]
    pub view: ::core::option::Option<View>,
    #[prost(bytes = "vec", tag = "2")]
    pub digest: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockHeader {
    #[prost(uint64, tag = "1")]
    pub number: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub parent_digest: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub timestamp: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub proposer: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Block {
    #[prost(message, optional, tag = "1")]
    pub header: ::core::option::Option<BlockHeader>,
    #[prost(bytes = "vec", tag = "2")]
    pub body: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Proposal {
    #[prost(message, optional, tag = "1")]
    pub block: ::core::option::Option<Block>,
    #[prost(bytes = "vec", tag = "2")]
    pub digest: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PrePrepare {
    #[prost(message, optional, tag = "1")]
    pub view: ::core::option::Option<View>,
    #[prost(message, optional, tag = "2")]
    pub proposal: ::core::option::Option<Proposal>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Prepare {
    #[prost(message, optional, tag = "1")]
    pub subject: ::core::option::Option<Subject>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Commit {
    #[prost(message, optional, tag = "1")]
    pub subject: ::core::option::Option<Subject>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PreparedCertificate {
    #[prost(message, optional, boxed, tag = "1")]
    pub pre_prepare: ::core::option::Option<::prost::alloc::boxed::Box<SignedMessage>>,
    #[prost(message, repeated, tag = "2")]
    pub prepares: ::prost::alloc::vec::Vec<SignedMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoundChange {
    #[prost(message, optional, tag = "1")]
    pub view: ::core::option::Option<View>,
    #[prost(message, optional, tag = "2")]
    pub prepared: ::core::option::Option<PreparedCertificate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub sender: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: ::prost::alloc::vec::Vec<u8>,
    #[prost(oneof = "signed_message::Message", tags = "3, 4, 5, 6")]
    pub message: ::core::option::Option<signed_message::Message>,
}

pub mod signed_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "3")]
        PrePrepare(super::PrePrepare),
        #[prost(message, tag = "4")]
        Prepare(super::Prepare),
        #[prost(message, tag = "5")]
        Commit(super::Commit),
        #[prost(message, tag = "6")]
        RoundChange(super::RoundChange),
    }
}
