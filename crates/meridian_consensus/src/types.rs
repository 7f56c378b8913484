//! Types for interfacing between consensus and the node.
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use meridian_api::block::{BlockDigest, BlockNumber};
use meridian_api::crypto::RawSignature;
use meridian_protobuf::consensus::{Proposal, SignedMessage, View};
use meridian_protobuf::converters::MessageDecodeError;

pub use meridian_consensus_config::ValidatorId;
pub use meridian_protobuf::consensus::Round;

/// Interface for consensus to call out to the node.
///
/// Function calls should be assumed to not be cancel safe.
#[async_trait]
pub trait ConsensusContext {
    /// Called by consensus to request a block proposal from the node, only
    /// when this validator is the proposer of `view`. Returns immediately; the
    /// proposal arrives on the receiver once built. If no valid block can be
    /// built within `timeout` the sender is dropped.
    async fn build_proposal(
        &mut self,
        view: View,
        timeout: Duration,
    ) -> oneshot::Receiver<Proposal>;

    /// Called by consensus to have the node verify a proposal received from
    /// the network. Returns immediately; the content digest the node computed
    /// arrives on the receiver once verification is done. If the block is
    /// invalid the sender is dropped.
    async fn validate_proposal(
        &mut self,
        view: View,
        proposal: Proposal,
        timeout: Duration,
    ) -> oneshot::Receiver<BlockDigest>;

    /// Get the validators participating at the given height. The set may
    /// change between heights but never within one.
    async fn validators(&self, height: BlockNumber) -> Vec<ValidatorId>;

    /// Best-effort broadcast to all peers; no delivery guarantee.
    async fn broadcast(&mut self, message: SignedMessage) -> Result<(), ConsensusError>;

    /// Best-effort send to a single peer; no delivery guarantee.
    async fn unicast(
        &mut self,
        peer: ValidatorId,
        message: SignedMessage,
    ) -> Result<(), ConsensusError>;

    /// Hand the decided block to the node for insertion. Called exactly once
    /// per height. An error here is fatal for consensus participation: the
    /// node disagrees with our own finalized decision.
    async fn decision_reached(&mut self, decision: Decision) -> Result<(), ConsensusError>;

    /// Attempt to learn of a decision from the sync protocol.
    /// Returns true if a decision was learned so consensus can proceed.
    async fn try_sync(&mut self, height: BlockNumber) -> bool;

    /// Update the context with the current height and round.
    async fn set_height_and_round(&mut self, height: BlockNumber, round: Round);
}

/// Signing of outbound messages and signer recovery for inbound ones. Key
/// material stays with the node.
pub trait MessageSigner: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Result<RawSignature, SignatureError>;
    fn recover(
        &self,
        payload: &[u8],
        signature: &RawSignature,
    ) -> Result<ValidatorId, SignatureError>;
}

/// The outcome of one height: the decided proposal and the commit votes that
/// certify it (a quorum, all for the same subject).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub proposal: Proposal,
    pub commits: Vec<SignedMessage>,
    pub round: Round,
}

/// A signature could not be produced or verified.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("signature verification failed: {0}")]
pub struct SignatureError(pub String);

/// Why an inbound message was dropped. Every variant is local and non-fatal:
/// it affects only that message's disposition, never the state machine.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A vote's subject disagrees with the round's adopted subject.
    #[error("inconsistent subjects")]
    InconsistentSubject,
    /// A PRE-PREPARE signed by someone other than the view's proposer.
    #[error("message does not come from proposer")]
    NotFromProposer,
    /// The message's view is ahead of ours; a candidate for the backlog.
    #[error("future message")]
    FutureMessage,
    /// The message's view is behind ours.
    #[error("old message")]
    OldMessage,
    /// The message payload was malformed, tagged per message kind.
    #[error(transparent)]
    Decode(#[from] MessageDecodeError),
    /// The recovered signer differs from the claimed sender.
    #[error("message not signed by the sender")]
    InvalidSigner,
    /// The signature itself did not verify.
    #[error(transparent)]
    InvalidSignature(#[from] SignatureError),
    /// The sender is not a member of the validator set for this height.
    #[error("message sender is not a validator")]
    NotValidator,
    /// A piggybacked prepared certificate failed validation.
    #[error("invalid prepared block in round change messages")]
    InvalidPreparedBlock,
}

/// Errors of the consensus infrastructure, as opposed to per-message
/// validation failures.
#[derive(thiserror::Error, Debug)]
pub enum ConsensusError {
    #[error(transparent)]
    Canceled(#[from] oneshot::Canceled),
    #[error(transparent)]
    SendError(#[from] mpsc::SendError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    // Indicates an error in communication between consensus and the node's
    // networking component, as opposed to an error between this node and
    // peer nodes.
    #[error("{0}")]
    InternalNetworkError(String),
    // For example the state machine and SHC are out of sync.
    #[error("{0}")]
    InternalInconsistency(String),
    /// The node rejected a block this validator already decided on.
    #[error("block sink rejected decided block: {0}")]
    BlockSinkError(String),
}
