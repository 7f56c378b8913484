//! Typed consensus messages, as the core works with them. The wire shape
//! lives in [`crate::protobuf`]; conversions in [`crate::converters`].

use std::fmt;
use std::fmt::Display;

use meridian_api::block::{Block, BlockDigest, BlockNumber};
use meridian_api::crypto::{Address, RawSignature};
use prost::Message as _;

use crate::protobuf;

/// A round number within a height.
pub type Round = u32;

/// One attempt to decide one height.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct View {
    pub height: BlockNumber,
    pub round: Round,
}

impl View {
    pub fn new(height: BlockNumber, round: Round) -> Self {
        Self { height, round }
    }

    /// The same height, next round.
    pub fn next_round(&self) -> View {
        View { height: self.height, round: self.round + 1 }
    }
}

impl Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.height, self.round)
    }
}

/// What is being voted on: a view and the digest of the proposed block.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Subject {
    pub view: View,
    pub digest: BlockDigest,
}

impl Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.digest, self.view)
    }
}

/// A candidate block and its content digest.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct Proposal {
    pub block: Block,
    pub digest: BlockDigest,
}

/// The proposer's opening message for a view.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct PrePrepare {
    pub view: View,
    pub proposal: Proposal,
}

impl PrePrepare {
    pub fn subject(&self) -> Subject {
        Subject { view: self.view, digest: self.proposal.digest }
    }
}

/// A vote that the proposal for `subject.view` is acceptable.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct Prepare {
    pub subject: Subject,
}

/// A vote to finalize the proposal for `subject.view`.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct Commit {
    pub subject: Subject,
}

/// A request to abandon the current round and move to `view`, optionally
/// carrying the sender's prepared certificate as evidence.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct RoundChange {
    pub view: View,
    pub prepared: Option<PreparedCertificate>,
}

/// Quorum evidence that a proposal was prepared: the signed PRE-PREPARE plus
/// PREPARE votes from distinct validators. The proposer's PRE-PREPARE counts
/// as its vote.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PreparedCertificate {
    pub pre_prepare: Box<SignedMessage>,
    pub prepares: Vec<SignedMessage>,
}

impl PreparedCertificate {
    /// The subject the certificate's PRE-PREPARE is for, if it is well-formed.
    pub fn subject(&self) -> Option<Subject> {
        match &self.pre_prepare.message {
            ConsensusMessage::PrePrepare(pre_prepare) => Some(pre_prepare.subject()),
            _ => None,
        }
    }

    /// The proposal carried by the certificate, if it is well-formed.
    pub fn proposal(&self) -> Option<&Proposal> {
        match &self.pre_prepare.message {
            ConsensusMessage::PrePrepare(pre_prepare) => Some(&pre_prepare.proposal),
            _ => None,
        }
    }
}

/// The kind of a consensus message, in replay-priority order: when several
/// buffered messages target the same view, PRE-PREPARE must be replayed first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    PrePrepare,
    Prepare,
    Commit,
    RoundChange,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::PrePrepare => "PRE-PREPARE",
            MessageKind::Prepare => "PREPARE",
            MessageKind::Commit => "COMMIT",
            MessageKind::RoundChange => "ROUND-CHANGE",
        };
        write!(f, "{name}")
    }
}

/// The unsigned body of a consensus message.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ConsensusMessage {
    PrePrepare(PrePrepare),
    Prepare(Prepare),
    Commit(Commit),
    RoundChange(RoundChange),
}

impl ConsensusMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ConsensusMessage::PrePrepare(_) => MessageKind::PrePrepare,
            ConsensusMessage::Prepare(_) => MessageKind::Prepare,
            ConsensusMessage::Commit(_) => MessageKind::Commit,
            ConsensusMessage::RoundChange(_) => MessageKind::RoundChange,
        }
    }

    /// The view this message addresses. For ROUND-CHANGE this is the target
    /// view, not the view the sender is leaving.
    pub fn view(&self) -> View {
        match self {
            ConsensusMessage::PrePrepare(pre_prepare) => pre_prepare.view,
            ConsensusMessage::Prepare(prepare) => prepare.subject.view,
            ConsensusMessage::Commit(commit) => commit.subject.view,
            ConsensusMessage::RoundChange(round_change) => round_change.view,
        }
    }

    /// The subject of a vote message; PRE-PREPARE implies one, ROUND-CHANGE
    /// has none.
    pub fn subject(&self) -> Option<Subject> {
        match self {
            ConsensusMessage::PrePrepare(pre_prepare) => Some(pre_prepare.subject()),
            ConsensusMessage::Prepare(prepare) => Some(prepare.subject),
            ConsensusMessage::Commit(commit) => Some(commit.subject),
            ConsensusMessage::RoundChange(_) => None,
        }
    }
}

/// A consensus message together with its claimed sender and signature.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SignedMessage {
    pub message: ConsensusMessage,
    pub sender: Address,
    pub signature: RawSignature,
}

impl SignedMessage {
    /// The bytes the signature covers: the wire encoding of this message with
    /// an empty signature field.
    pub fn payload_bytes(&self) -> Vec<u8> {
        let mut wire = protobuf::SignedMessage::from(self.clone());
        wire.signature.clear();
        wire.encode_to_vec()
    }
}

impl Display for SignedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} for {}", self.message.kind(), self.sender, self.message.view())
    }
}
