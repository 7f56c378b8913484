use meridian_api::block::{Block, BlockDigest, BlockHeader, BlockNumber};
use meridian_api::crypto::{Address, RawSignature};
use prost::Message as _;

use crate::consensus::{
    Commit,
    ConsensusMessage,
    PrePrepare,
    Prepare,
    PreparedCertificate,
    Proposal,
    RoundChange,
    SignedMessage,
    Subject,
    View,
};
use crate::converters::{MessageDecodeError, ProtobufConversionError};
use crate::protobuf;

fn digest_from_vec(value: Vec<u8>) -> Result<BlockDigest, ProtobufConversionError> {
    BlockDigest::try_from(value.as_slice()).map_err(|_| {
        ProtobufConversionError::BytesDataLengthMismatch {
            type_description: "BlockDigest",
            num_expected: 32,
            value,
        }
    })
}

fn address_from_vec(value: Vec<u8>) -> Result<Address, ProtobufConversionError> {
    Address::try_from(value.as_slice()).map_err(|_| {
        ProtobufConversionError::BytesDataLengthMismatch {
            type_description: "Address",
            num_expected: 20,
            value,
        }
    })
}

impl From<View> for protobuf::View {
    fn from(value: View) -> Self {
        protobuf::View { height: value.height.0, round: value.round }
    }
}

impl From<protobuf::View> for View {
    fn from(value: protobuf::View) -> Self {
        View { height: BlockNumber(value.height), round: value.round }
    }
}

impl From<Subject> for protobuf::Subject {
    fn from(value: Subject) -> Self {
        protobuf::Subject {
            view: Some(value.view.into()),
            digest: value.digest.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<protobuf::Subject> for Subject {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::Subject) -> Result<Self, Self::Error> {
        let view = value
            .view
            .ok_or(ProtobufConversionError::MissingField { field_description: "Subject::view" })?;
        Ok(Subject { view: view.into(), digest: digest_from_vec(value.digest)? })
    }
}

impl From<BlockHeader> for protobuf::BlockHeader {
    fn from(value: BlockHeader) -> Self {
        protobuf::BlockHeader {
            number: value.number.0,
            parent_digest: value.parent_digest.as_bytes().to_vec(),
            timestamp: value.timestamp,
            proposer: value.proposer.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<protobuf::BlockHeader> for BlockHeader {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::BlockHeader) -> Result<Self, Self::Error> {
        Ok(BlockHeader {
            number: BlockNumber(value.number),
            parent_digest: digest_from_vec(value.parent_digest)?,
            timestamp: value.timestamp,
            proposer: address_from_vec(value.proposer)?,
        })
    }
}

impl From<Block> for protobuf::Block {
    fn from(value: Block) -> Self {
        protobuf::Block { header: Some(value.header.into()), body: value.body }
    }
}

impl TryFrom<protobuf::Block> for Block {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::Block) -> Result<Self, Self::Error> {
        let header = value
            .header
            .ok_or(ProtobufConversionError::MissingField { field_description: "Block::header" })?;
        Ok(Block { header: header.try_into()?, body: value.body })
    }
}

impl From<Proposal> for protobuf::Proposal {
    fn from(value: Proposal) -> Self {
        protobuf::Proposal {
            block: Some(value.block.into()),
            digest: value.digest.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<protobuf::Proposal> for Proposal {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::Proposal) -> Result<Self, Self::Error> {
        let block = value
            .block
            .ok_or(ProtobufConversionError::MissingField { field_description: "Proposal::block" })?;
        Ok(Proposal { block: block.try_into()?, digest: digest_from_vec(value.digest)? })
    }
}

impl From<PrePrepare> for protobuf::PrePrepare {
    fn from(value: PrePrepare) -> Self {
        protobuf::PrePrepare {
            view: Some(value.view.into()),
            proposal: Some(value.proposal.into()),
        }
    }
}

impl TryFrom<protobuf::PrePrepare> for PrePrepare {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::PrePrepare) -> Result<Self, Self::Error> {
        let view = value.view.ok_or(ProtobufConversionError::MissingField {
            field_description: "PrePrepare::view",
        })?;
        let proposal = value.proposal.ok_or(ProtobufConversionError::MissingField {
            field_description: "PrePrepare::proposal",
        })?;
        Ok(PrePrepare { view: view.into(), proposal: proposal.try_into()? })
    }
}

impl From<Prepare> for protobuf::Prepare {
    fn from(value: Prepare) -> Self {
        protobuf::Prepare { subject: Some(value.subject.into()) }
    }
}

impl TryFrom<protobuf::Prepare> for Prepare {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::Prepare) -> Result<Self, Self::Error> {
        let subject = value.subject.ok_or(ProtobufConversionError::MissingField {
            field_description: "Prepare::subject",
        })?;
        Ok(Prepare { subject: subject.try_into()? })
    }
}

impl From<Commit> for protobuf::Commit {
    fn from(value: Commit) -> Self {
        protobuf::Commit { subject: Some(value.subject.into()) }
    }
}

impl TryFrom<protobuf::Commit> for Commit {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::Commit) -> Result<Self, Self::Error> {
        let subject = value.subject.ok_or(ProtobufConversionError::MissingField {
            field_description: "Commit::subject",
        })?;
        Ok(Commit { subject: subject.try_into()? })
    }
}

impl From<PreparedCertificate> for protobuf::PreparedCertificate {
    fn from(value: PreparedCertificate) -> Self {
        protobuf::PreparedCertificate {
            pre_prepare: Some(Box::new((*value.pre_prepare).clone().into())),
            prepares: value.prepares.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<protobuf::PreparedCertificate> for PreparedCertificate {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::PreparedCertificate) -> Result<Self, Self::Error> {
        let pre_prepare = value.pre_prepare.ok_or(ProtobufConversionError::MissingField {
            field_description: "PreparedCertificate::pre_prepare",
        })?;
        Ok(PreparedCertificate {
            pre_prepare: Box::new((*pre_prepare).try_into()?),
            prepares: value
                .prepares
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

impl From<RoundChange> for protobuf::RoundChange {
    fn from(value: RoundChange) -> Self {
        protobuf::RoundChange {
            view: Some(value.view.into()),
            prepared: value.prepared.map(Into::into),
        }
    }
}

impl TryFrom<protobuf::RoundChange> for RoundChange {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::RoundChange) -> Result<Self, Self::Error> {
        let view = value.view.ok_or(ProtobufConversionError::MissingField {
            field_description: "RoundChange::view",
        })?;
        Ok(RoundChange {
            view: view.into(),
            prepared: value.prepared.map(TryInto::try_into).transpose()?,
        })
    }
}

impl From<ConsensusMessage> for protobuf::signed_message::Message {
    fn from(value: ConsensusMessage) -> Self {
        match value {
            ConsensusMessage::PrePrepare(pre_prepare) => {
                protobuf::signed_message::Message::PrePrepare(pre_prepare.into())
            }
            ConsensusMessage::Prepare(prepare) => {
                protobuf::signed_message::Message::Prepare(prepare.into())
            }
            ConsensusMessage::Commit(commit) => {
                protobuf::signed_message::Message::Commit(commit.into())
            }
            ConsensusMessage::RoundChange(round_change) => {
                protobuf::signed_message::Message::RoundChange(round_change.into())
            }
        }
    }
}

impl From<SignedMessage> for protobuf::SignedMessage {
    fn from(value: SignedMessage) -> Self {
        protobuf::SignedMessage {
            sender: value.sender.as_bytes().to_vec(),
            signature: value.signature.0,
            message: Some(value.message.into()),
        }
    }
}

impl TryFrom<protobuf::SignedMessage> for SignedMessage {
    type Error = ProtobufConversionError;

    fn try_from(value: protobuf::SignedMessage) -> Result<Self, Self::Error> {
        let message = value.message.ok_or(ProtobufConversionError::MissingField {
            field_description: "SignedMessage::message",
        })?;
        let message = match message {
            protobuf::signed_message::Message::PrePrepare(pre_prepare) => {
                ConsensusMessage::PrePrepare(pre_prepare.try_into()?)
            }
            protobuf::signed_message::Message::Prepare(prepare) => {
                ConsensusMessage::Prepare(prepare.try_into()?)
            }
            protobuf::signed_message::Message::Commit(commit) => {
                ConsensusMessage::Commit(commit.try_into()?)
            }
            protobuf::signed_message::Message::RoundChange(round_change) => {
                ConsensusMessage::RoundChange(round_change.try_into()?)
            }
        };
        Ok(SignedMessage {
            message,
            sender: address_from_vec(value.sender)?,
            signature: RawSignature(value.signature),
        })
    }
}

impl From<SignedMessage> for Vec<u8> {
    fn from(value: SignedMessage) -> Self {
        protobuf::SignedMessage::from(value).encode_to_vec()
    }
}

impl TryFrom<Vec<u8>> for SignedMessage {
    type Error = MessageDecodeError;

    /// Decodes an inbound message, tagging conversion failures with the
    /// message kind that was malformed.
    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let wire = protobuf::SignedMessage::decode(value.as_slice())
            .map_err(|err| MessageDecodeError::InvalidEnvelope(err.into()))?;
        let sender = address_from_vec(wire.sender).map_err(MessageDecodeError::InvalidEnvelope)?;
        let signature = RawSignature(wire.signature);
        let message = wire.message.ok_or(MessageDecodeError::InvalidEnvelope(
            ProtobufConversionError::MissingField { field_description: "SignedMessage::message" },
        ))?;
        let message = match message {
            protobuf::signed_message::Message::PrePrepare(pre_prepare) => {
                ConsensusMessage::PrePrepare(
                    pre_prepare.try_into().map_err(MessageDecodeError::PrePrepare)?,
                )
            }
            protobuf::signed_message::Message::Prepare(prepare) => ConsensusMessage::Prepare(
                prepare.try_into().map_err(MessageDecodeError::Prepare)?,
            ),
            protobuf::signed_message::Message::Commit(commit) => {
                ConsensusMessage::Commit(commit.try_into().map_err(MessageDecodeError::Commit)?)
            }
            protobuf::signed_message::Message::RoundChange(round_change) => {
                let view = round_change
                    .view
                    .ok_or(ProtobufConversionError::MissingField {
                        field_description: "RoundChange::view",
                    })
                    .map_err(MessageDecodeError::RoundChange)?;
                // A malformed piggybacked certificate is reported as its own
                // kind; the enclosing ROUND-CHANGE shape was fine.
                let prepared = round_change
                    .prepared
                    .map(TryInto::try_into)
                    .transpose()
                    .map_err(MessageDecodeError::PiggybackMessages)?;
                ConsensusMessage::RoundChange(RoundChange { view: view.into(), prepared })
            }
        };
        Ok(SignedMessage { message, sender, signature })
    }
}
