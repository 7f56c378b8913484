use std::time::Duration;

use async_trait::async_trait;
use futures::channel::oneshot;
use meridian_api::block::{Block, BlockDigest, BlockHeader, BlockNumber};
use meridian_api::crypto::{Address, RawSignature};
use meridian_protobuf::consensus::{
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
use mockall::mock;

use crate::types::{
    ConsensusContext,
    ConsensusError,
    Decision,
    MessageSigner,
    Round,
    SignatureError,
    ValidatorId,
};

/// A signer whose "signatures" are just the signer's address bytes; enough to
/// exercise the recover-equals-sender check without real cryptography.
#[derive(Debug, Clone)]
pub(crate) struct TestSigner {
    pub id: ValidatorId,
}

impl MessageSigner for TestSigner {
    fn sign(&self, _payload: &[u8]) -> Result<RawSignature, SignatureError> {
        Ok(RawSignature(self.id.as_bytes().to_vec()))
    }

    fn recover(
        &self,
        _payload: &[u8],
        signature: &RawSignature,
    ) -> Result<ValidatorId, SignatureError> {
        Address::try_from(signature.0.as_slice())
            .map_err(|_| SignatureError("malformed test signature".to_string()))
    }
}

pub(crate) fn test_validators(n: u64) -> Vec<ValidatorId> {
    (0..n).map(Address::from).collect()
}

pub(crate) fn test_proposal(height: BlockNumber, seed: u8) -> Proposal {
    let block = Block {
        header: BlockHeader {
            number: height,
            parent_digest: BlockDigest::ZERO,
            timestamp: 1_700_000_000 + u64::from(seed),
            proposer: Address::from(0),
        },
        body: vec![seed],
    };
    let digest = block.digest();
    Proposal { block, digest }
}

/// Signs with the [`TestSigner`] convention: signature bytes are the sender's
/// address.
pub(crate) fn signed(message: ConsensusMessage, sender: ValidatorId) -> SignedMessage {
    SignedMessage { message, sender, signature: RawSignature(sender.as_bytes().to_vec()) }
}

pub(crate) fn pre_prepare_msg(
    view: View,
    proposal: Proposal,
    sender: ValidatorId,
) -> SignedMessage {
    signed(ConsensusMessage::PrePrepare(PrePrepare { view, proposal }), sender)
}

pub(crate) fn prepare_msg(subject: Subject, sender: ValidatorId) -> SignedMessage {
    signed(ConsensusMessage::Prepare(Prepare { subject }), sender)
}

pub(crate) fn commit_msg(subject: Subject, sender: ValidatorId) -> SignedMessage {
    signed(ConsensusMessage::Commit(Commit { subject }), sender)
}

pub(crate) fn round_change_msg(
    view: View,
    prepared: Option<PreparedCertificate>,
    sender: ValidatorId,
) -> SignedMessage {
    signed(ConsensusMessage::RoundChange(RoundChange { view, prepared }), sender)
}

/// A prepared certificate for `proposal` at `view`: the proposer's
/// PRE-PREPARE plus explicit prepares from `prepare_senders`.
pub(crate) fn prepared_certificate(
    view: View,
    proposal: Proposal,
    proposer: ValidatorId,
    prepare_senders: &[ValidatorId],
) -> PreparedCertificate {
    let subject = Subject { view, digest: proposal.digest };
    PreparedCertificate {
        pre_prepare: Box::new(pre_prepare_msg(view, proposal, proposer)),
        prepares: prepare_senders.iter().map(|sender| prepare_msg(subject, *sender)).collect(),
    }
}

mock! {
    pub TestContext {}

    #[async_trait]
    impl ConsensusContext for TestContext {
        async fn build_proposal(
            &mut self,
            view: View,
            timeout: Duration,
        ) -> oneshot::Receiver<Proposal>;

        async fn validate_proposal(
            &mut self,
            view: View,
            proposal: Proposal,
            timeout: Duration,
        ) -> oneshot::Receiver<BlockDigest>;

        async fn validators(&self, height: BlockNumber) -> Vec<ValidatorId>;

        async fn broadcast(&mut self, message: SignedMessage) -> Result<(), ConsensusError>;

        async fn unicast(
            &mut self,
            peer: ValidatorId,
            message: SignedMessage,
        ) -> Result<(), ConsensusError>;

        async fn decision_reached(&mut self, decision: Decision) -> Result<(), ConsensusError>;

        async fn try_sync(&mut self, height: BlockNumber) -> bool;

        async fn set_height_and_round(&mut self, height: BlockNumber, round: Round);
    }
}
