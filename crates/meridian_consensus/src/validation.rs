//! The message validation pipeline: pure functions over message contents, the
//! validator set and the signer. Safe to run off the serial loop; only the
//! state transitions they gate are serialized.

use std::collections::HashSet;

use meridian_consensus_config::config::ProposerPolicy;
use meridian_protobuf::consensus::{
    ConsensusMessage,
    MessageKind,
    PreparedCertificate,
    SignedMessage,
    Subject,
    View,
};
use tracing::debug;

use crate::types::{MessageSigner, ValidationError, ValidatorId};
use crate::validator_set::ValidatorSet;

#[cfg(test)]
#[path = "validation_test.rs"]
mod validation_test;

/// Checks whether a message's view is actionable at the current one.
/// `Err(FutureMessage)` marks a backlog candidate; `Err(OldMessage)` marks a
/// message that can never become actionable again.
///
/// ROUND-CHANGE compares heights only: any target round at or above the
/// current one is actionable now, that is how rounds advance. Votes for the
/// current view are actionable only once a proposal was adopted; before that
/// they are buffered.
pub(crate) fn check_message_view(
    message: &ConsensusMessage,
    current: View,
    proposal_accepted: bool,
) -> Result<(), ValidationError> {
    let view = message.view();
    if message.kind() == MessageKind::RoundChange {
        if view.height > current.height {
            return Err(ValidationError::FutureMessage);
        }
        if view.height < current.height || view.round < current.round {
            return Err(ValidationError::OldMessage);
        }
        return Ok(());
    }
    if view > current {
        return Err(ValidationError::FutureMessage);
    }
    if view < current {
        return Err(ValidationError::OldMessage);
    }
    match message.kind() {
        MessageKind::PrePrepare => Ok(()),
        _ if proposal_accepted => Ok(()),
        _ => Err(ValidationError::FutureMessage),
    }
}

/// Recovers the signer and checks it matches the claimed sender. A signature
/// that fails to verify and a signer that differs from the sender are
/// distinct errors; the latter is the stronger Byzantine signal.
pub(crate) fn authenticate(
    message: &SignedMessage,
    signer: &dyn MessageSigner,
) -> Result<ValidatorId, ValidationError> {
    let recovered = signer.recover(&message.payload_bytes(), &message.signature)?;
    if recovered != message.sender {
        return Err(ValidationError::InvalidSigner);
    }
    Ok(recovered)
}

/// The sender must be a member of the validator set for the message's height.
pub(crate) fn validate_sender(
    validators: &ValidatorSet,
    sender: &ValidatorId,
) -> Result<(), ValidationError> {
    if !validators.contains(sender) {
        return Err(ValidationError::NotValidator);
    }
    Ok(())
}

/// A PRE-PREPARE must be signed by exactly the validator the set designates
/// for its view, regardless of signature validity.
pub(crate) fn validate_proposer(
    validators: &ValidatorSet,
    policy: ProposerPolicy,
    view: View,
    sender: &ValidatorId,
) -> Result<(), ValidationError> {
    if validators.proposer(view, policy) != *sender {
        return Err(ValidationError::NotFromProposer);
    }
    Ok(())
}

/// A vote's subject must match the round's adopted subject exactly.
pub(crate) fn validate_subject(
    subject: &Subject,
    expected: &Subject,
) -> Result<(), ValidationError> {
    if subject != expected {
        return Err(ValidationError::InconsistentSubject);
    }
    Ok(())
}

/// Full validation of a piggybacked prepared certificate: the PRE-PREPARE is
/// from the right proposer, every PREPARE is independently valid for the same
/// subject, signers are distinct, and the total reaches quorum. Any failure
/// is reported as `InvalidPreparedBlock`.
pub(crate) fn validate_prepared_certificate(
    certificate: &PreparedCertificate,
    validators: &ValidatorSet,
    policy: ProposerPolicy,
    signer: &dyn MessageSigner,
) -> Result<(), ValidationError> {
    let invalid = |reason: &str| {
        debug!("Invalid prepared certificate: {reason}");
        ValidationError::InvalidPreparedBlock
    };

    let pre_prepare = &certificate.pre_prepare;
    let ConsensusMessage::PrePrepare(inner) = &pre_prepare.message else {
        return Err(invalid("certificate head is not a PRE-PREPARE"));
    };
    let subject = inner.subject();
    if inner.proposal.block.digest() != inner.proposal.digest {
        return Err(invalid("proposal digest does not match block content"));
    }
    authenticate(pre_prepare, signer).map_err(|_| invalid("PRE-PREPARE signature"))?;
    validate_sender(validators, &pre_prepare.sender)
        .map_err(|_| invalid("PRE-PREPARE sender not a validator"))?;
    validate_proposer(validators, policy, subject.view, &pre_prepare.sender)
        .map_err(|_| invalid("PRE-PREPARE not from the view's proposer"))?;

    let mut signers = HashSet::from([pre_prepare.sender]);
    for prepare in &certificate.prepares {
        let ConsensusMessage::Prepare(inner) = &prepare.message else {
            return Err(invalid("certificate vote is not a PREPARE"));
        };
        validate_subject(&inner.subject, &subject)
            .map_err(|_| invalid("PREPARE for a different subject"))?;
        authenticate(prepare, signer).map_err(|_| invalid("PREPARE signature"))?;
        validate_sender(validators, &prepare.sender)
            .map_err(|_| invalid("PREPARE sender not a validator"))?;
        if !signers.insert(prepare.sender) {
            return Err(invalid("duplicate signer"));
        }
    }
    if signers.len() < validators.quorum_size() {
        return Err(invalid("fewer signers than quorum"));
    }
    Ok(())
}
