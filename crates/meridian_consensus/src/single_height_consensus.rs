//! Drives consensus for one height: validates inbound messages, signs and
//! loops back our own votes, and translates between the state machine and the
//! effects the manager executes.

use std::collections::VecDeque;
use std::sync::Arc;

use meridian_api::block::BlockNumber;
use meridian_api::crypto::RawSignature;
use meridian_consensus_config::config::ProposerPolicy;
use meridian_protobuf::consensus::{
    ConsensusMessage,
    PreparedCertificate,
    Proposal,
    SignedMessage,
    View,
};
use metrics::counter;
use tracing::{debug, warn};

use crate::metrics::CONSENSUS_INVALID_MESSAGES;
use crate::state_machine::{SMRequest, StateMachine, StateMachineEvent};
use crate::types::{
    ConsensusError,
    Decision,
    MessageSigner,
    Round,
    ValidationError,
    ValidatorId,
};
use crate::validation::{
    authenticate,
    validate_prepared_certificate,
    validate_proposer,
    validate_sender,
    validate_subject,
};
use crate::validator_set::ValidatorSet;

#[cfg(test)]
#[path = "single_height_consensus_test.rs"]
mod single_height_consensus_test;

/// An effect for the manager to execute on the serial loop's behalf.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ShcRequest {
    /// Send to all peers, fire-and-forget.
    Broadcast(SignedMessage),
    /// Ask the node for a proposal; completion comes back as
    /// [`StateMachineEvent::FinishedBuilding`].
    StartBuildProposal(Round),
    /// Ask the node to verify a proposal; completion comes back as
    /// [`StateMachineEvent::FinishedValidation`].
    StartValidateProposal(Proposal, Round),
    /// Arm the round timer; firing comes back as
    /// [`StateMachineEvent::Timeout`].
    ScheduleTimeout { round: Round, token: u64 },
}

/// What one interaction with the height produced: effects to execute, and on
/// the last interaction of the height, the decision (preceded by any effects
/// that must still go out, e.g. our own COMMIT).
#[derive(Debug, PartialEq)]
pub(crate) enum ShcReturn {
    Requests(VecDeque<ShcRequest>),
    Decision(VecDeque<ShcRequest>, Decision),
}

/// Consensus for a single height.
///
/// Inbound messages are fully validated here (signature, membership,
/// proposer, subject consistency, piggybacked certificates) before the state
/// machine sees them; the manager has already classified views, so everything
/// arriving here is actionable now.
pub(crate) struct SingleHeightConsensus {
    height: BlockNumber,
    id: ValidatorId,
    policy: ProposerPolicy,
    signer: Arc<dyn MessageSigner>,
    state_machine: StateMachine,
    latest_round_change: Option<SignedMessage>,
}

impl SingleHeightConsensus {
    pub(crate) fn new(
        height: BlockNumber,
        id: ValidatorId,
        validators: ValidatorSet,
        policy: ProposerPolicy,
        signer: Arc<dyn MessageSigner>,
    ) -> Self {
        Self {
            height,
            id,
            policy,
            signer,
            state_machine: StateMachine::new(height, id, validators, policy),
            latest_round_change: None,
        }
    }

    pub(crate) fn current_view(&self) -> View {
        self.state_machine.current_view()
    }

    pub(crate) fn proposal_accepted(&self) -> bool {
        self.state_machine.proposal_accepted()
    }

    /// The last ROUND-CHANGE we broadcast, kept to help lagging peers catch
    /// up.
    pub(crate) fn latest_round_change(&self) -> Option<&SignedMessage> {
        self.latest_round_change.as_ref()
    }

    pub(crate) fn start(&mut self) -> Result<ShcReturn, ConsensusError> {
        let requests = self.state_machine.start();
        self.process_requests(requests)
    }

    /// Handles a network message for the current height. Validation failures
    /// drop the message with a log line; they never affect the state machine.
    pub(crate) fn handle_message(
        &mut self,
        message: SignedMessage,
    ) -> Result<ShcReturn, ConsensusError> {
        debug_assert_eq!(message.message.view().height, self.height);
        match self.validate_message(&message) {
            Ok(event) => {
                let requests = self.state_machine.handle_event(event);
                self.process_requests(requests)
            }
            Err(error) => {
                warn!("Dropping message ({message}): {error}");
                counter!(CONSENSUS_INVALID_MESSAGES).increment(1);
                Ok(ShcReturn::Requests(VecDeque::new()))
            }
        }
    }

    /// Handles a task completion (build, validation, timeout) fed back by the
    /// manager.
    pub(crate) fn handle_event(
        &mut self,
        event: StateMachineEvent,
    ) -> Result<ShcReturn, ConsensusError> {
        let requests = self.state_machine.handle_event(event);
        self.process_requests(requests)
    }

    /// The validation pipeline, in cheap-to-expensive order.
    fn validate_message(
        &self,
        message: &SignedMessage,
    ) -> Result<StateMachineEvent, ValidationError> {
        let validators = self.state_machine.validators();
        authenticate(message, self.signer.as_ref())?;
        validate_sender(validators, &message.sender)?;
        match &message.message {
            ConsensusMessage::PrePrepare(pre_prepare) => {
                validate_proposer(validators, self.policy, pre_prepare.view, &message.sender)?;
                // A held prepared certificate binds the digest: the proposer
                // of a later round may not substitute a different block.
                if let Some(locked) = self.state_machine.locked_digest() {
                    if pre_prepare.proposal.digest != locked {
                        return Err(ValidationError::InconsistentSubject);
                    }
                }
                Ok(StateMachineEvent::PrePrepare(message.clone()))
            }
            ConsensusMessage::Prepare(prepare) => {
                if let Some(subject) = self.state_machine.adopted_subject() {
                    validate_subject(&prepare.subject, &subject)?;
                }
                Ok(StateMachineEvent::Prepare(message.clone()))
            }
            ConsensusMessage::Commit(commit) => {
                if let Some(subject) = self.state_machine.adopted_subject() {
                    validate_subject(&commit.subject, &subject)?;
                }
                Ok(StateMachineEvent::Commit(message.clone()))
            }
            ConsensusMessage::RoundChange(round_change) => {
                let certificate =
                    round_change.prepared.as_ref().and_then(|certificate| {
                        match self.validate_piggyback(certificate, round_change.view) {
                            Ok(()) => Some(certificate.clone()),
                            Err(error) => {
                                // The bad certificate is dropped; the round
                                // change itself still counts.
                                warn!(
                                    "Dropping piggybacked certificate from {}: {error}",
                                    message.sender
                                );
                                counter!(CONSENSUS_INVALID_MESSAGES).increment(1);
                                None
                            }
                        }
                    });
                Ok(StateMachineEvent::RoundChange(message.clone(), certificate))
            }
        }
    }

    fn validate_piggyback(
        &self,
        certificate: &PreparedCertificate,
        target: View,
    ) -> Result<(), ValidationError> {
        validate_prepared_certificate(
            certificate,
            self.state_machine.validators(),
            self.policy,
            self.signer.as_ref(),
        )?;
        let subject =
            certificate.subject().ok_or(ValidationError::InvalidPreparedBlock)?;
        // The certificate must be from an earlier round of this same height.
        if subject.view.height != target.height || subject.view.round >= target.round {
            return Err(ValidationError::InvalidPreparedBlock);
        }
        Ok(())
    }

    /// Executes the signing side of the state machine's requests. Our own
    /// broadcasts are looped back in so our vote is counted like any peer's.
    fn process_requests(
        &mut self,
        mut requests: VecDeque<SMRequest>,
    ) -> Result<ShcReturn, ConsensusError> {
        let mut output = VecDeque::new();
        while let Some(request) = requests.pop_front() {
            match request {
                SMRequest::Broadcast(message) => {
                    let signed = self.sign(message)?;
                    if matches!(signed.message, ConsensusMessage::RoundChange(_)) {
                        self.latest_round_change = Some(signed.clone());
                    }
                    output.push_back(ShcRequest::Broadcast(signed.clone()));
                    let mut more = self.state_machine.handle_event(loopback_event(signed));
                    requests.append(&mut more);
                }
                SMRequest::StartBuildProposal(round) => {
                    output.push_back(ShcRequest::StartBuildProposal(round));
                }
                SMRequest::StartValidateProposal(proposal, round) => {
                    output.push_back(ShcRequest::StartValidateProposal(proposal, round));
                }
                SMRequest::ScheduleTimeout { round, token } => {
                    output.push_back(ShcRequest::ScheduleTimeout { round, token });
                }
                SMRequest::DecisionReached(decision) => {
                    debug!("Height {} reached a decision", self.height);
                    return Ok(ShcReturn::Decision(output, decision));
                }
            }
        }
        Ok(ShcReturn::Requests(output))
    }

    fn sign(&self, message: ConsensusMessage) -> Result<SignedMessage, ConsensusError> {
        let mut signed =
            SignedMessage { message, sender: self.id, signature: RawSignature::default() };
        signed.signature = self.signer.sign(&signed.payload_bytes())?;
        Ok(signed)
    }
}

// Our own broadcast re-enters the state machine as if received from a peer.
fn loopback_event(signed: SignedMessage) -> StateMachineEvent {
    match &signed.message {
        ConsensusMessage::PrePrepare(_) => StateMachineEvent::PrePrepare(signed),
        ConsensusMessage::Prepare(_) => StateMachineEvent::Prepare(signed),
        ConsensusMessage::Commit(_) => StateMachineEvent::Commit(signed),
        ConsensusMessage::RoundChange(round_change) => {
            let certificate = round_change.prepared.clone();
            StateMachineEvent::RoundChange(signed, certificate)
        }
    }
}
