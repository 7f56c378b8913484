//! State machine for Meridian consensus: the round-based lifecycle
//! NEW_ROUND -> PRE-PREPARED -> PREPARED -> COMMITTED, with round changes
//! driven by timeouts and ROUND-CHANGE quorums.
//!
//! The machine is isolated from effects: events come in, requests go out for
//! the caller to execute. It assumes the single-height layer already handled
//! authentication, membership, proposer and subject checks.

use std::collections::VecDeque;

use meridian_api::block::{BlockDigest, BlockNumber};
use meridian_consensus_config::config::ProposerPolicy;
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
use metrics::{counter, gauge};
use tracing::{debug, info, trace, warn};

use crate::metrics::{
    CONSENSUS_BUILD_PROPOSAL_FAILED,
    CONSENSUS_CONFLICTING_VOTES,
    CONSENSUS_NEW_VALUE_LOCKS,
    CONSENSUS_PROPOSALS_INVALID,
    CONSENSUS_PROPOSALS_RECEIVED,
    CONSENSUS_ROUND,
    CONSENSUS_ROUND_CHANGES,
    CONSENSUS_TIMEOUTS,
};
use crate::round_change::RoundChangeSet;
use crate::round_state::{Phase, RoundState, VoteInsertion};
use crate::types::{Decision, Round, ValidatorId};
use crate::validator_set::ValidatorSet;

#[cfg(test)]
#[path = "state_machine_test.rs"]
mod state_machine_test;

/// Events which the state machine receives. Messages were validated upstream;
/// completion events are fed back after an external task is done.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StateMachineEvent {
    /// The local proposal building task has completed; None means it failed.
    FinishedBuilding(Option<Proposal>, Round),
    /// Block verification of a received proposal has completed; None means
    /// the block is invalid.
    FinishedValidation(Option<BlockDigest>, Round),
    /// A validated PRE-PREPARE (ours via loopback, or a peer's).
    PrePrepare(SignedMessage),
    /// A validated PREPARE for the current round's subject.
    Prepare(SignedMessage),
    /// A validated COMMIT for the current round's subject.
    Commit(SignedMessage),
    /// A validated ROUND-CHANGE; the certificate is the piggyback after
    /// validation (None when absent or invalid).
    RoundChange(SignedMessage, Option<PreparedCertificate>),
    /// The round timer fired. Stale timers carry a superseded token.
    Timeout(u64),
}

/// Requests the state machine sends to the caller for execution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SMRequest {
    /// Ask the node to build a proposal for the given round (proposer only).
    StartBuildProposal(Round),
    /// Ask the node to verify a received proposal.
    StartValidateProposal(Proposal, Round),
    /// Sign and broadcast a message; the signed copy must be looped back in
    /// as an event so our own vote is counted like any peer's.
    Broadcast(ConsensusMessage),
    /// Arm the round timer. `round` selects the backoff duration; a firing
    /// with an outdated token is ignored.
    ScheduleTimeout { round: Round, token: u64 },
    /// The height is decided; terminates this round-state lifecycle.
    DecisionReached(Decision),
}

/// State machine. Major assumptions:
/// 1. The single-height layer handles authentication, membership, proposer
///    and subject consistency checks.
/// 2. The machine must handle out-of-order events (e.g. votes that were
///    buffered before the proposal was adopted).
///
/// Each height is begun with a call to `start`, with no further calls to it.
pub(crate) struct StateMachine {
    height: BlockNumber,
    id: ValidatorId,
    validators: ValidatorSet,
    policy: ProposerPolicy,
    round: Round,
    round_state: RoundState,
    round_changes: RoundChangeSet,
    /// The highest-round prepared certificate known: our own lock or one
    /// adopted from a piggyback. Binding for every later round at this
    /// height.
    locked: Option<PreparedCertificate>,
    // When true, the state machine will wait for a FinishedBuilding event,
    // buffering all other input events in `events_queue`.
    awaiting_finished_building: bool,
    events_queue: VecDeque<StateMachineEvent>,
    timeout_token: u64,
    consecutive_timeouts: u32,
    decided: bool,
}

impl StateMachine {
    pub(crate) fn new(
        height: BlockNumber,
        id: ValidatorId,
        validators: ValidatorSet,
        policy: ProposerPolicy,
    ) -> Self {
        Self {
            height,
            id,
            validators,
            policy,
            round: 0,
            round_state: RoundState::new(View { height, round: 0 }),
            round_changes: RoundChangeSet::new(height),
            locked: None,
            awaiting_finished_building: false,
            events_queue: VecDeque::new(),
            timeout_token: 0,
            consecutive_timeouts: 0,
            decided: false,
        }
    }

    pub(crate) fn current_view(&self) -> View {
        View { height: self.height, round: self.round }
    }

    pub(crate) fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// The subject adopted for the current round, once a PRE-PREPARE was
    /// accepted.
    pub(crate) fn adopted_subject(&self) -> Option<Subject> {
        self.round_state.subject()
    }

    pub(crate) fn proposal_accepted(&self) -> bool {
        self.round_state.subject().is_some()
    }

    /// The digest this validator is bound to by a held prepared certificate.
    pub(crate) fn locked_digest(&self) -> Option<BlockDigest> {
        self.locked.as_ref().and_then(PreparedCertificate::subject).map(|subject| subject.digest)
    }

    fn proposer(&self) -> ValidatorId {
        self.validators.proposer(self.current_view(), self.policy)
    }

    /// Starts the state machine: enters round 0 of this height.
    pub(crate) fn start(&mut self) -> VecDeque<SMRequest> {
        self.begin_round()
    }

    /// Process the incoming event.
    ///
    /// While a proposal build is in flight all other incoming events are
    /// buffered until its [`FinishedBuilding`](StateMachineEvent::FinishedBuilding)
    /// arrives.
    ///
    /// Returns a set of requests for the caller to handle.
    pub(crate) fn handle_event(&mut self, event: StateMachineEvent) -> VecDeque<SMRequest> {
        if self.awaiting_finished_building {
            match event {
                StateMachineEvent::FinishedBuilding(_, round) if round == self.round => {
                    self.events_queue.push_front(event);
                }
                _ => {
                    self.events_queue.push_back(event);
                    return VecDeque::new();
                }
            }
        } else {
            self.events_queue.push_back(event);
        }

        self.handle_enqueued_events()
    }

    fn handle_enqueued_events(&mut self) -> VecDeque<SMRequest> {
        let mut output_requests = VecDeque::new();
        while let Some(event) = self.events_queue.pop_front() {
            let mut resultant_requests = self.handle_event_internal(event);
            while let Some(request) = resultant_requests.pop_front() {
                match request {
                    SMRequest::StartBuildProposal(_) => {
                        assert!(self.awaiting_finished_building);
                        output_requests.push_back(request);
                        // Remaining queued events wait for the build.
                        return output_requests;
                    }
                    SMRequest::DecisionReached(_) => {
                        output_requests.push_back(request);
                        return output_requests;
                    }
                    _ => output_requests.push_back(request),
                }
            }
        }
        output_requests
    }

    fn handle_event_internal(&mut self, event: StateMachineEvent) -> VecDeque<SMRequest> {
        trace!("Processing event: {:?}", event);
        if self.decided {
            // The height is done; residual events are noise.
            return VecDeque::new();
        }
        match event {
            StateMachineEvent::FinishedBuilding(proposal, round) => {
                self.handle_finished_building(proposal, round)
            }
            StateMachineEvent::FinishedValidation(digest, round) => {
                self.handle_finished_validation(digest, round)
            }
            StateMachineEvent::PrePrepare(signed) => self.handle_pre_prepare(signed),
            StateMachineEvent::Prepare(signed) => self.handle_prepare(signed),
            StateMachineEvent::Commit(signed) => self.handle_commit(signed),
            StateMachineEvent::RoundChange(signed, certificate) => {
                self.handle_round_change(signed, certificate)
            }
            StateMachineEvent::Timeout(token) => self.handle_timeout(token),
        }
    }

    fn handle_finished_building(
        &mut self,
        proposal: Option<Proposal>,
        round: Round,
    ) -> VecDeque<SMRequest> {
        assert!(self.awaiting_finished_building);
        assert_eq!(round, self.round, "rounds cannot advance while a build is in flight");
        self.awaiting_finished_building = false;
        let Some(proposal) = proposal else {
            warn!("BUILD_FAILED: no proposal for round {round}; awaiting round change");
            counter!(CONSENSUS_BUILD_PROPOSAL_FAILED).increment(1);
            return VecDeque::new();
        };
        let pre_prepare = PrePrepare { view: self.current_view(), proposal };
        // The loopback of our own broadcast adopts the proposal.
        VecDeque::from([SMRequest::Broadcast(ConsensusMessage::PrePrepare(pre_prepare))])
    }

    fn handle_pre_prepare(&mut self, signed: SignedMessage) -> VecDeque<SMRequest> {
        let ConsensusMessage::PrePrepare(pre_prepare) = signed.message.clone() else {
            debug_assert!(false, "mis-routed event");
            return VecDeque::new();
        };
        if pre_prepare.view.round != self.round {
            return VecDeque::new();
        }
        if self.round_state.phase() != Phase::NewRound || self.round_state.is_awaiting_validation()
        {
            debug!("Ignoring extra PRE-PREPARE for view {}", pre_prepare.view);
            return VecDeque::new();
        }
        if signed.sender == self.id {
            // Our own proposal, fresh or re-proposed from a certificate; no
            // external verification needed.
            return self.accept_pre_prepare(signed, pre_prepare.proposal);
        }
        counter!(CONSENSUS_PROPOSALS_RECEIVED).increment(1);
        self.round_state.set_awaiting_validation(signed, pre_prepare.proposal.clone());
        VecDeque::from([SMRequest::StartValidateProposal(pre_prepare.proposal, self.round)])
    }

    fn handle_finished_validation(
        &mut self,
        digest: Option<BlockDigest>,
        round: Round,
    ) -> VecDeque<SMRequest> {
        if round != self.round {
            return VecDeque::new();
        }
        let Some((signed, proposal)) = self.round_state.take_awaiting_validation() else {
            return VecDeque::new();
        };
        match digest {
            Some(digest) if digest == proposal.digest => self.accept_pre_prepare(signed, proposal),
            _ => {
                warn!(
                    "PROPOSAL_INVALID: proposal {} for round {round} failed verification",
                    proposal.digest
                );
                counter!(CONSENSUS_PROPOSALS_INVALID).increment(1);
                VecDeque::new()
            }
        }
    }

    fn accept_pre_prepare(
        &mut self,
        signed: SignedMessage,
        proposal: Proposal,
    ) -> VecDeque<SMRequest> {
        let subject = Subject { view: self.current_view(), digest: proposal.digest };
        info!("Accepted proposal {} for view {}", proposal.digest, subject.view);
        self.round_state.accept_pre_prepare(signed, proposal);
        let mut output = VecDeque::new();
        if self.id != self.proposer() {
            output.push_back(SMRequest::Broadcast(ConsensusMessage::Prepare(Prepare { subject })));
        }
        // Buffered votes may already form a quorum.
        output.append(&mut self.upon_prepare_quorum());
        output
    }

    fn handle_prepare(&mut self, signed: SignedMessage) -> VecDeque<SMRequest> {
        let ConsensusMessage::Prepare(prepare) = &signed.message else {
            debug_assert!(false, "mis-routed event");
            return VecDeque::new();
        };
        if prepare.subject.view.round != self.round {
            return VecDeque::new();
        }
        let Some(subject) = self.round_state.subject() else {
            return VecDeque::new();
        };
        if prepare.subject != subject {
            return VecDeque::new();
        }
        match self.round_state.insert_prepare(signed.clone()) {
            VoteInsertion::Duplicate => return VecDeque::new(),
            VoteInsertion::Equivocation => {
                warn!("Conflicting PREPARE from {}", signed.sender);
                counter!(CONSENSUS_CONFLICTING_VOTES).increment(1);
                return VecDeque::new();
            }
            VoteInsertion::Inserted => {}
        }
        self.upon_prepare_quorum()
    }

    fn upon_prepare_quorum(&mut self) -> VecDeque<SMRequest> {
        if self.round_state.phase() != Phase::PrePrepared {
            return VecDeque::new();
        }
        let proposer = self.proposer();
        if self.round_state.prepare_weight(&proposer) < self.validators.quorum_size() {
            return VecDeque::new();
        }
        let certificate = self.round_state.lock(&proposer);
        let subject = certificate.subject().expect("a locked certificate has a subject");
        info!("PREPARED: locked {} with {} votes", subject, certificate.prepares.len() + 1);
        counter!(CONSENSUS_NEW_VALUE_LOCKS).increment(1);
        self.locked = Some(certificate);
        let mut output =
            VecDeque::from([SMRequest::Broadcast(ConsensusMessage::Commit(Commit { subject }))]);
        // Buffered commits may already form a quorum.
        output.append(&mut self.upon_commit_quorum());
        output
    }

    fn handle_commit(&mut self, signed: SignedMessage) -> VecDeque<SMRequest> {
        let ConsensusMessage::Commit(commit) = &signed.message else {
            debug_assert!(false, "mis-routed event");
            return VecDeque::new();
        };
        if commit.subject.view.round != self.round {
            return VecDeque::new();
        }
        let Some(subject) = self.round_state.subject() else {
            return VecDeque::new();
        };
        if commit.subject != subject {
            return VecDeque::new();
        }
        match self.round_state.insert_commit(signed.clone()) {
            VoteInsertion::Duplicate => return VecDeque::new(),
            VoteInsertion::Equivocation => {
                warn!("Conflicting COMMIT from {}", signed.sender);
                counter!(CONSENSUS_CONFLICTING_VOTES).increment(1);
                return VecDeque::new();
            }
            VoteInsertion::Inserted => {}
        }
        self.upon_commit_quorum()
    }

    fn upon_commit_quorum(&mut self) -> VecDeque<SMRequest> {
        if self.round_state.phase() != Phase::Prepared {
            return VecDeque::new();
        }
        if self.round_state.commit_weight() < self.validators.quorum_size() {
            return VecDeque::new();
        }
        self.round_state.set_committed();
        self.decided = true;
        let proposal =
            self.round_state.proposal().expect("a committed round has a proposal").clone();
        let commits = self.round_state.commit_votes();
        info!(
            "COMMITTED: height {} decided on {} in round {} with {} commits",
            self.height,
            proposal.digest,
            self.round,
            commits.len()
        );
        VecDeque::from([SMRequest::DecisionReached(Decision {
            proposal,
            commits,
            round: self.round,
        })])
    }

    fn handle_round_change(
        &mut self,
        signed: SignedMessage,
        certificate: Option<PreparedCertificate>,
    ) -> VecDeque<SMRequest> {
        let ConsensusMessage::RoundChange(round_change) = &signed.message else {
            debug_assert!(false, "mis-routed event");
            return VecDeque::new();
        };
        if round_change.view.height != self.height {
            return VecDeque::new();
        }
        let target = round_change.view.round;
        if target < self.round {
            return VecDeque::new();
        }
        let had_certificate = certificate.is_some();
        if let Some(certificate) = certificate {
            self.adopt_certificate(certificate);
        }
        match self.round_changes.insert(target, signed.clone()) {
            VoteInsertion::Equivocation => {
                debug!("Sender {} changed its ROUND-CHANGE for round {target}", signed.sender);
                return VecDeque::new();
            }
            VoteInsertion::Duplicate | VoteInsertion::Inserted => {}
        }
        if target > self.round {
            if self.round_changes.certificate(target, self.validators.quorum_size()).is_some() {
                info!("Round change quorum for round {target}");
                return self.advance_to_round(target);
            }
            if had_certificate {
                // Someone already prepared a value at a higher round; follow
                // the evidence rather than wait for a full quorum.
                info!("Jumping to round {target} on a certified ROUND-CHANGE");
                return self.advance_to_round(target);
            }
            // Peers several rounds past us mean we fell behind; once f+1
            // distinct validators want rounds beyond our next one, catch up
            // to the smallest of those instead of waiting out the quorum.
            if self.round_changes.senders_above(self.round + 1) > self.validators.fault_tolerance()
            {
                if let Some(min_target) = self.round_changes.min_target_above(self.round + 1) {
                    info!("Catching up to round {min_target} behind f+1 round changes");
                    return self.advance_to_round(min_target);
                }
            }
        }
        VecDeque::new()
    }

    /// Keeps the highest-round prepared certificate: once any honest
    /// validator could have prepared a value, no later round may finalize a
    /// conflicting one.
    fn adopt_certificate(&mut self, certificate: PreparedCertificate) {
        let Some(subject) = certificate.subject() else {
            return;
        };
        let better = match self.locked.as_ref().and_then(PreparedCertificate::subject) {
            None => true,
            Some(held) => subject.view.round > held.view.round,
        };
        if better {
            debug!("Adopting prepared certificate for {subject}");
            self.locked = Some(certificate);
        }
    }

    fn handle_timeout(&mut self, token: u64) -> VecDeque<SMRequest> {
        if token != self.timeout_token {
            // A newer round's timer superseded this one.
            return VecDeque::new();
        }
        if self.round_state.phase() == Phase::Committed {
            return VecDeque::new();
        }
        warn!(
            "ROUND_TIMEOUT: view {} made no progress, requesting round change",
            self.current_view()
        );
        counter!(CONSENSUS_TIMEOUTS).increment(1);
        self.consecutive_timeouts += 1;
        let round_change = RoundChange {
            view: View { height: self.height, round: self.round + 1 },
            prepared: self.locked.clone(),
        };
        let mut output =
            VecDeque::from([SMRequest::Broadcast(ConsensusMessage::RoundChange(round_change))]);
        // Re-arm; repeated timeouts at one round keep backing off.
        self.timeout_token += 1;
        output.push_back(SMRequest::ScheduleTimeout {
            round: self.round + self.consecutive_timeouts,
            token: self.timeout_token,
        });
        output
    }

    fn advance_to_round(&mut self, round: Round) -> VecDeque<SMRequest> {
        assert!(round > self.round, "rounds only move forward");
        counter!(CONSENSUS_ROUND_CHANGES).increment(1);
        info!("ROUND_ADVANCE: {} -> round {round}", self.current_view());
        self.round = round;
        self.consecutive_timeouts = 0;
        self.round_state = RoundState::new(View { height: self.height, round });
        self.round_changes.prune_below(round);
        self.begin_round()
    }

    fn begin_round(&mut self) -> VecDeque<SMRequest> {
        gauge!(CONSENSUS_ROUND).set(f64::from(self.round));
        self.timeout_token += 1;
        let mut output = VecDeque::from([SMRequest::ScheduleTimeout {
            round: self.round,
            token: self.timeout_token,
        }]);
        let view = self.current_view();
        if self.proposer() == self.id {
            match self.locked.as_ref().and_then(PreparedCertificate::proposal) {
                Some(proposal) => {
                    info!("START_ROUND_PROPOSER: re-proposing the prepared value for {view}");
                    output.push_back(SMRequest::Broadcast(ConsensusMessage::PrePrepare(
                        PrePrepare { view, proposal: proposal.clone() },
                    )));
                }
                None => {
                    info!("START_ROUND_PROPOSER: building a proposal for {view}");
                    self.awaiting_finished_building = true;
                    output.push_back(SMRequest::StartBuildProposal(self.round));
                }
            }
        } else {
            info!("START_ROUND_VALIDATOR: waiting for the proposer of {view}");
        }
        output
    }
}
