//! Randomized delivery-order simulation for the consensus core.
//!
//! One node under test runs the real single-height pipeline; peers (some
//! faulty) are scripted. Messages are delivered in a seeded random order,
//! with a miniature manager handling classification and buffering the way
//! the real one does. Whatever the order and whatever up to f validators do,
//! the node must decide on the honest proposal.

use std::collections::VecDeque;
use std::sync::Arc;

use meridian_api::block::BlockNumber;
use meridian_consensus_config::config::ProposerPolicy;
use meridian_protobuf::consensus::{Proposal, SignedMessage, Subject, View};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use test_case::test_case;

use crate::single_height_consensus::{ShcRequest, ShcReturn, SingleHeightConsensus};
use crate::state_machine::StateMachineEvent;
use crate::test_utils::{
    commit_msg,
    pre_prepare_msg,
    prepare_msg,
    round_change_msg,
    test_proposal,
    test_validators,
    TestSigner,
};
use crate::types::{Decision, ValidationError, ValidatorId};
use crate::validation::check_message_view;
use crate::validator_set::ValidatorSet;

const HEIGHT: BlockNumber = BlockNumber(5);
const SEEDS: u64 = 20;

/// Types of faulty behavior that peers can exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultType {
    /// Sends no messages.
    Offline,
    /// Votes for a digest nobody proposed.
    WrongDigestVoter,
    /// Sends two conflicting votes for the same round.
    Equivocator,
    /// Sends a proposal even when it is not its turn.
    UnauthorizedProposer,
    /// Sends votes with an identity outside the validator set.
    NonValidator,
}

/// Drives the node under test the way the manager would: classify, buffer
/// futures, answer validation requests, fire the round timer when the
/// network goes quiet. Panics if the node never decides.
struct Harness {
    shc: SingleHeightConsensus,
    undelivered: VecDeque<SignedMessage>,
    buffered: Vec<SignedMessage>,
    latest_timeout: Option<u64>,
}

impl Harness {
    fn new(id: ValidatorId, messages: Vec<SignedMessage>) -> Self {
        let mut harness = Harness {
            shc: SingleHeightConsensus::new(
                HEIGHT,
                id,
                ValidatorSet::new(test_validators(4)).unwrap(),
                ProposerPolicy::RoundRobin,
                Arc::new(TestSigner { id }),
            ),
            undelivered: messages.into(),
            buffered: Vec::new(),
            latest_timeout: None,
        };
        let ret = harness.shc.start().unwrap();
        assert!(harness.absorb(ret).is_none(), "cannot decide before any message");
        harness
    }

    fn run(mut self) -> Decision {
        // Each sweep delivers everything deliverable; the timer fires between
        // sweeps, as it would when the network goes quiet.
        for _ in 0..10 {
            if let Some(decision) = self.deliver_all() {
                return decision;
            }
            if let Some(token) = self.latest_timeout.take() {
                let ret = self.shc.handle_event(StateMachineEvent::Timeout(token)).unwrap();
                if let Some(decision) = self.absorb(ret) {
                    return decision;
                }
            }
        }
        panic!("no decision despite honest quorum");
    }

    /// Delivers and replays until neither new input nor buffered messages
    /// make progress; what remains waits for the round timer.
    fn deliver_all(&mut self) -> Option<Decision> {
        loop {
            if let Some(decision) = self.deliver_round() {
                return Some(decision);
            }
            if self.buffered.is_empty() {
                return None;
            }
            let before = self.buffered.len();
            self.undelivered.extend(std::mem::take(&mut self.buffered));
            if let Some(decision) = self.deliver_round() {
                return Some(decision);
            }
            if self.buffered.len() >= before {
                return None;
            }
        }
    }

    fn deliver_round(&mut self) -> Option<Decision> {
        while let Some(message) = self.undelivered.pop_front() {
            match check_message_view(
                &message.message,
                self.shc.current_view(),
                self.shc.proposal_accepted(),
            ) {
                Err(ValidationError::OldMessage) => continue,
                Err(_) => self.buffered.push(message),
                Ok(()) => {
                    let ret = self.shc.handle_message(message).unwrap();
                    if let Some(decision) = self.absorb(ret) {
                        return Some(decision);
                    }
                }
            }
        }
        None
    }

    fn absorb(&mut self, ret: ShcReturn) -> Option<Decision> {
        let requests = match ret {
            ShcReturn::Requests(requests) => requests,
            ShcReturn::Decision(_, decision) => return Some(decision),
        };
        for request in requests {
            match request {
                // Every scripted proposal is a valid block in this world.
                ShcRequest::StartValidateProposal(proposal, round) => {
                    let ret = self
                        .shc
                        .handle_event(StateMachineEvent::FinishedValidation(
                            Some(proposal.digest),
                            round,
                        ))
                        .unwrap();
                    if let Some(decision) = self.absorb(ret) {
                        return Some(decision);
                    }
                }
                ShcRequest::ScheduleTimeout { token, .. } => {
                    self.latest_timeout = Some(token);
                }
                ShcRequest::Broadcast(_) | ShcRequest::StartBuildProposal(_) => {}
            }
        }
        None
    }
}

/// Honest traffic for one round: the proposal plus prepares and commits from
/// every honest peer.
fn honest_round(round: u32, proposal: &Proposal, honest: &[ValidatorId]) -> Vec<SignedMessage> {
    let view = View { height: HEIGHT, round };
    let subject = Subject { view, digest: proposal.digest };
    let proposer = ValidatorSet::new(test_validators(4))
        .unwrap()
        .proposer(view, ProposerPolicy::RoundRobin);
    let mut messages = vec![pre_prepare_msg(view, proposal.clone(), proposer)];
    for id in honest {
        if *id != proposer {
            messages.push(prepare_msg(subject, *id));
        }
        messages.push(commit_msg(subject, *id));
    }
    messages
}

fn faulty_traffic(fault: FaultType, faulty: ValidatorId, round: u32) -> Vec<SignedMessage> {
    let view = View { height: HEIGHT, round };
    let wrong = Subject { view, digest: test_proposal(HEIGHT, 99).digest };
    match fault {
        FaultType::Offline => vec![],
        FaultType::WrongDigestVoter => {
            vec![prepare_msg(wrong, faulty), commit_msg(wrong, faulty)]
        }
        FaultType::Equivocator => {
            let real = Subject { view, digest: test_proposal(HEIGHT, 1).digest };
            vec![
                prepare_msg(real, faulty),
                prepare_msg(wrong, faulty),
                commit_msg(real, faulty),
                commit_msg(wrong, faulty),
            ]
        }
        FaultType::UnauthorizedProposer => {
            vec![pre_prepare_msg(view, test_proposal(HEIGHT, 99), faulty)]
        }
        FaultType::NonValidator => {
            let outsider = test_validators(6)[5];
            vec![prepare_msg(wrong, outsider), commit_msg(wrong, outsider)]
        }
    }
}

#[test_case(FaultType::Offline; "offline")]
#[test_case(FaultType::WrongDigestVoter; "wrong digest voter")]
#[test_case(FaultType::Equivocator; "equivocator")]
#[test_case(FaultType::UnauthorizedProposer; "unauthorized proposer")]
#[test_case(FaultType::NonValidator; "non validator")]
fn decides_on_the_honest_proposal_despite_one_fault(fault: FaultType) {
    let ids = test_validators(4);
    // We are ids[0]; the proposer of (5, 0) is ids[1]; ids[2] is faulty.
    let proposal = test_proposal(HEIGHT, 1);
    let honest = [ids[0], ids[1], ids[3]];

    for seed in 0..SEEDS {
        let mut messages = honest_round(0, &proposal, &honest);
        messages.extend(faulty_traffic(fault, ids[2], 0));
        let mut rng = StdRng::seed_from_u64(seed);
        messages.shuffle(&mut rng);

        let decision = Harness::new(ids[0], messages).run();
        assert_eq!(decision.proposal.digest, proposal.digest, "seed {seed}");
        assert_eq!(decision.round, 0, "seed {seed}");
        assert!(decision.commits.len() >= 3, "seed {seed}");
    }
}

#[test]
fn partitioned_proposer_recovers_in_the_next_round() {
    let ids = test_validators(4);
    // The proposer of (5, 0), ids[1], is partitioned away. The remaining
    // three time out, change rounds, and decide behind the round 1 proposer.
    let proposal = test_proposal(HEIGHT, 2);
    let honest = [ids[0], ids[2], ids[3]];
    let target = View { height: HEIGHT, round: 1 };

    for seed in 0..SEEDS {
        // Peer round changes; our own is produced by our timer.
        let mut messages = vec![
            round_change_msg(target, None, ids[2]),
            round_change_msg(target, None, ids[3]),
        ];
        messages.extend(honest_round(1, &proposal, &honest));
        let mut rng = StdRng::seed_from_u64(seed);
        messages.shuffle(&mut rng);

        let decision = Harness::new(ids[0], messages).run();
        assert_eq!(decision.proposal.digest, proposal.digest, "seed {seed}");
        assert_eq!(decision.round, 1, "seed {seed}");
    }
}
