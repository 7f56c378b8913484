use std::collections::VecDeque;
use std::sync::Arc;

use lazy_static::lazy_static;
use meridian_api::block::BlockNumber;
use meridian_api::crypto::RawSignature;
use meridian_consensus_config::config::ProposerPolicy;
use meridian_protobuf::consensus::{ConsensusMessage, MessageKind, Proposal, Subject, View};
use pretty_assertions::assert_eq;

use super::{ShcRequest, ShcReturn, SingleHeightConsensus};
use crate::state_machine::StateMachineEvent;
use crate::test_utils::{
    commit_msg,
    pre_prepare_msg,
    prepare_msg,
    prepared_certificate,
    round_change_msg,
    test_proposal,
    test_validators,
    TestSigner,
};
use crate::types::ValidatorId;
use crate::validator_set::ValidatorSet;

const HEIGHT: BlockNumber = BlockNumber(5);

lazy_static! {
    static ref VALIDATORS: Vec<ValidatorId> = test_validators(4);
    // Under round robin the proposer of (5, 0) is VALIDATORS[1].
    static ref PROPOSER_ID: ValidatorId = VALIDATORS[1];
    static ref PROPOSAL: Proposal = test_proposal(HEIGHT, 1);
    static ref SUBJECT: Subject =
        Subject { view: View::new(HEIGHT, 0), digest: PROPOSAL.digest };
}

fn shc(id: ValidatorId) -> SingleHeightConsensus {
    SingleHeightConsensus::new(
        HEIGHT,
        id,
        ValidatorSet::new(VALIDATORS.clone()).unwrap(),
        ProposerPolicy::RoundRobin,
        Arc::new(TestSigner { id }),
    )
}

fn requests(ret: ShcReturn) -> VecDeque<ShcRequest> {
    match ret {
        ShcReturn::Requests(requests) => requests,
        other => panic!("expected requests, got {other:?}"),
    }
}

fn broadcast_kinds(requests: &VecDeque<ShcRequest>) -> Vec<MessageKind> {
    requests
        .iter()
        .filter_map(|request| match request {
            ShcRequest::Broadcast(message) => Some(message.message.kind()),
            _ => None,
        })
        .collect()
}

#[test]
fn proposer() {
    let mut shc = shc(*PROPOSER_ID);
    // Start should request to build a proposal.
    let start_requests = requests(shc.start().unwrap());
    assert!(start_requests
        .iter()
        .any(|request| matches!(request, ShcRequest::StartBuildProposal(0))));

    // After the build our PRE-PREPARE goes out, already signed.
    let reqs = requests(
        shc.handle_event(StateMachineEvent::FinishedBuilding(Some(PROPOSAL.clone()), 0)).unwrap(),
    );
    assert_eq!(broadcast_kinds(&reqs), vec![MessageKind::PrePrepare]);
    assert!(shc.proposal_accepted());

    // Two explicit prepares plus our implicit one reach quorum; we lock and
    // broadcast a COMMIT.
    let reqs =
        requests(shc.handle_message(prepare_msg(*SUBJECT, VALIDATORS[2])).unwrap());
    assert!(reqs.is_empty());
    let reqs =
        requests(shc.handle_message(prepare_msg(*SUBJECT, VALIDATORS[3])).unwrap());
    assert_eq!(broadcast_kinds(&reqs), vec![MessageKind::Commit]);

    // Our commit looped back already; two more decide the height.
    let reqs = requests(shc.handle_message(commit_msg(*SUBJECT, VALIDATORS[2])).unwrap());
    assert!(reqs.is_empty());
    match shc.handle_message(commit_msg(*SUBJECT, VALIDATORS[3])).unwrap() {
        ShcReturn::Decision(_, decision) => {
            assert_eq!(decision.proposal.digest, PROPOSAL.digest);
            assert_eq!(decision.round, 0);
            assert_eq!(decision.commits.len(), 3);
        }
        other => panic!("expected a decision, got {other:?}"),
    }
}

#[test]
fn validator() {
    let mut shc = shc(VALIDATORS[2]);
    let start_requests = requests(shc.start().unwrap());
    assert!(matches!(
        start_requests.front(),
        Some(ShcRequest::ScheduleTimeout { round: 0, .. })
    ));

    // Accepting the proposer's PRE-PREPARE requests block verification.
    let reqs = requests(
        shc.handle_message(pre_prepare_msg(View::new(HEIGHT, 0), PROPOSAL.clone(), *PROPOSER_ID))
            .unwrap(),
    );
    assert!(reqs.iter().any(|request| matches!(
        request,
        ShcRequest::StartValidateProposal(proposal, 0) if proposal.digest == PROPOSAL.digest
    )));

    // Verification done: we prepare.
    let reqs = requests(
        shc.handle_event(StateMachineEvent::FinishedValidation(Some(PROPOSAL.digest), 0))
            .unwrap(),
    );
    assert_eq!(broadcast_kinds(&reqs), vec![MessageKind::Prepare]);

    // One more prepare reaches quorum (proposer implicit + ours + theirs).
    let reqs = requests(shc.handle_message(prepare_msg(*SUBJECT, VALIDATORS[3])).unwrap());
    assert_eq!(broadcast_kinds(&reqs), vec![MessageKind::Commit]);

    let _ = shc.handle_message(commit_msg(*SUBJECT, *PROPOSER_ID)).unwrap();
    match shc.handle_message(commit_msg(*SUBJECT, VALIDATORS[3])).unwrap() {
        ShcReturn::Decision(_, decision) => assert_eq!(decision.proposal.digest, PROPOSAL.digest),
        other => panic!("expected a decision, got {other:?}"),
    }
}

#[test]
fn pre_prepare_from_a_non_proposer_is_dropped() {
    let mut shc = shc(VALIDATORS[3]);
    shc.start().unwrap();
    // Correctly signed, but VALIDATORS[2] is not the proposer of (5, 0).
    let reqs = requests(
        shc.handle_message(pre_prepare_msg(View::new(HEIGHT, 0), PROPOSAL.clone(), VALIDATORS[2]))
            .unwrap(),
    );
    assert!(reqs.is_empty());
    assert!(!shc.proposal_accepted());
}

#[test]
fn forged_sender_is_dropped() {
    let mut shc = shc(VALIDATORS[3]);
    shc.start().unwrap();
    shc.handle_message(pre_prepare_msg(View::new(HEIGHT, 0), PROPOSAL.clone(), *PROPOSER_ID))
        .unwrap();
    shc.handle_event(StateMachineEvent::FinishedValidation(Some(PROPOSAL.digest), 0)).unwrap();

    // A prepare claiming VALIDATORS[2] but signed by VALIDATORS[0].
    let mut forged = prepare_msg(*SUBJECT, VALIDATORS[2]);
    forged.signature = RawSignature(VALIDATORS[0].as_bytes().to_vec());
    let reqs = requests(shc.handle_message(forged).unwrap());
    assert!(reqs.is_empty());

    // The vote did not count: a single further prepare still locks, meaning
    // the forged one was never recorded.
    let reqs = requests(shc.handle_message(prepare_msg(*SUBJECT, VALIDATORS[0])).unwrap());
    assert_eq!(broadcast_kinds(&reqs), vec![MessageKind::Commit]);
}

#[test]
fn inconsistent_subject_votes_are_dropped() {
    let mut shc = shc(VALIDATORS[3]);
    shc.start().unwrap();
    shc.handle_message(pre_prepare_msg(View::new(HEIGHT, 0), PROPOSAL.clone(), *PROPOSER_ID))
        .unwrap();
    shc.handle_event(StateMachineEvent::FinishedValidation(Some(PROPOSAL.digest), 0)).unwrap();

    let other = Subject { view: View::new(HEIGHT, 0), digest: test_proposal(HEIGHT, 9).digest };
    let reqs = requests(shc.handle_message(prepare_msg(other, VALIDATORS[2])).unwrap());
    assert!(reqs.is_empty());
    // Proposer implicit + ours: the dropped vote left us below quorum.
    assert_eq!(shc.current_view(), View::new(HEIGHT, 0));
}

#[test]
fn invalid_piggyback_does_not_void_the_round_change() {
    // We are VALIDATORS[2], the proposer of (5, 1).
    let mut shc = shc(VALIDATORS[2]);
    shc.start().unwrap();

    let target = View::new(HEIGHT, 1);
    // A certificate without quorum is invalid and must be stripped.
    let bad_certificate = prepared_certificate(
        View::new(HEIGHT, 0),
        PROPOSAL.clone(),
        *PROPOSER_ID,
        &[VALIDATORS[0]],
    );
    let reqs = requests(
        shc.handle_message(round_change_msg(target, Some(bad_certificate), VALIDATORS[0]))
            .unwrap(),
    );
    // Had the certificate been accepted we would have jumped to round 1.
    assert!(reqs.is_empty());
    assert_eq!(shc.current_view().round, 0);

    // The vote itself still counts toward the quorum of three.
    shc.handle_message(round_change_msg(target, None, VALIDATORS[1])).unwrap();
    let reqs =
        requests(shc.handle_message(round_change_msg(target, None, VALIDATORS[3])).unwrap());
    assert_eq!(shc.current_view().round, 1);
    // No certificate survived, so the round 1 proposal is freshly built.
    assert!(reqs.iter().any(|request| matches!(request, ShcRequest::StartBuildProposal(1))));
}

#[test]
fn valid_piggyback_binds_the_new_round() {
    // We are VALIDATORS[2], the proposer of (5, 1).
    let mut shc = shc(VALIDATORS[2]);
    shc.start().unwrap();

    let certificate = prepared_certificate(
        View::new(HEIGHT, 0),
        PROPOSAL.clone(),
        *PROPOSER_ID,
        &[VALIDATORS[0], VALIDATORS[3]],
    );
    let reqs = requests(
        shc.handle_message(round_change_msg(View::new(HEIGHT, 1), Some(certificate), VALIDATORS[3]))
            .unwrap(),
    );
    assert_eq!(shc.current_view().round, 1);
    // The prepared value is re-proposed by us instead of a fresh block.
    let re_proposed = reqs
        .iter()
        .find_map(|request| match request {
            ShcRequest::Broadcast(signed) => match &signed.message {
                ConsensusMessage::PrePrepare(pre_prepare) => Some(pre_prepare.clone()),
                _ => None,
            },
            _ => None,
        })
        .expect("expected a re-proposal");
    assert_eq!(re_proposed.proposal.digest, PROPOSAL.digest);
    assert!(shc.proposal_accepted());
}

#[test]
fn timeout_tracks_the_latest_round_change() {
    let mut shc = shc(VALIDATORS[3]);
    let start_requests = requests(shc.start().unwrap());
    let token = start_requests
        .iter()
        .find_map(|request| match request {
            ShcRequest::ScheduleTimeout { token, .. } => Some(*token),
            _ => None,
        })
        .expect("expected a scheduled timeout");
    assert!(shc.latest_round_change().is_none());

    let reqs = requests(shc.handle_event(StateMachineEvent::Timeout(token)).unwrap());
    assert_eq!(broadcast_kinds(&reqs), vec![MessageKind::RoundChange]);
    let latest = shc.latest_round_change().expect("round change should be retained");
    assert_eq!(latest.message.view(), View::new(HEIGHT, 1));
    assert_eq!(latest.sender, VALIDATORS[3]);
}
