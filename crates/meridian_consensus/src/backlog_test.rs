use meridian_api::block::BlockNumber;
use meridian_consensus_config::config::BacklogConfig;
use meridian_protobuf::consensus::{MessageKind, Subject, View};
use pretty_assertions::assert_eq;

use crate::backlog::Backlog;
use crate::test_utils::{commit_msg, pre_prepare_msg, prepare_msg, test_proposal, test_validators};

fn config() -> BacklogConfig {
    BacklogConfig { future_height_limit: 10, future_round_limit: 10, max_per_sender: 3 }
}

#[test]
fn replay_orders_by_view_then_kind_then_arrival() {
    let ids = test_validators(4);
    let current = View::new(BlockNumber(4), 0);
    let target = View::new(BlockNumber(5), 0);
    let proposal = test_proposal(target.height, 1);
    let subject = Subject { view: target, digest: proposal.digest };
    let mut backlog = Backlog::new(config());

    // Arrive out of order: commit, two prepares, then the pre-prepare.
    backlog.enqueue(current, commit_msg(subject, ids[3]));
    backlog.enqueue(current, prepare_msg(subject, ids[2]));
    backlog.enqueue(current, prepare_msg(subject, ids[3]));
    backlog.enqueue(current, pre_prepare_msg(target, proposal, ids[1]));

    let replayed = backlog.drain(target, true);
    let kinds: Vec<_> = replayed.iter().map(|m| m.message.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::PrePrepare,
            MessageKind::Prepare,
            MessageKind::Prepare,
            MessageKind::Commit
        ]
    );
    // Equal view and kind replay in arrival order.
    assert_eq!(replayed[1].sender, ids[2]);
    assert_eq!(replayed[2].sender, ids[3]);
}

#[test]
fn drain_keeps_still_future_entries_and_discards_old_ones() {
    let ids = test_validators(4);
    let current = View::new(BlockNumber(4), 0);
    let mut backlog = Backlog::new(config());
    for height in [3u64, 5, 6] {
        let view = View::new(BlockNumber(height), 0);
        let proposal = test_proposal(view.height, 1);
        backlog.enqueue(current, pre_prepare_msg(view, proposal, ids[1]));
    }
    // Height 3 is already finalized: lazily discarded. Height 6 stays.
    let replayed = backlog.drain(View::new(BlockNumber(5), 0), false);
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].message.view().height, BlockNumber(5));
    assert_eq!(backlog.len(), 1);
}

#[test]
fn votes_wait_for_proposal_adoption() {
    let ids = test_validators(4);
    let view = View::new(BlockNumber(5), 0);
    let digest = test_proposal(view.height, 1).digest;
    let mut backlog = Backlog::new(config());
    backlog.enqueue(view, prepare_msg(Subject { view, digest }, ids[2]));

    assert!(backlog.drain(view, false).is_empty());
    assert_eq!(backlog.drain(view, true).len(), 1);
}

#[test]
fn per_sender_cap_evicts_oldest_first() {
    let ids = test_validators(4);
    let current = View::new(BlockNumber(4), 0);
    let mut backlog = Backlog::new(config());
    for round in 0..5u32 {
        let view = View::new(BlockNumber(5), round);
        let digest = test_proposal(view.height, 1).digest;
        backlog.enqueue(current, prepare_msg(Subject { view, digest }, ids[2]));
    }
    assert_eq!(backlog.len(), 3);
    let replayed = backlog.drain(View::new(BlockNumber(5), 4), true);
    // Rounds 0 and 1 were evicted; rounds 2 and 3 became old during drain.
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].message.view().round, 4);
}

#[test]
fn messages_too_far_ahead_are_dropped() {
    let ids = test_validators(4);
    let current = View::new(BlockNumber(4), 0);
    let mut backlog = Backlog::new(config());
    let too_far = View::new(BlockNumber(20), 0);
    backlog.enqueue(current, pre_prepare_msg(too_far, test_proposal(too_far.height, 1), ids[1]));
    assert_eq!(backlog.len(), 0);

    let rounds_ahead = View::new(BlockNumber(4), 15);
    let digest = test_proposal(BlockNumber(4), 1).digest;
    backlog.enqueue(current, prepare_msg(Subject { view: rounds_ahead, digest }, ids[1]));
    assert_eq!(backlog.len(), 0);
}
