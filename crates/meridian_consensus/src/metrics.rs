use metrics::{describe_counter, describe_gauge, gauge};

pub(crate) const CONSENSUS_BLOCK_NUMBER: &str = "consensus_block_number";
pub(crate) const CONSENSUS_ROUND: &str = "consensus_round";
pub(crate) const CONSENSUS_ROUND_CHANGES: &str = "consensus_round_changes";
pub(crate) const CONSENSUS_TIMEOUTS: &str = "consensus_timeouts";
pub(crate) const CONSENSUS_DECISIONS_REACHED_BY_CONSENSUS: &str =
    "consensus_decisions_reached_by_consensus";
pub(crate) const CONSENSUS_DECISIONS_REACHED_BY_SYNC: &str = "consensus_decisions_reached_by_sync";
pub(crate) const CONSENSUS_PROPOSALS_RECEIVED: &str = "consensus_proposals_received";
pub(crate) const CONSENSUS_PROPOSALS_INVALID: &str = "consensus_proposals_invalid";
pub(crate) const CONSENSUS_BUILD_PROPOSAL_FAILED: &str = "consensus_build_proposal_failed";
pub(crate) const CONSENSUS_INVALID_MESSAGES: &str = "consensus_invalid_messages";
pub(crate) const CONSENSUS_CONFLICTING_VOTES: &str = "consensus_conflicting_votes";
pub(crate) const CONSENSUS_CACHED_MESSAGES: &str = "consensus_cached_messages";
pub(crate) const CONSENSUS_NEW_VALUE_LOCKS: &str = "consensus_new_value_locks";

// Gauges are f64-valued; counts lose nothing that matters here.
#[allow(clippy::as_conversions)]
pub(crate) fn set_gauge(name: &'static str, value: u64) {
    gauge!(name).set(value as f64);
}

pub(crate) fn register_metrics() {
    describe_gauge!(CONSENSUS_BLOCK_NUMBER, "The block number consensus is working to decide");
    describe_gauge!(CONSENSUS_ROUND, "The round of the state machine");
    describe_counter!(CONSENSUS_ROUND_CHANGES, "The total number of round advances");
    describe_counter!(CONSENSUS_TIMEOUTS, "The number of times a round timed out");
    describe_counter!(
        CONSENSUS_DECISIONS_REACHED_BY_CONSENSUS,
        "The total number of decisions reached by way of consensus"
    );
    describe_counter!(
        CONSENSUS_DECISIONS_REACHED_BY_SYNC,
        "The total number of decisions reached by way of sync"
    );
    describe_counter!(CONSENSUS_PROPOSALS_RECEIVED, "The total number of proposals received");
    describe_counter!(
        CONSENSUS_PROPOSALS_INVALID,
        "The total number of proposals that failed validation"
    );
    describe_counter!(
        CONSENSUS_BUILD_PROPOSAL_FAILED,
        "The number of proposals that failed to be built"
    );
    describe_counter!(
        CONSENSUS_INVALID_MESSAGES,
        "The number of inbound messages dropped by validation"
    );
    describe_counter!(
        CONSENSUS_CONFLICTING_VOTES,
        "The number of times consensus has received conflicting votes"
    );
    describe_gauge!(
        CONSENSUS_CACHED_MESSAGES,
        "How many not-yet-actionable messages are buffered"
    );
    describe_counter!(
        CONSENSUS_NEW_VALUE_LOCKS,
        "The number of times consensus has locked a prepared certificate"
    );
}
