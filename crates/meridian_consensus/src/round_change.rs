//! Collection of ROUND-CHANGE votes and the certificates built from them.
//!
//! Votes are keyed by target round and span rounds: they survive round
//! advances within a height (unlike `RoundState`, which is discarded), and
//! only entries for rounds at or below the engine's current round are pruned.

use std::collections::{BTreeMap, HashMap, HashSet};

use meridian_api::block::BlockNumber;
use meridian_protobuf::consensus::{ConsensusMessage, SignedMessage, View};

use crate::round_state::VoteInsertion;
use crate::types::{Round, ValidatorId};

#[cfg(test)]
#[path = "round_change_test.rs"]
mod round_change_test;

/// Quorum evidence that the network agreed to advance to a round: one
/// ROUND-CHANGE message per distinct validator, all targeting the same view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RoundChangeCertificate {
    pub round_changes: Vec<SignedMessage>,
}

impl RoundChangeCertificate {
    /// Structural validity: quorum-sized, distinct signers, one target view.
    /// The individual messages were validated on receipt.
    pub(crate) fn is_well_formed(&self, target: View, quorum: usize) -> bool {
        let mut signers = HashSet::new();
        for message in &self.round_changes {
            match &message.message {
                ConsensusMessage::RoundChange(round_change) if round_change.view == target => {}
                _ => return false,
            }
            if !signers.insert(message.sender) {
                return false;
            }
        }
        signers.len() >= quorum
    }
}

/// ROUND-CHANGE votes received for one height, keyed by target round.
#[derive(Debug)]
pub(crate) struct RoundChangeSet {
    height: BlockNumber,
    votes: BTreeMap<Round, HashMap<ValidatorId, SignedMessage>>,
}

impl RoundChangeSet {
    pub(crate) fn new(height: BlockNumber) -> Self {
        Self { height, votes: BTreeMap::new() }
    }

    /// Records a ROUND-CHANGE vote for its target round, deduplicated by
    /// sender.
    pub(crate) fn insert(&mut self, target: Round, signed: SignedMessage) -> VoteInsertion {
        debug_assert_eq!(signed.message.view().height, self.height);
        let entry = self.votes.entry(target).or_default();
        match entry.get(&signed.sender) {
            None => {
                entry.insert(signed.sender, signed);
                VoteInsertion::Inserted
            }
            Some(existing) if existing.message == signed.message => VoteInsertion::Duplicate,
            Some(_) => VoteInsertion::Equivocation,
        }
    }

    /// Distinct senders targeting exactly `round`.
    pub(crate) fn count(&self, round: Round) -> usize {
        self.votes.get(&round).map_or(0, HashMap::len)
    }

    /// The certificate for `round`, once its votes reach quorum.
    pub(crate) fn certificate(
        &self,
        round: Round,
        quorum: usize,
    ) -> Option<RoundChangeCertificate> {
        if self.count(round) < quorum {
            return None;
        }
        let votes = self.votes.get(&round)?;
        let certificate =
            RoundChangeCertificate { round_changes: votes.values().cloned().collect() };
        debug_assert!(certificate
            .is_well_formed(View { height: self.height, round }, quorum));
        Some(certificate)
    }

    /// Distinct senders that want any round strictly above `round`. One vote
    /// per sender; a sender targeting several rounds counts once.
    pub(crate) fn senders_above(&self, round: Round) -> usize {
        let mut senders: HashSet<ValidatorId> = HashSet::new();
        for (_, votes) in self.votes.range(round + 1..) {
            senders.extend(votes.keys().copied());
        }
        senders.len()
    }

    /// The smallest round strictly above `round` that anyone targets.
    pub(crate) fn min_target_above(&self, round: Round) -> Option<Round> {
        self.votes.range(round + 1..).next().map(|(target, _)| *target)
    }

    /// Drops entries targeting rounds below `round`; they can never advance
    /// the engine again.
    pub(crate) fn prune_below(&mut self, round: Round) {
        self.votes.retain(|target, _| *target >= round);
    }
}
