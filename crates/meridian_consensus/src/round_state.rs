//! Per-(height, round) mutable state. A `RoundState` is created empty when a
//! round starts and replaced wholesale on every round or height advance;
//! nothing mutates a superseded round's state.

use std::collections::HashMap;

use meridian_protobuf::consensus::{
    ConsensusMessage,
    PreparedCertificate,
    Proposal,
    SignedMessage,
    Subject,
    View,
};

use crate::types::ValidatorId;

#[cfg(test)]
#[path = "round_state_test.rs"]
mod round_state_test;

/// The phase of one round's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    NewRound,
    PrePrepared,
    Prepared,
    Committed,
}

/// The outcome of recording a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VoteInsertion {
    Inserted,
    /// Same sender, same vote; routine under rebroadcast.
    Duplicate,
    /// Same sender, conflicting vote; a Byzantine signal. The first vote
    /// stands.
    Equivocation,
}

#[derive(Debug)]
pub(crate) struct RoundState {
    view: View,
    phase: Phase,
    /// The accepted PRE-PREPARE and its proposal. The proposal is owned here
    /// until the round commits or is discarded.
    accepted: Option<(SignedMessage, Proposal)>,
    /// A received PRE-PREPARE whose block is still being verified.
    awaiting_validation: Option<(SignedMessage, Proposal)>,
    prepares: HashMap<ValidatorId, SignedMessage>,
    commits: HashMap<ValidatorId, SignedMessage>,
    prepared_certificate: Option<PreparedCertificate>,
}

impl RoundState {
    pub(crate) fn new(view: View) -> Self {
        Self {
            view,
            phase: Phase::NewRound,
            accepted: None,
            awaiting_validation: None,
            prepares: HashMap::new(),
            commits: HashMap::new(),
            prepared_certificate: None,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// The subject this round has adopted, once a PRE-PREPARE was accepted.
    pub(crate) fn subject(&self) -> Option<Subject> {
        self.accepted
            .as_ref()
            .map(|(_, proposal)| Subject { view: self.view, digest: proposal.digest })
    }

    pub(crate) fn proposal(&self) -> Option<&Proposal> {
        self.accepted.as_ref().map(|(_, proposal)| proposal)
    }

    pub(crate) fn set_awaiting_validation(&mut self, signed: SignedMessage, proposal: Proposal) {
        self.awaiting_validation = Some((signed, proposal));
    }

    pub(crate) fn is_awaiting_validation(&self) -> bool {
        self.awaiting_validation.is_some()
    }

    pub(crate) fn take_awaiting_validation(&mut self) -> Option<(SignedMessage, Proposal)> {
        self.awaiting_validation.take()
    }

    /// Adopts a PRE-PREPARE for this round and enters `PrePrepared`.
    pub(crate) fn accept_pre_prepare(&mut self, signed: SignedMessage, proposal: Proposal) {
        assert_eq!(self.phase, Phase::NewRound, "a round adopts at most one PRE-PREPARE");
        self.accepted = Some((signed, proposal));
        self.phase = Phase::PrePrepared;
    }

    pub(crate) fn insert_prepare(&mut self, signed: SignedMessage) -> VoteInsertion {
        Self::insert_vote(&mut self.prepares, signed)
    }

    pub(crate) fn insert_commit(&mut self, signed: SignedMessage) -> VoteInsertion {
        Self::insert_vote(&mut self.commits, signed)
    }

    fn insert_vote(
        votes: &mut HashMap<ValidatorId, SignedMessage>,
        signed: SignedMessage,
    ) -> VoteInsertion {
        match votes.get(&signed.sender) {
            None => {
                votes.insert(signed.sender, signed);
                VoteInsertion::Inserted
            }
            Some(existing) if existing.message == signed.message => VoteInsertion::Duplicate,
            Some(_) => VoteInsertion::Equivocation,
        }
    }

    /// Distinct PREPARE votes for the adopted subject. The proposer's
    /// PRE-PREPARE counts as its vote, so explicit prepares from the proposer
    /// are not double counted.
    pub(crate) fn prepare_weight(&self, proposer: &ValidatorId) -> usize {
        let Some(subject) = self.subject() else {
            return 0;
        };
        let explicit = self
            .prepares
            .iter()
            .filter(|&(sender, vote)| {
                sender != proposer && vote.message.subject() == Some(subject)
            })
            .count();
        explicit + 1
    }

    /// Distinct COMMIT votes for the adopted subject.
    pub(crate) fn commit_weight(&self) -> usize {
        let Some(subject) = self.subject() else {
            return 0;
        };
        self.commits.values().filter(|vote| vote.message.subject() == Some(subject)).count()
    }

    /// Locks this round on its adopted subject: builds the prepared
    /// certificate from the PRE-PREPARE and the matching explicit prepares,
    /// and enters `Prepared`. Once locked the round never prepares a
    /// different subject.
    pub(crate) fn lock(&mut self, proposer: &ValidatorId) -> PreparedCertificate {
        assert_eq!(self.phase, Phase::PrePrepared, "locking requires an adopted PRE-PREPARE");
        let (signed, _) = self.accepted.as_ref().expect("PrePrepared implies an adopted proposal");
        let subject = self.subject().expect("PrePrepared implies an adopted subject");
        let prepares = self
            .prepares
            .iter()
            .filter(|&(sender, vote)| {
                sender != proposer && vote.message.subject() == Some(subject)
            })
            .map(|(_, vote)| vote.clone())
            .collect();
        let certificate =
            PreparedCertificate { pre_prepare: Box::new(signed.clone()), prepares };
        self.prepared_certificate = Some(certificate.clone());
        self.phase = Phase::Prepared;
        certificate
    }

    pub(crate) fn set_committed(&mut self) {
        assert_eq!(self.phase, Phase::Prepared, "committing requires a locked round");
        debug_assert!(self.prepared_certificate.is_some());
        self.phase = Phase::Committed;
    }

    /// The COMMIT votes certifying the adopted subject.
    pub(crate) fn commit_votes(&self) -> Vec<SignedMessage> {
        let Some(subject) = self.subject() else {
            return Vec::new();
        };
        self.commits
            .values()
            .filter(|vote| {
                matches!(&vote.message, ConsensusMessage::Commit(commit) if commit.subject == subject)
            })
            .cloned()
            .collect()
    }
}
