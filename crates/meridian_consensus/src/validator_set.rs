//! The ordered validator set for one height, with quorum arithmetic and
//! proposer selection.

use meridian_consensus_config::config::ProposerPolicy;
use meridian_protobuf::consensus::View;

use crate::types::ValidatorId;

#[cfg(test)]
#[path = "validator_set_test.rs"]
mod validator_set_test;

/// The validator set is malformed; rejected at construction so queries never
/// fail.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidatorSetError {
    #[error("validator set is empty")]
    Empty,
}

/// The validators participating at one height, in the chain-defined order.
/// Duplicates are removed at construction, keeping the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<ValidatorId>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<ValidatorId>) -> Result<Self, ValidatorSetError> {
        let mut deduped = Vec::with_capacity(validators.len());
        for validator in validators {
            if !deduped.contains(&validator) {
                deduped.push(validator);
            }
        }
        if deduped.is_empty() {
            return Err(ValidatorSetError::Empty);
        }
        Ok(Self { validators: deduped })
    }

    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.validators.contains(id)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// The minimum number of distinct votes certifying agreement:
    /// ceil((2n + 1) / 3).
    pub fn quorum_size(&self) -> usize {
        (2 * self.validators.len() + 1).div_ceil(3)
    }

    /// How many faulty validators the set tolerates: floor((n - 1) / 3).
    pub fn fault_tolerance(&self) -> usize {
        (self.validators.len() - 1) / 3
    }

    /// The proposer of `view`. Pure: every honest validator evaluating the
    /// same view over the same set gets the same answer.
    pub fn proposer(&self, view: View, policy: ProposerPolicy) -> ValidatorId {
        let n = u64::try_from(self.validators.len()).expect("validator set size fits in u64");
        let index = match policy {
            ProposerPolicy::RoundRobin => (view.height.0 + u64::from(view.round)) % n,
            ProposerPolicy::Sticky => u64::from(view.round) % n,
        };
        self.validators[usize::try_from(index).expect("validator index fits in usize")]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorId> {
        self.validators.iter()
    }
}
