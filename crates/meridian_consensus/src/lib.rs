//! The round-based BFT consensus core of the Meridian chain.
//!
//! A known set of validators agrees, one height at a time, on the next block
//! to append. Each height runs rounds of PRE-PREPARE / PREPARE / COMMIT
//! voting; a round that makes no progress is abandoned through ROUND-CHANGE
//! messages, carrying prepared certificates so that a value any honest
//! validator may have prepared survives the change. The core tolerates up to
//! f Byzantine validators out of n = 3f + 1.
//!
//! Everything outside agreement itself is a collaborator behind
//! [`types::ConsensusContext`] and [`types::MessageSigner`]: block building
//! and verification, networking, signing, sync and the validator-set source.
//! Drive the whole thing with [`run_consensus`].

use meridian_api::block::BlockNumber;
use meridian_consensus_config::config::ConsensusConfig;

mod backlog;
mod manager;
mod metrics;
mod round_change;
mod round_state;
mod single_height_consensus;
mod state_machine;
pub mod types;
mod validation;
pub mod validator_set;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod simulation_test;

pub use manager::run_consensus;

/// Inputs for [`run_consensus`] beyond the collaborators themselves.
#[derive(Debug, Clone)]
pub struct RunConsensusArguments {
    /// The first height to run consensus for.
    pub start_height: BlockNumber,
    /// The consensus configuration.
    pub config: ConsensusConfig,
}
