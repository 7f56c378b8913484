//! This module contains the configuration for consensus, including the
//! `ConsensusConfig` struct and its implementation of the `SerializeConfig`
//! trait. The configuration includes parameters such as the validator ID, the
//! round timeouts, and the backlog bounds.

use std::collections::BTreeMap;
use std::time::Duration;

use meridian_config::converters::{
    deserialize_float_seconds_to_duration,
    deserialize_seconds_to_duration,
};
use meridian_config::dumping::{prepend_sub_config_name, ser_param, SerializeConfig};
use meridian_config::{ParamPath, ParamPrivacyInput, SerializedParam};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ValidatorId;

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

/// Configuration for consensus.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
pub struct ConsensusConfig {
    /// The validator ID of the node.
    pub validator_id: ValidatorId,
    /// The delay (seconds) before starting consensus to give time for network peering.
    #[serde(deserialize_with = "deserialize_seconds_to_duration")]
    pub startup_delay: Duration,
    /// Timeouts configuration for consensus.
    pub timeouts: TimeoutsConfig,
    /// The duration (seconds) between sync attempts.
    #[serde(deserialize_with = "deserialize_float_seconds_to_duration")]
    pub sync_retry_interval: Duration,
    /// How the proposer for a view is selected.
    pub proposer_policy: ProposerPolicy,
    /// Bounds on buffering of not-yet-actionable messages.
    #[validate(nested)]
    pub backlog: BacklogConfig,
}

impl SerializeConfig for ConsensusConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        let mut config = BTreeMap::from_iter([
            ser_param(
                "validator_id",
                &self.validator_id,
                "The validator id of the node.",
                ParamPrivacyInput::Public,
            ),
            ser_param(
                "startup_delay",
                &self.startup_delay.as_secs(),
                "Delay (seconds) before starting consensus to give time for network peering.",
                ParamPrivacyInput::Public,
            ),
            ser_param(
                "sync_retry_interval",
                &self.sync_retry_interval.as_secs_f64(),
                "The duration (seconds) between sync attempts.",
                ParamPrivacyInput::Public,
            ),
            ser_param(
                "proposer_policy",
                &self.proposer_policy,
                "How the proposer for a view is selected.",
                ParamPrivacyInput::Public,
            ),
        ]);
        config.extend(prepend_sub_config_name(self.timeouts.dump(), "timeouts"));
        config.extend(prepend_sub_config_name(self.backlog.dump(), "backlog"));
        config
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            validator_id: ValidatorId::default(),
            startup_delay: Duration::from_secs(5),
            timeouts: TimeoutsConfig::default(),
            sync_retry_interval: Duration::from_secs_f64(1.0),
            proposer_policy: ProposerPolicy::default(),
            backlog: BacklogConfig::default(),
        }
    }
}

/// A per-round timeout: grows linearly with the round so that sustained
/// disagreement backs off instead of thrashing.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Timeout {
    /// The base timeout (seconds).
    #[serde(deserialize_with = "deserialize_float_seconds_to_duration")]
    pub base: Duration,
    /// The per-round delta added to the timeout (seconds).
    #[serde(deserialize_with = "deserialize_float_seconds_to_duration")]
    pub delta: Duration,
    /// The maximum timeout duration (seconds).
    #[serde(deserialize_with = "deserialize_float_seconds_to_duration")]
    pub max: Duration,
}

impl Timeout {
    pub fn new(base: Duration, delta: Duration, max: Duration) -> Self {
        Self { base, delta, max }
    }

    /// Compute the timeout for the given round: min(base + round * delta, max).
    pub fn get_timeout(&self, round: u32) -> Duration {
        (self.base + round * self.delta).min(self.max)
    }
}

impl SerializeConfig for Timeout {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        BTreeMap::from_iter([
            ser_param(
                "base",
                &self.base.as_secs_f64(),
                "The base timeout (seconds).",
                ParamPrivacyInput::Public,
            ),
            ser_param(
                "delta",
                &self.delta.as_secs_f64(),
                "The per-round timeout delta (seconds).",
                ParamPrivacyInput::Public,
            ),
            ser_param(
                "max",
                &self.max.as_secs_f64(),
                "The maximum timeout duration (seconds).",
                ParamPrivacyInput::Public,
            ),
        ])
    }
}

/// Configuration for consensus timeouts.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimeoutsConfig {
    /// The round timer: fires a round change when a round makes no progress.
    pub round: Timeout,
    /// Time budget for building or validating a proposal.
    pub proposal: Timeout,
}

impl SerializeConfig for TimeoutsConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        let mut config = BTreeMap::new();
        config.extend(prepend_sub_config_name(self.round.dump(), "round"));
        config.extend(prepend_sub_config_name(self.proposal.dump(), "proposal"));
        config
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            round: Timeout {
                base: Duration::from_secs_f64(10.0),
                delta: Duration::from_secs_f64(5.0),
                max: Duration::from_secs_f64(120.0),
            },
            proposal: Timeout {
                base: Duration::from_secs_f64(3.0),
                delta: Duration::from_secs_f64(1.0),
                max: Duration::from_secs_f64(15.0),
            },
        }
    }
}

/// How the proposer for a view is chosen. Both policies are pure functions of
/// the view and the validator ordering, so all honest validators agree.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProposerPolicy {
    /// The proposer rotates every height and every round.
    #[default]
    RoundRobin,
    /// The proposer stays put between heights and moves only on round change.
    Sticky,
}

/// Bounds on the backlog of not-yet-actionable messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate, PartialEq)]
pub struct BacklogConfig {
    /// How many heights in the future should we buffer.
    pub future_height_limit: u32,
    /// How many rounds in the future (for the current height) should we buffer.
    pub future_round_limit: u32,
    /// How many messages may one sender keep buffered; the oldest is evicted
    /// first when the cap is hit.
    #[validate(range(min = 1))]
    pub max_per_sender: usize,
}

impl SerializeConfig for BacklogConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        BTreeMap::from_iter([
            ser_param(
                "future_height_limit",
                &self.future_height_limit,
                "How many heights in the future should we buffer.",
                ParamPrivacyInput::Public,
            ),
            ser_param(
                "future_round_limit",
                &self.future_round_limit,
                "How many rounds in the future (for the current height) should we buffer.",
                ParamPrivacyInput::Public,
            ),
            ser_param(
                "max_per_sender",
                &self.max_per_sender,
                "How many messages may one sender keep buffered.",
                ParamPrivacyInput::Public,
            ),
        ])
    }
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self { future_height_limit: 10, future_round_limit: 10, max_per_sender: 100 }
    }
}
