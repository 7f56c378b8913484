//! Buffering of messages that arrive before the engine can act on them:
//! future heights, future rounds, and votes for a round whose proposal has
//! not been adopted yet.
//!
//! Entries for views the engine has finalized past are discarded lazily on
//! drain. Memory is bounded by configuration, per sender, oldest first.

use meridian_consensus_config::config::BacklogConfig;
use meridian_protobuf::consensus::{SignedMessage, View};
use tracing::debug;

use crate::types::ValidationError;
use crate::validation::check_message_view;

#[cfg(test)]
#[path = "backlog_test.rs"]
mod backlog_test;

#[derive(Debug)]
struct BacklogEntry {
    arrival: u64,
    message: SignedMessage,
}

/// Buffered not-yet-actionable messages.
#[derive(Debug)]
pub(crate) struct Backlog {
    config: BacklogConfig,
    entries: Vec<BacklogEntry>,
    next_arrival: u64,
}

impl Backlog {
    pub(crate) fn new(config: BacklogConfig) -> Self {
        Self { config, entries: Vec::new(), next_arrival: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Buffers a future message. Messages too far ahead are dropped outright;
    /// a sender exceeding its buffer cap loses its oldest entry first.
    pub(crate) fn enqueue(&mut self, current: View, message: SignedMessage) {
        let view = message.message.view();
        if view.height.0 > current.height.0 + u64::from(self.config.future_height_limit) {
            debug!("Dropping message too far in the future: {message}");
            return;
        }
        if view.height == current.height
            && view.round > current.round + self.config.future_round_limit
        {
            debug!("Dropping message too many rounds ahead: {message}");
            return;
        }
        let from_sender =
            self.entries.iter().filter(|entry| entry.message.sender == message.sender).count();
        if from_sender >= self.config.max_per_sender {
            if let Some(oldest) =
                self.entries.iter().position(|entry| entry.message.sender == message.sender)
            {
                debug!("Sender over backlog cap, evicting its oldest entry: {message}");
                self.entries.remove(oldest);
            }
        }
        self.entries.push(BacklogEntry { arrival: self.next_arrival, message });
        self.next_arrival += 1;
    }

    /// Removes and returns every buffered message that is actionable at
    /// `current`, ordered by (height, round, kind priority, arrival). Entries
    /// that became old while buffered are silently discarded.
    pub(crate) fn drain(&mut self, current: View, proposal_accepted: bool) -> Vec<SignedMessage> {
        let mut actionable = Vec::new();
        let mut kept = Vec::new();
        for entry in self.entries.drain(..) {
            match check_message_view(&entry.message.message, current, proposal_accepted) {
                Ok(()) => actionable.push(entry),
                Err(ValidationError::FutureMessage) => kept.push(entry),
                // Became old while buffered: the height is finalized past it.
                Err(_) => {}
            }
        }
        self.entries = kept;
        actionable.sort_by_key(|entry| {
            (entry.message.message.view(), entry.message.message.kind(), entry.arrival)
        });
        actionable.into_iter().map(|entry| entry.message).collect()
    }
}
