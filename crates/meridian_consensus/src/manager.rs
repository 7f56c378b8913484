//! The multi-height consensus loop: one serial event loop per height, fed by
//! the network channel, self-scheduled tasks (timers, proposal builds) and
//! the sync poller. All state transitions happen on this serial path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use meridian_api::block::BlockNumber;
use meridian_consensus_config::config::{ProposerPolicy, TimeoutsConfig};
use meridian_protobuf::consensus::{ConsensusMessage, SignedMessage, View};
use meridian_protobuf::converters::MessageDecodeError;
use metrics::counter;
use tracing::{debug, info, trace, warn};

use crate::backlog::Backlog;
use crate::metrics::{
    register_metrics,
    set_gauge,
    CONSENSUS_BLOCK_NUMBER,
    CONSENSUS_CACHED_MESSAGES,
    CONSENSUS_DECISIONS_REACHED_BY_CONSENSUS,
    CONSENSUS_DECISIONS_REACHED_BY_SYNC,
    CONSENSUS_INVALID_MESSAGES,
};
use crate::single_height_consensus::{ShcRequest, ShcReturn, SingleHeightConsensus};
use crate::state_machine::StateMachineEvent;
use crate::types::{
    ConsensusContext,
    ConsensusError,
    Decision,
    MessageSigner,
    ValidationError,
    ValidatorId,
};
use crate::validation::check_message_view;
use crate::validator_set::ValidatorSet;
use crate::RunConsensusArguments;

#[cfg(test)]
#[path = "manager_test.rs"]
mod manager_test;

/// How a height ended: a locally decided block, or a decision learned from
/// sync.
#[derive(Debug, PartialEq)]
pub(crate) enum RunHeightRes {
    Decision(Decision),
    Sync,
}

/// Runs consensus indefinitely, height after height. Returns only on a fatal
/// error; persistent lack of quorum is not one, it shows up as round-change
/// cycling instead.
pub async fn run_consensus<ContextT: ConsensusContext + Send>(
    args: RunConsensusArguments,
    mut context: ContextT,
    signer: Arc<dyn MessageSigner>,
    mut inbound: mpsc::Receiver<Result<SignedMessage, MessageDecodeError>>,
) -> Result<(), ConsensusError> {
    let config = args.config;
    info!("Starting consensus as validator {}", config.validator_id);
    register_metrics();
    // Give the network layer time to find peers before proposing into a void.
    tokio::time::sleep(config.startup_delay).await;

    let mut manager = MultiHeightManager::new(
        config.validator_id,
        config.proposer_policy,
        config.timeouts.clone(),
        config.sync_retry_interval,
        Backlog::new(config.backlog),
        signer,
    );
    let mut height = args.start_height;
    loop {
        set_gauge(CONSENSUS_BLOCK_NUMBER, height.0);
        match manager.run_height(&mut context, height, &mut inbound).await? {
            RunHeightRes::Decision(decision) => {
                counter!(CONSENSUS_DECISIONS_REACHED_BY_CONSENSUS).increment(1);
                // A failure here is fatal: the node cannot safely keep
                // participating while disagreeing with its own finalized
                // decision.
                context.decision_reached(decision).await?;
            }
            RunHeightRes::Sync => {
                counter!(CONSENSUS_DECISIONS_REACHED_BY_SYNC).increment(1);
                debug!("Height {height} was decided externally via sync");
            }
        }
        height = height.unchecked_next();
    }
}

/// Drives [`SingleHeightConsensus`] height after height, carrying the
/// backlog of future messages across heights.
pub(crate) struct MultiHeightManager {
    validator_id: ValidatorId,
    policy: ProposerPolicy,
    timeouts: TimeoutsConfig,
    sync_retry_interval: Duration,
    backlog: Backlog,
    signer: Arc<dyn MessageSigner>,
}

impl MultiHeightManager {
    pub(crate) fn new(
        validator_id: ValidatorId,
        policy: ProposerPolicy,
        timeouts: TimeoutsConfig,
        sync_retry_interval: Duration,
        backlog: Backlog,
        signer: Arc<dyn MessageSigner>,
    ) -> Self {
        Self { validator_id, policy, timeouts, sync_retry_interval, backlog, signer }
    }

    /// Runs one height to completion.
    pub(crate) async fn run_height<ContextT: ConsensusContext + Send>(
        &mut self,
        context: &mut ContextT,
        height: BlockNumber,
        inbound: &mut mpsc::Receiver<Result<SignedMessage, MessageDecodeError>>,
    ) -> Result<RunHeightRes, ConsensusError> {
        let validators = ValidatorSet::new(context.validators(height).await)
            .map_err(|error| ConsensusError::InternalInconsistency(error.to_string()))?;
        info!("Starting height {height} with {} validators", validators.len());
        context.set_height_and_round(height, 0).await;
        let mut shc = SingleHeightConsensus::new(
            height,
            self.validator_id,
            validators,
            self.policy,
            self.signer.clone(),
        );
        let mut events: FuturesUnordered<BoxFuture<'static, StateMachineEvent>> =
            FuturesUnordered::new();
        let mut sync_interval = tokio::time::interval(self.sync_retry_interval);
        let mut reported_round = 0;

        let ret = shc.start()?;
        if let Some(decision) = self.execute(context, height, &mut events, ret).await? {
            return Ok(RunHeightRes::Decision(decision));
        }

        // Messages buffered during earlier heights may be actionable now.
        let mut pending: VecDeque<SignedMessage> =
            self.backlog.drain(shc.current_view(), shc.proposal_accepted()).into();
        loop {
            // Work through replayed messages before taking new input; each
            // batch is finite so the timer keeps getting its turn.
            while let Some(message) = pending.pop_front() {
                if let Some(decision) =
                    self.handle_inbound(context, &mut shc, height, &mut events, message).await?
                {
                    return Ok(RunHeightRes::Decision(decision));
                }
            }
            let round = shc.current_view().round;
            if round != reported_round {
                reported_round = round;
                context.set_height_and_round(height, round).await;
            }
            // Advancing may have made buffered messages actionable.
            let drained = self.backlog.drain(shc.current_view(), shc.proposal_accepted());
            set_gauge(CONSENSUS_CACHED_MESSAGES, as_u64(self.backlog.len()));
            if !drained.is_empty() {
                pending.extend(drained);
                continue;
            }

            tokio::select! {
                message = inbound.next() => match message {
                    None => {
                        return Err(ConsensusError::InternalNetworkError(
                            "inbound message channel closed".to_string(),
                        ));
                    }
                    Some(Err(error)) => {
                        warn!("Failed to decode inbound message: {error}");
                        counter!(CONSENSUS_INVALID_MESSAGES).increment(1);
                    }
                    Some(Ok(message)) => {
                        if let Some(decision) = self
                            .handle_inbound(context, &mut shc, height, &mut events, message)
                            .await?
                        {
                            return Ok(RunHeightRes::Decision(decision));
                        }
                    }
                },
                Some(event) = events.next() => {
                    let ret = shc.handle_event(event)?;
                    if let Some(decision) =
                        self.execute(context, height, &mut events, ret).await?
                    {
                        return Ok(RunHeightRes::Decision(decision));
                    }
                },
                _ = sync_interval.tick() => {
                    if context.try_sync(height).await {
                        info!("Learned the decision for height {height} from sync");
                        return Ok(RunHeightRes::Sync);
                    }
                },
            }
        }
    }

    /// Routes one network message: to the height runner when actionable, to
    /// the backlog when early, to the floor when stale.
    async fn handle_inbound<ContextT: ConsensusContext + Send>(
        &mut self,
        context: &mut ContextT,
        shc: &mut SingleHeightConsensus,
        height: BlockNumber,
        events: &mut FuturesUnordered<BoxFuture<'static, StateMachineEvent>>,
        message: SignedMessage,
    ) -> Result<Option<Decision>, ConsensusError> {
        match check_message_view(&message.message, shc.current_view(), shc.proposal_accepted()) {
            Ok(()) => {
                let ret = shc.handle_message(message)?;
                self.execute(context, height, events, ret).await
            }
            Err(error @ ValidationError::OldMessage) => {
                trace!("Dropping message ({message}): {error}");
                // A stale ROUND-CHANGE marks a peer stuck behind us; send it
                // our latest one to pull it forward.
                if matches!(message.message, ConsensusMessage::RoundChange(_)) {
                    if let Some(round_change) = shc.latest_round_change() {
                        let round_change = round_change.clone();
                        if let Err(error) = context.unicast(message.sender, round_change).await {
                            debug!("Failed to unicast round change: {error}");
                        }
                    }
                }
                Ok(None)
            }
            Err(_) => {
                debug!("Buffering future message: {message}");
                self.backlog.enqueue(shc.current_view(), message);
                set_gauge(CONSENSUS_CACHED_MESSAGES, as_u64(self.backlog.len()));
                Ok(None)
            }
        }
    }

    /// Executes the effects a height interaction produced. Broadcasts are
    /// fire-and-forget; external tasks are parked in `events` and their
    /// completions fed back to the height runner.
    async fn execute<ContextT: ConsensusContext + Send>(
        &mut self,
        context: &mut ContextT,
        height: BlockNumber,
        events: &mut FuturesUnordered<BoxFuture<'static, StateMachineEvent>>,
        ret: ShcReturn,
    ) -> Result<Option<Decision>, ConsensusError> {
        let (requests, decision) = match ret {
            ShcReturn::Requests(requests) => (requests, None),
            ShcReturn::Decision(requests, decision) => (requests, Some(decision)),
        };
        for request in requests {
            match request {
                ShcRequest::Broadcast(message) => {
                    if let Err(error) = context.broadcast(message).await {
                        warn!("Failed to broadcast message: {error}");
                    }
                }
                ShcRequest::StartBuildProposal(round) => {
                    let timeout = self.timeouts.proposal.get_timeout(round);
                    let receiver =
                        context.build_proposal(View { height, round }, timeout).await;
                    events.push(
                        async move {
                            StateMachineEvent::FinishedBuilding(receiver.await.ok(), round)
                        }
                        .boxed(),
                    );
                }
                ShcRequest::StartValidateProposal(proposal, round) => {
                    let timeout = self.timeouts.proposal.get_timeout(round);
                    let receiver = context
                        .validate_proposal(View { height, round }, proposal, timeout)
                        .await;
                    events.push(
                        async move {
                            StateMachineEvent::FinishedValidation(receiver.await.ok(), round)
                        }
                        .boxed(),
                    );
                }
                ShcRequest::ScheduleTimeout { round, token } => {
                    let duration = self.timeouts.round.get_timeout(round);
                    events.push(
                        async move {
                            tokio::time::sleep(duration).await;
                            StateMachineEvent::Timeout(token)
                        }
                        .boxed(),
                    );
                }
            }
        }
        Ok(decision)
    }
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).expect("usize fits in u64")
}
