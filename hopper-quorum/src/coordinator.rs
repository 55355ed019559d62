//! Quorum coordinator: drives propose/accept rounds to a decision.
//!
//! ## Round lifecycle
//!
//! ```text
//! Idle -> Proposing --(quorum of promises)--> Promised -> Accepting
//!            |                                              |
//!            +--(reject)--> Rejected -> Preempted           +--(quorum of accepts)--> Decided
//!            +--(deadline)--> TimedOut                      +--(deadline)--> TimedOut
//! ```
//!
//! 1. **Propose**: mint a ballot above the last one seen and broadcast
//!    `Propose(ballot)` to every replica in the ring.
//! 2. **Choose value**: once a quorum promises, adopt the value carried by
//!    the highest prior ballot among the promises, else the candidate.
//! 3. **Accept**: broadcast `Accept(ballot, value)`; a quorum of
//!    `Accepted(ballot)` decides.
//! 4. **Learn**: announce the decision to every replica without waiting.
//!
//! ## Election instances
//!
//! Every round runs in the coordinator's current [`Epoch`]. An epoch decides
//! at most one leader. When the caller finds that leader dead it calls
//! [`QuorumCoordinator::close_instance`]; the next [`propose`] then elects
//! in the following epoch, where acceptors start with empty promises.
//! Before running any round, `propose` asks the group for its leader and
//! returns it if one is already decided for the current epoch.
//!
//! [`propose`]: QuorumCoordinator::propose
//!
//! ## Concurrency
//!
//! Each phase spawns one task per replica into a [`JoinSet`]. Replies flow
//! through an mpsc inbox tagged with the round id and phase; the round owns
//! its tally and waits on the inbox with a deadline. Dropping the `JoinSet`
//! when the phase ends aborts outstanding calls, so a slow minority never
//! delays a decision.
//!
//! The last-known ballot and the current epoch are the only state shared
//! between rounds. Minting reserves the new ballot with a compare-and-swap,
//! so concurrent rounds on one coordinator never reuse a ballot. Ballots
//! keep growing across epochs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hopper_core::{Endpoint, Frame, GroupConfig, NodeRing, ServerId};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::ballot::{Ballot, Epoch, next_ballot};
use crate::config::ElectionConfig;
use crate::messages::PaxosMessage;
use crate::transport::{PeerTransport, TransportError};
use crate::types::{
    Decision, DecisionListener, Proposal, QuorumError, RoundOutcome, RoundState, Vote,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Propose,
    Accept,
    Query,
}

/// A reply from one replica, tagged with the round and phase it answers.
struct PeerReply {
    round_id: u64,
    phase: Phase,
    server_id: ServerId,
    result: Result<Frame, TransportError>,
}

enum Wait {
    Reply(ServerId, PaxosMessage),
    Deadline,
    Cancelled,
    /// Every peer answered or failed.
    Drained,
}

/// Votes received in one phase of one round.
///
/// Order independent: the quorum check and the adopted value depend only on
/// the set of votes.
struct Tally {
    quorum: usize,
    votes: HashMap<ServerId, Vote>,
}

impl Tally {
    fn new(quorum: usize) -> Self {
        Self {
            quorum,
            votes: HashMap::new(),
        }
    }

    fn record(&mut self, vote: Vote) -> Result<(), QuorumError> {
        if self.votes.contains_key(&vote.replica) {
            return Err(QuorumError::InvariantViolation(format!(
                "duplicate vote from {} for {}",
                vote.replica, vote.ballot_seen
            )));
        }
        self.votes.insert(vote.replica, vote);
        Ok(())
    }

    fn granted(&self) -> usize {
        self.votes.values().filter(|v| v.accepted).count()
    }

    fn has_quorum(&self) -> bool {
        self.granted() >= self.quorum
    }

    /// Value accepted under the highest ballot among granted votes.
    fn highest_prior(&self) -> Option<&Proposal> {
        self.votes
            .values()
            .filter(|v| v.accepted)
            .filter_map(|v| v.prior.as_ref())
            .max_by_key(|p| p.ballot)
    }
}

/// Transient state of one round, owned by the task running it.
struct Round {
    id: u64,
    epoch: Epoch,
    ballot: Ballot,
    value: String,
    state: RoundState,
}

impl Round {
    fn transition(&mut self, next: RoundState) {
        debug!(
            round = self.id,
            epoch = %self.epoch,
            ballot = %self.ballot,
            from = %self.state,
            to = %next,
            "round state"
        );
        self.state = next;
    }
}

/// Drives ballot rounds across the group until a quorum decides.
pub struct QuorumCoordinator<T: PeerTransport> {
    local: ServerId,
    quorum_size: usize,
    ring: NodeRing<Endpoint>,
    transport: Arc<T>,
    config: ElectionConfig,
    last_ballot: AtomicU64,
    epoch: AtomicU64,
    next_round_id: AtomicU64,
    listener: Option<Arc<dyn DecisionListener>>,
}

impl<T: PeerTransport> std::fmt::Debug for QuorumCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumCoordinator")
            .field("local", &self.local)
            .field("quorum_size", &self.quorum_size)
            .field("ring_size", &self.ring.len())
            .field("epoch", &self.epoch())
            .field("last_ballot", &self.last_known_ballot())
            .finish_non_exhaustive()
    }
}

impl<T: PeerTransport> QuorumCoordinator<T> {
    /// Create a coordinator for the local replica of `group`.
    ///
    /// # Errors
    ///
    /// `Ballot` if the local id cannot mint ballots in this group.
    pub fn new(
        group: &GroupConfig,
        config: ElectionConfig,
        transport: Arc<T>,
    ) -> Result<Self, QuorumError> {
        // Fail fast on a group we could never mint ballots for.
        next_ballot(group.local_server_id(), group.ring_size(), Ballot::ZERO)?;
        let ring = NodeRing::new(group.endpoints().to_vec())?;

        Ok(Self {
            local: group.local_server_id(),
            quorum_size: group.quorum_size(),
            ring,
            transport,
            config,
            last_ballot: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            next_round_id: AtomicU64::new(1),
            listener: None,
        })
    }

    /// Report decisions reached by this coordinator to `listener`.
    pub fn with_listener(mut self, listener: Arc<dyn DecisionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Highest ballot minted or observed so far.
    pub fn last_known_ballot(&self) -> Ballot {
        Ballot(self.last_ballot.load(Ordering::Acquire))
    }

    /// Raise the last-known ballot to at least `ballot`.
    pub fn observe_ballot(&self, ballot: Ballot) {
        let previous = self.last_ballot.fetch_max(ballot.0, Ordering::AcqRel);
        if ballot.0 > previous {
            trace!(ballot = %ballot, "observed higher ballot");
        }
    }

    /// Election instance the next round runs in.
    pub fn epoch(&self) -> Epoch {
        Epoch(self.epoch.load(Ordering::Acquire))
    }

    /// Raise the current epoch to at least `epoch`.
    pub fn observe_epoch(&self, epoch: Epoch) {
        let previous = self.epoch.fetch_max(epoch.0, Ordering::AcqRel);
        if epoch.0 > previous {
            debug!(epoch = %epoch, "observed later election instance");
        }
    }

    /// Close the instance that elected `leader` so the next [`propose`]
    /// runs a fresh election. Returns the epoch that election will use.
    ///
    /// Call this once `leader` is known to be gone. Closing an instance
    /// that is already closed is a no-op.
    ///
    /// [`propose`]: Self::propose
    pub fn close_instance(&self, leader: &Decision) -> Epoch {
        self.observe_epoch(leader.epoch.next());
        let epoch = self.epoch();
        info!(leader = %leader, next = %epoch, "closed election instance");
        epoch
    }

    /// The ring of replicas this coordinator contacts.
    pub fn ring(&self) -> &NodeRing<Endpoint> {
        &self.ring
    }

    /// Mint a fresh ballot above the last-known one and reserve it.
    fn mint_ballot(&self) -> Result<Ballot, QuorumError> {
        let ring_size = self.ring.len();
        let mut minted = Ok(Ballot::ZERO);
        // On success the last closure call produced the stored value.
        let _ = self
            .last_ballot
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                minted = next_ballot(self.local, ring_size, Ballot(last));
                minted.as_ref().ok().map(|b| b.0)
            });
        let ballot = minted?;

        if ballot.owner(ring_size) != Some(self.local) {
            return Err(QuorumError::InvariantViolation(format!(
                "{ballot} is outside the residue class of {}",
                self.local
            )));
        }
        Ok(ballot)
    }

    /// Broadcast `request` to every replica, one task per peer.
    ///
    /// The ring cursor advances once per broadcast so the send order
    /// rotates between rounds.
    fn fan_out(
        &self,
        round_id: u64,
        phase: Phase,
        request: &Frame,
    ) -> (JoinSet<()>, mpsc::Receiver<PeerReply>) {
        let (tx, rx) = mpsc::channel(self.ring.len());
        let mut tasks = JoinSet::new();

        self.ring.next_node();
        for endpoint in self.ring.iter_from_current() {
            let endpoint = endpoint.clone();
            let transport = Arc::clone(&self.transport);
            let request = request.clone();
            let tx = tx.clone();
            let rpc_timeout = self.config.rpc_timeout;

            tasks.spawn(async move {
                let server_id = endpoint.server_id;
                let result =
                    match tokio::time::timeout(rpc_timeout, transport.call(&endpoint, request))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Timeout { server_id }),
                    };
                // The round may already be over; a closed inbox is fine.
                let _ = tx
                    .send(PeerReply {
                        round_id,
                        phase,
                        server_id,
                        result,
                    })
                    .await;
            });
        }

        (tasks, rx)
    }

    /// Wait for the next usable reply of `(round_id, phase)`.
    ///
    /// Transport failures and undecodable frames count as lost votes and
    /// are skipped.
    async fn next_reply(
        rx: &mut mpsc::Receiver<PeerReply>,
        round_id: u64,
        phase: Phase,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Wait {
        loop {
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Wait::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return Wait::Deadline,
                reply = rx.recv() => match reply {
                    Some(reply) => reply,
                    None => return Wait::Drained,
                },
            };

            if reply.round_id != round_id || reply.phase != phase {
                trace!(
                    expected = round_id,
                    got = reply.round_id,
                    "ignoring reply for another round"
                );
                continue;
            }

            let frame = match reply.result {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(round = round_id, server_id = %reply.server_id, error = %e, "lost vote");
                    continue;
                }
            };

            match PaxosMessage::decode(frame.as_bytes()) {
                Ok(message) => return Wait::Reply(reply.server_id, message),
                Err(e) => {
                    warn!(
                        round = round_id,
                        server_id = %reply.server_id,
                        error = %e,
                        "undecodable reply, counting as lost vote"
                    );
                }
            }
        }
    }

    /// Run one round for `candidate`.
    ///
    /// Returns as soon as a quorum decides, a higher ballot is seen, the
    /// phase deadline passes, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Only for broken invariants or unusable configuration. Preemption and
    /// timeouts are outcomes, not errors.
    pub async fn run_round(
        &self,
        candidate: &str,
        cancel: &CancellationToken,
    ) -> Result<RoundOutcome, QuorumError> {
        let mut round = Round {
            id: self.next_round_id.fetch_add(1, Ordering::Relaxed),
            epoch: self.epoch(),
            ballot: self.mint_ballot()?,
            value: candidate.to_owned(),
            state: RoundState::Idle,
        };

        info!(
            round = round.id,
            epoch = %round.epoch,
            ballot = %round.ballot,
            server_id = %self.local,
            "starting round"
        );

        // Phase 1: propose
        round.transition(RoundState::Proposing);
        let request = PaxosMessage::Propose {
            epoch: round.epoch,
            ballot: round.ballot,
        }
        .encode()?;
        let (tasks, mut rx) = self.fan_out(round.id, Phase::Propose, &request);
        let deadline = Instant::now() + self.config.round_timeout;
        let mut promises = Tally::new(self.quorum_size);

        while !promises.has_quorum() {
            let (server_id, message) =
                match Self::next_reply(&mut rx, round.id, Phase::Propose, deadline, cancel).await {
                    Wait::Reply(server_id, message) => (server_id, message),
                    Wait::Cancelled => return Ok(self.cancelled(&round)),
                    Wait::Deadline | Wait::Drained => {
                        return Ok(self.timed_out(&mut round, promises.granted()));
                    }
                };

            match message {
                PaxosMessage::Promise { ballot, prior } if ballot == round.ballot => {
                    if let Some(prior) = &prior {
                        self.observe_ballot(prior.ballot);
                    }
                    promises.record(Vote {
                        replica: server_id,
                        ballot_seen: ballot,
                        accepted: true,
                        prior,
                    })?;
                }
                PaxosMessage::Reject { higher_ballot_seen } => {
                    promises.record(Vote {
                        replica: server_id,
                        ballot_seen: higher_ballot_seen,
                        accepted: false,
                        prior: None,
                    })?;
                    if let Some(outcome) = self.rejected(&mut round, server_id, higher_ballot_seen)
                    {
                        return Ok(outcome);
                    }
                }
                PaxosMessage::StaleEpoch { current_epoch } => {
                    if let Some(outcome) = self.superseded(&mut round, server_id, current_epoch) {
                        return Ok(outcome);
                    }
                }
                other => {
                    warn!(
                        round = round.id,
                        server_id = %server_id,
                        message = other.name(),
                        "unexpected reply to propose"
                    );
                }
            }
        }
        drop(tasks);
        round.transition(RoundState::Promised);

        if let Some(prior) = promises.highest_prior() {
            if prior.value != round.value {
                info!(
                    round = round.id,
                    prior_ballot = %prior.ballot,
                    "adopting previously accepted value"
                );
            }
            round.value = prior.value.clone();
        }

        // Phase 2: accept
        round.transition(RoundState::Accepting);
        let request = PaxosMessage::Accept {
            epoch: round.epoch,
            ballot: round.ballot,
            value: round.value.clone(),
        }
        .encode()?;
        let (tasks, mut rx) = self.fan_out(round.id, Phase::Accept, &request);
        let deadline = Instant::now() + self.config.round_timeout;
        let mut accepts = Tally::new(self.quorum_size);

        while !accepts.has_quorum() {
            let (server_id, message) =
                match Self::next_reply(&mut rx, round.id, Phase::Accept, deadline, cancel).await {
                    Wait::Reply(server_id, message) => (server_id, message),
                    Wait::Cancelled => return Ok(self.cancelled(&round)),
                    Wait::Deadline | Wait::Drained => {
                        return Ok(self.timed_out(&mut round, accepts.granted()));
                    }
                };

            match message {
                PaxosMessage::Accepted { ballot } if ballot == round.ballot => {
                    accepts.record(Vote {
                        replica: server_id,
                        ballot_seen: ballot,
                        accepted: true,
                        prior: None,
                    })?;
                }
                PaxosMessage::Reject { higher_ballot_seen } => {
                    accepts.record(Vote {
                        replica: server_id,
                        ballot_seen: higher_ballot_seen,
                        accepted: false,
                        prior: None,
                    })?;
                    if let Some(outcome) = self.rejected(&mut round, server_id, higher_ballot_seen)
                    {
                        return Ok(outcome);
                    }
                }
                PaxosMessage::StaleEpoch { current_epoch } => {
                    if let Some(outcome) = self.superseded(&mut round, server_id, current_epoch) {
                        return Ok(outcome);
                    }
                }
                other => {
                    warn!(
                        round = round.id,
                        server_id = %server_id,
                        message = other.name(),
                        "unexpected reply to accept"
                    );
                }
            }
        }
        drop(tasks);
        round.transition(RoundState::Decided);

        let decision = Decision {
            epoch: round.epoch,
            ballot: round.ballot,
            value: round.value,
        };
        info!(round = round.id, decision = %decision, "decided");

        self.announce(&decision)?;
        if let Some(listener) = &self.listener {
            listener.on_decided(&decision);
        }
        Ok(RoundOutcome::Decided(decision))
    }

    /// A replica rejected the round. Returns `Preempted` when its ballot is
    /// higher than ours.
    fn rejected(
        &self,
        round: &mut Round,
        server_id: ServerId,
        higher: Ballot,
    ) -> Option<RoundOutcome> {
        self.observe_ballot(higher);
        if higher <= round.ballot {
            warn!(
                round = round.id,
                server_id = %server_id,
                ballot = %round.ballot,
                seen = %higher,
                "reject without a higher ballot, ignoring"
            );
            return None;
        }

        round.transition(RoundState::Rejected);
        round.transition(RoundState::Preempted);
        info!(
            round = round.id,
            ballot = %round.ballot,
            higher = %higher,
            server_id = %server_id,
            "preempted"
        );
        Some(RoundOutcome::Preempted {
            ballot: round.ballot,
            higher,
        })
    }

    /// A replica has left the round's epoch. Returns `Superseded` when it
    /// reports a later one.
    fn superseded(
        &self,
        round: &mut Round,
        server_id: ServerId,
        current: Epoch,
    ) -> Option<RoundOutcome> {
        if current <= round.epoch {
            warn!(
                round = round.id,
                server_id = %server_id,
                epoch = %round.epoch,
                reported = %current,
                "stale-epoch reply without a later epoch, ignoring"
            );
            return None;
        }

        self.observe_epoch(current);
        round.transition(RoundState::Rejected);
        round.transition(RoundState::Preempted);
        info!(
            round = round.id,
            epoch = %round.epoch,
            current = %current,
            server_id = %server_id,
            "superseded by a later election instance"
        );
        Some(RoundOutcome::Superseded {
            ballot: round.ballot,
            epoch: round.epoch,
            current,
        })
    }

    fn timed_out(&self, round: &mut Round, votes: usize) -> RoundOutcome {
        let state = round.state;
        round.transition(RoundState::TimedOut);
        debug!(
            round = round.id,
            ballot = %round.ballot,
            phase = %state,
            votes,
            quorum = self.quorum_size,
            "no quorum before deadline"
        );
        RoundOutcome::TimedOut {
            ballot: round.ballot,
            state,
            votes,
        }
    }

    fn cancelled(&self, round: &Round) -> RoundOutcome {
        debug!(round = round.id, ballot = %round.ballot, "round cancelled");
        RoundOutcome::Cancelled {
            ballot: round.ballot,
        }
    }

    /// Broadcast `Learn` to every replica without waiting for delivery.
    fn announce(&self, decision: &Decision) -> Result<(), QuorumError> {
        let frame = PaxosMessage::Learn {
            decision: decision.clone(),
        }
        .encode()?;

        for endpoint in self.ring.nodes() {
            let endpoint = endpoint.clone();
            let transport = Arc::clone(&self.transport);
            let frame = frame.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.cast(&endpoint, frame).await {
                    debug!(server_id = %endpoint.server_id, error = %e, "learn not delivered");
                }
            });
        }
        Ok(())
    }

    /// Elect `candidate` unless the group already has a leader for the
    /// current epoch.
    ///
    /// The group is queried first; a decision for the current (or a later)
    /// epoch is returned as is. Otherwise rounds run until `candidate` (or
    /// an adopted prior value) is decided. Preempted rounds retry after a
    /// short random stagger; timed-out rounds retry after exponential
    /// backoff with jitter. A round superseded by a later epoch retries at
    /// once, after asking the group for its leader again. Every
    /// `timeout_warning_threshold` consecutive timeouts logs a liveness
    /// warning.
    ///
    /// # Errors
    ///
    /// `RetriesExhausted` after `max_attempts` rounds, `Cancelled` if
    /// `cancel` fires, `InvariantViolation` immediately on a broken invariant.
    pub async fn propose(
        &self,
        candidate: &str,
        cancel: &CancellationToken,
    ) -> Result<Decision, QuorumError> {
        let mut consecutive_timeouts: u32 = 0;
        let mut last_ballot = self.last_known_ballot();
        let mut check_leader = true;

        for attempt in 1..=self.config.max_attempts {
            if check_leader {
                check_leader = false;
                if let Some(leader) = self.current_leader(cancel).await? {
                    return Ok(leader);
                }
            }

            let outcome = self.run_round(candidate, cancel).await?;
            let is_last = attempt == self.config.max_attempts;

            let delay = match outcome {
                RoundOutcome::Decided(decision) => return Ok(decision),
                RoundOutcome::Cancelled { .. } => return Err(QuorumError::Cancelled),
                RoundOutcome::Preempted { ballot, .. } => {
                    last_ballot = ballot;
                    consecutive_timeouts = 0;
                    self.preempt_stagger()
                }
                RoundOutcome::Superseded { ballot, .. } => {
                    last_ballot = ballot;
                    consecutive_timeouts = 0;
                    check_leader = true;
                    Duration::ZERO
                }
                RoundOutcome::TimedOut { ballot, .. } => {
                    last_ballot = ballot;
                    consecutive_timeouts += 1;
                    let threshold = self.config.timeout_warning_threshold;
                    if threshold > 0 && consecutive_timeouts % threshold == 0 {
                        warn!(
                            consecutive_timeouts,
                            ballot = %ballot,
                            quorum = self.quorum_size,
                            "no quorum reachable, election is not making progress"
                        );
                    }
                    self.config
                        .backoff
                        .duration(consecutive_timeouts - 1, &mut rand::rng())
                }
            };

            if is_last {
                break;
            }
            trace!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QuorumError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        warn!(
            attempts = self.config.max_attempts,
            last_ballot = %last_ballot,
            "giving up on election"
        );
        Err(QuorumError::RetriesExhausted {
            attempts: self.config.max_attempts,
            last_ballot,
        })
    }

    /// The group's leader for the current epoch, if a quorum reports one.
    ///
    /// A query that reaches no quorum is not fatal here: the round that
    /// follows times out and backs off on its own.
    async fn current_leader(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Decision>, QuorumError> {
        let leader = match self.query_leader(cancel).await {
            Ok(leader) => leader,
            Err(QuorumError::QuorumUnavailable { responses, quorum }) => {
                debug!(responses, quorum, "leader query reached no quorum, electing");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match leader {
            Some(leader) if leader.epoch >= self.epoch() => {
                info!(leader = %leader, "leader already elected");
                Ok(Some(leader))
            }
            Some(leader) => {
                debug!(
                    leader = %leader,
                    epoch = %self.epoch(),
                    "known leader belongs to a closed instance, electing"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn preempt_stagger(&self) -> Duration {
        let max_ms = u64::try_from(self.config.preempt_stagger.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    /// Ask the group for the current decision without starting a round.
    ///
    /// Waits for a quorum of replies and returns the decision with the
    /// latest epoch and highest ballot among them. The coordinator's epoch
    /// is raised to the latest epoch any replica reports.
    ///
    /// # Errors
    ///
    /// `QuorumUnavailable` if fewer than a quorum answer before the deadline,
    /// `Cancelled` if `cancel` fires first.
    pub async fn query_leader(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Decision>, QuorumError> {
        let round_id = self.next_round_id.fetch_add(1, Ordering::Relaxed);
        let request = PaxosMessage::QueryLeader.encode()?;
        let (tasks, mut rx) = self.fan_out(round_id, Phase::Query, &request);
        let deadline = Instant::now() + self.config.round_timeout;

        let mut answered: HashMap<ServerId, Option<Decision>> = HashMap::new();
        while answered.len() < self.quorum_size {
            match Self::next_reply(&mut rx, round_id, Phase::Query, deadline, cancel).await {
                Wait::Reply(server_id, PaxosMessage::LeaderInfo { epoch, decision }) => {
                    self.observe_epoch(epoch);
                    if answered.insert(server_id, decision).is_some() {
                        return Err(QuorumError::InvariantViolation(format!(
                            "duplicate leader info from {server_id}"
                        )));
                    }
                }
                Wait::Reply(server_id, other) => {
                    warn!(
                        server_id = %server_id,
                        message = other.name(),
                        "unexpected reply to leader query"
                    );
                }
                Wait::Cancelled => return Err(QuorumError::Cancelled),
                Wait::Deadline | Wait::Drained => {
                    return Err(QuorumError::QuorumUnavailable {
                        responses: answered.len(),
                        quorum: self.quorum_size,
                    });
                }
            }
        }
        drop(tasks);

        let best = answered
            .into_values()
            .flatten()
            .max_by_key(Decision::position);
        if let Some(decision) = &best {
            self.observe_ballot(decision.ballot);
        }
        debug!(round = round_id, leader = ?best, "leader query complete");
        Ok(best)
    }
}
