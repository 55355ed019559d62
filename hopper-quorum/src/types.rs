//! Core types for the election protocol.
//!
//! - [`Proposal`]: a value bound to the ballot it was accepted under
//! - [`Decision`]: the outcome of a successful round
//! - [`Vote`]: one replica's answer inside a round
//! - [`RoundState`] / [`RoundOutcome`]: lifecycle of a single round
//! - [`QuorumError`]: error type for coordinator operations

use hopper_core::{CodecError, RingError, ServerId};
use serde::{Deserialize, Serialize};

use crate::ballot::{Ballot, BallotError, Epoch};
use crate::storage::StorageError;
use crate::transport::TransportError;

/// A value an acceptor has accepted, with the ballot it was accepted under.
///
/// Returned inside a promise so that a new proposer adopts any value that
/// may already have been chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Ballot the value was accepted in.
    pub ballot: Ballot,
    /// The accepted value.
    pub value: String,
}

/// A decided value.
///
/// In an election the value names the leader; the core never interprets it.
/// Decisions are ordered by epoch first, then by ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Election instance the decision belongs to.
    #[serde(default)]
    pub epoch: Epoch,
    /// Ballot of the round that decided.
    pub ballot: Ballot,
    /// The decided value.
    pub value: String,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}={:?}", self.epoch, self.ballot, self.value)
    }
}

impl Decision {
    /// Ordering key: a later epoch wins, then a higher ballot.
    pub fn position(&self) -> (Epoch, Ballot) {
        (self.epoch, self.ballot)
    }
}

/// Receives decisions. The core reports them but never applies the value.
///
/// Called from tokio tasks, so implementations must not block.
pub trait DecisionListener: Send + Sync {
    /// A decision was reached or learned.
    fn on_decided(&self, decision: &Decision);
}

/// One replica's response inside a round. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// Who voted.
    pub replica: ServerId,
    /// Ballot the replica answered for, or the higher one it has promised.
    pub ballot_seen: Ballot,
    /// `true` for a promise or an accept, `false` for a rejection.
    pub accepted: bool,
    /// Previously accepted value returned with a promise.
    pub prior: Option<Proposal>,
}

/// Lifecycle of a single round.
///
/// ```text
/// Idle -> Proposing -> Promised -> Accepting -> Decided
///             |            \-> Rejected
///             +-> TimedOut / Preempted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    /// No round in flight.
    Idle,
    /// `Propose` broadcast, collecting promises.
    Proposing,
    /// A quorum promised.
    Promised,
    /// A replica rejected the ballot.
    Rejected,
    /// `Accept` broadcast, collecting acknowledgements.
    Accepting,
    /// A quorum accepted.
    Decided,
    /// The deadline passed without a quorum.
    TimedOut,
    /// A higher ballot was observed.
    Preempted,
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Proposing => "proposing",
            Self::Promised => "promised",
            Self::Rejected => "rejected",
            Self::Accepting => "accepting",
            Self::Decided => "decided",
            Self::TimedOut => "timed-out",
            Self::Preempted => "preempted",
        };
        f.write_str(name)
    }
}

/// How a single round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// A quorum accepted the value.
    Decided(Decision),

    /// A replica has promised a higher ballot.
    Preempted {
        /// Ballot this round used.
        ballot: Ballot,
        /// The higher ballot that was seen.
        higher: Ballot,
    },

    /// No quorum before the deadline.
    TimedOut {
        /// Ballot this round used.
        ballot: Ballot,
        /// Phase the round was in.
        state: RoundState,
        /// Positive votes collected in that phase.
        votes: usize,
    },

    /// A replica has moved on to a later election instance.
    Superseded {
        /// Ballot this round used.
        ballot: Ballot,
        /// Epoch this round ran in.
        epoch: Epoch,
        /// The later epoch the replica reported.
        current: Epoch,
    },

    /// The round was cancelled; pending replies are ignored.
    Cancelled {
        /// Ballot this round used.
        ballot: Ballot,
    },
}

/// Errors from coordinator operations.
///
/// Preemption and timeouts are not errors; they are [`RoundOutcome`]s that
/// the retry loop acts on. Only exhausted retries and broken invariants
/// surface here.
#[derive(Debug, thiserror::Error)]
pub enum QuorumError {
    /// Invalid ballot arguments (configuration problem).
    #[error("ballot error: {0}")]
    Ballot(#[from] BallotError),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The ring could not be built.
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Acceptor storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A peer could not be reached.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A protocol invariant was broken. Never retried.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Too few replicas answered a query before the deadline.
    #[error("quorum unavailable: {responses} of {quorum} replies")]
    QuorumUnavailable {
        /// Replies received.
        responses: usize,
        /// Replies needed.
        quorum: usize,
    },

    /// `max_attempts` rounds ended without a decision.
    #[error("no decision after {attempts} attempts (last {last_ballot})")]
    RetriesExhausted {
        /// Rounds started.
        attempts: u32,
        /// Ballot of the final round.
        last_ballot: Ballot,
    },

    /// The caller cancelled the election.
    #[error("election cancelled")]
    Cancelled,
}
