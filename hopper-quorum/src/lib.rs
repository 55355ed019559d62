//! # hopper-quorum: majority-quorum ballot protocol
//!
//! This crate elects a leader (or agrees on any single value) among a fixed
//! group of replicas using a two-phase, Paxos-family ballot protocol.
//!
//! ## Ballots without a coordinator
//!
//! Replica `i` of a group of `N` only ever proposes ballots `k*N + i`.
//! Ballots of different replicas can never collide, and a replica that sees
//! a higher ballot simply mints the next one in its own residue class. See
//! [`next_ballot`].
//!
//! ## Replacing a leader
//!
//! Each [`Epoch`] elects at most one leader. To replace a dead leader, close
//! its instance with [`QuorumCoordinator::close_instance`] and propose again.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   QuorumCoordinator                      │
//! │   query leader -> Propose -> Accept -> Learn             │
//! │   retries: preempt stagger / jittered backoff            │
//! └───────────┬──────────────────────────────────────────────┘
//!             │ PaxosMessage frames (PeerTransport)
//!             ▼
//! ┌───────────────────┐   ┌───────────────────┐   ┌───────────────────┐
//! │  Acceptor 0       │   │  Acceptor 1       │   │  Acceptor 2       │
//! │  AcceptorStorage  │   │  AcceptorStorage  │   │  AcceptorStorage  │
//! └───────────────────┘   └───────────────────┘   └───────────────────┘
//! ```
//!
//! ## Crate Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`ballot`] | `Ballot`, `Epoch` and `next_ballot` |
//! | [`messages`] | `PaxosMessage` and its frame encoding |
//! | [`types`] | `Decision`, `Vote`, `RoundOutcome`, `QuorumError` |
//! | [`storage`] | `AcceptorStorage` with in-memory and file backends |
//! | [`acceptor`] | Acceptor request handlers |
//! | [`transport`] | `PeerTransport` seam and `LocalTransport` |
//! | [`config`] | `ElectionConfig` timeouts and retry policy |
//! | [`coordinator`] | `QuorumCoordinator` protocol engine |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod acceptor;
pub mod ballot;
pub mod config;
pub mod coordinator;
pub mod messages;
pub mod storage;
pub mod transport;
pub mod types;

// Re-export key types at crate root for convenience
pub use acceptor::Acceptor;
pub use ballot::{Ballot, BallotError, Epoch, next_ballot};
pub use config::{BackoffConfig, ElectionConfig};
pub use coordinator::QuorumCoordinator;
pub use messages::PaxosMessage;
pub use storage::{
    AcceptorRecord, AcceptorStorage, FileAcceptorStorage, InMemoryAcceptorStorage, StorageError,
};
pub use transport::{LinkState, LocalTransport, PeerTransport, TransportError};
pub use types::{
    Decision, DecisionListener, Proposal, QuorumError, RoundOutcome, RoundState, Vote,
};
