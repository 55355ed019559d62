//! Ballot numbers and the arithmetic that mints them.
//!
//! Every replica owns one residue class modulo the group size: replica `i`
//! of a group of `N` only ever proposes ballots `k*N + i` with `k >= 1`.
//! Two replicas can therefore never mint the same ballot, and no
//! coordinator is needed to hand them out.
//!
//! ```text
//! N = 3
//! server 0:  3  6  9 12 ...
//! server 1:  4  7 10 13 ...
//! server 2:  5  8 11 14 ...
//! ```
//!
//! Ballots order proposals inside one election instance. Instances
//! themselves are numbered by [`Epoch`]: a leader elected in epoch `e` is
//! replaced by closing `e` and electing again in `e + 1`.

use hopper_core::ServerId;
use serde::{Deserialize, Serialize};

/// A proposal number. Higher always wins.
///
/// # Invariants
///
/// - A ballot minted by replica `i` in a group of `N` satisfies
///   `ballot % N == i`.
/// - Ballots are never mutated, only superseded by a larger one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ballot(pub u64);

impl Ballot {
    /// "No ballot seen yet."
    pub const ZERO: Self = Self(0);

    /// Create a new ballot.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// The replica that minted this ballot in a group of `ring_size`.
    ///
    /// Returns `None` for `ring_size == 0`.
    pub fn owner(self, ring_size: usize) -> Option<ServerId> {
        let n = u64::try_from(ring_size).ok().filter(|n| *n > 0)?;
        u32::try_from(self.0 % n).ok().map(ServerId::new)
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ballot({})", self.0)
    }
}

/// Election instance number.
///
/// Each epoch decides at most one leader. Acceptors forget their promises
/// when they move to a higher epoch and refuse requests from a lower one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The first instance.
    pub const ZERO: Self = Self(0);

    /// Create a new epoch.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// The instance after this one.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch({})", self.0)
    }
}

/// Invalid arguments to [`next_ballot`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BallotError {
    /// A group must contain at least one replica.
    #[error("ring size must be positive")]
    EmptyRing,

    /// The server id is not a member of the group.
    #[error("{server_id} is out of range for a ring of {ring_size}")]
    ServerOutOfRange {
        /// The offending id.
        server_id: ServerId,
        /// Number of replicas.
        ring_size: usize,
    },

    /// The next ballot does not fit in a `u64`.
    #[error("ballot overflow after {last}")]
    Overflow {
        /// The last known ballot.
        last: Ballot,
    },
}

/// Smallest ballot strictly greater than `last` that `server_id` may use.
///
/// `next = (last / N + 1) * N + server_id`
///
/// # Errors
///
/// Fails fast on an empty ring, an out-of-range server id, or when the
/// result would overflow. Arguments are never clamped.
///
/// # Examples
///
/// ```
/// use hopper_core::ServerId;
/// use hopper_quorum::{Ballot, next_ballot};
///
/// let b = next_ballot(ServerId::new(1), 3, Ballot::new(4)).expect("valid");
/// assert_eq!(b, Ballot::new(7));
/// ```
pub fn next_ballot(
    server_id: ServerId,
    ring_size: usize,
    last: Ballot,
) -> Result<Ballot, BallotError> {
    if ring_size == 0 {
        return Err(BallotError::EmptyRing);
    }
    if server_id.0 as usize >= ring_size {
        return Err(BallotError::ServerOutOfRange {
            server_id,
            ring_size,
        });
    }

    let n = u64::try_from(ring_size).map_err(|_| BallotError::Overflow { last })?;
    (last.0 / n)
        .checked_add(1)
        .and_then(|round| round.checked_mul(n))
        .and_then(|base| base.checked_add(server_id.as_u64()))
        .map(Ballot)
        .ok_or(BallotError::Overflow { last })
}
