//! Acceptor: the voting side of every replica.
//!
//! An acceptor answers four requests. Propose and Accept carry the epoch
//! of the election instance they belong to:
//!
//! - a lower epoch than the acceptor's is answered `StaleEpoch(epoch)`;
//! - a higher epoch moves the acceptor into it first, forgetting the
//!   promise and the accepted value of the instance it leaves.
//!
//! Within one epoch:
//!
//! 1. **Propose(b)**: if `b >= promised`, persist `promised = b` and reply
//!    `Promise(b, accepted)`; otherwise reply `Reject(promised)`.
//! 2. **Accept(b, v)**: if `b >= promised`, persist `promised = b` and
//!    `accepted = (b, v)`, reply `Accepted(b)`; otherwise `Reject(promised)`.
//! 3. **Learn(d)**: persist the decision if newer than the one held and
//!    notify the local [`DecisionListener`]. No reply.
//! 4. **QueryLeader**: reply `LeaderInfo(epoch, learned)`.
//!
//! ## Key Invariant
//!
//! Within an epoch an acceptor never accepts a ballot lower than one it has
//! promised, and the promise is durable before the reply leaves. Equal
//! ballots are accepted so that a proposer may resend after a lost reply.

use std::sync::Arc;

use hopper_core::{Frame, ServerId};
use tracing::{debug, info, warn};

use crate::ballot::{Ballot, Epoch};
use crate::messages::PaxosMessage;
use crate::storage::{AcceptorRecord, AcceptorStorage, StorageError};
use crate::types::{Decision, DecisionListener, Proposal, QuorumError};

/// One replica's acceptor, wrapping an [`AcceptorStorage`] backend.
pub struct Acceptor<S: AcceptorStorage> {
    server_id: ServerId,
    storage: S,
    listener: Option<Arc<dyn DecisionListener>>,
}

impl<S: AcceptorStorage> std::fmt::Debug for Acceptor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("server_id", &self.server_id)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl<S: AcceptorStorage> Acceptor<S> {
    /// Create an acceptor for `server_id` over `storage`.
    pub fn new(server_id: ServerId, storage: S) -> Self {
        Self {
            server_id,
            storage,
            listener: None,
        }
    }

    /// Notify `listener` whenever a newer decision is learned.
    pub fn with_listener(mut self, listener: Arc<dyn DecisionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// This acceptor's server id.
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Highest ballot promised in the current epoch.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn promised(&self) -> Result<Ballot, StorageError> {
        Ok(self.storage.load()?.promised)
    }

    /// Election instance this acceptor is voting in.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn epoch(&self) -> Result<Epoch, StorageError> {
        Ok(self.storage.load()?.epoch)
    }

    /// Bring `record` to `epoch`, or return the `StaleEpoch` reply.
    fn enter_epoch(&self, record: &mut AcceptorRecord, epoch: Epoch) -> Result<(), PaxosMessage> {
        if epoch < record.epoch {
            debug!(
                server_id = %self.server_id,
                epoch = %epoch,
                current = %record.epoch,
                "rejecting request from a closed instance"
            );
            return Err(PaxosMessage::StaleEpoch {
                current_epoch: record.epoch,
            });
        }
        if epoch > record.epoch {
            info!(
                server_id = %self.server_id,
                from = %record.epoch,
                to = %epoch,
                "entering new election instance"
            );
            record.epoch = epoch;
            record.promised = Ballot::ZERO;
            record.accepted = None;
        }
        Ok(())
    }

    /// Handle a `Propose`.
    ///
    /// ```text
    /// On receive Propose(e, b):
    ///   if e < epoch: reply StaleEpoch(epoch)
    ///   if e > epoch: epoch = e, promised = 0, accepted = none
    ///   if b >= promised:
    ///     promised = b              // durable
    ///     reply Promise(b, accepted)
    ///   else:
    ///     reply Reject(promised)
    /// ```
    pub fn handle_propose(
        &mut self,
        epoch: Epoch,
        ballot: Ballot,
    ) -> Result<PaxosMessage, StorageError> {
        let mut record = self.storage.load()?;
        if let Err(reply) = self.enter_epoch(&mut record, epoch) {
            return Ok(reply);
        }

        if ballot < record.promised {
            debug!(
                server_id = %self.server_id,
                ballot = %ballot,
                promised = %record.promised,
                "rejecting propose with stale ballot"
            );
            return Ok(PaxosMessage::Reject {
                higher_ballot_seen: record.promised,
            });
        }

        record.promised = ballot;
        self.storage.store(&record)?;

        debug!(
            server_id = %self.server_id,
            epoch = %epoch,
            ballot = %ballot,
            has_prior = record.accepted.is_some(),
            "promised"
        );

        Ok(PaxosMessage::Promise {
            ballot,
            prior: record.accepted,
        })
    }

    /// Handle an `Accept`.
    ///
    /// ```text
    /// On receive Accept(e, b, v):
    ///   epoch check as for Propose
    ///   if b >= promised:
    ///     promised = b
    ///     accepted = (b, v)         // durable
    ///     reply Accepted(b)
    ///   else:
    ///     reply Reject(promised)
    /// ```
    pub fn handle_accept(
        &mut self,
        epoch: Epoch,
        ballot: Ballot,
        value: String,
    ) -> Result<PaxosMessage, StorageError> {
        let mut record = self.storage.load()?;
        if let Err(reply) = self.enter_epoch(&mut record, epoch) {
            return Ok(reply);
        }

        if ballot < record.promised {
            warn!(
                server_id = %self.server_id,
                ballot = %ballot,
                promised = %record.promised,
                "rejecting accept with stale ballot"
            );
            return Ok(PaxosMessage::Reject {
                higher_ballot_seen: record.promised,
            });
        }

        record.promised = ballot;
        record.accepted = Some(Proposal { ballot, value });
        self.storage.store(&record)?;

        debug!(server_id = %self.server_id, epoch = %epoch, ballot = %ballot, "accepted");

        Ok(PaxosMessage::Accepted { ballot })
    }

    /// Handle a `Learn`. Older or duplicate decisions are ignored.
    ///
    /// A decision from a later epoch moves the acceptor into that epoch with
    /// the decided value as its accepted value, so any further round in
    /// that epoch can only decide the same value.
    pub fn handle_learn(&mut self, decision: Decision) -> Result<(), StorageError> {
        let mut record = self.storage.load()?;

        if record
            .learned
            .as_ref()
            .is_some_and(|d| d.position() >= decision.position())
        {
            debug!(
                server_id = %self.server_id,
                decision = %decision,
                "ignoring learn for older decision"
            );
            return Ok(());
        }

        if decision.epoch > record.epoch {
            record.epoch = decision.epoch;
            record.promised = decision.ballot;
            record.accepted = Some(Proposal {
                ballot: decision.ballot,
                value: decision.value.clone(),
            });
        }
        record.learned = Some(decision.clone());
        self.storage.store(&record)?;

        info!(server_id = %self.server_id, decision = %decision, "learned decision");

        if let Some(listener) = &self.listener {
            listener.on_decided(&decision);
        }
        Ok(())
    }

    /// Handle a `QueryLeader`.
    pub fn handle_query(&self) -> Result<PaxosMessage, StorageError> {
        let record = self.storage.load()?;
        Ok(PaxosMessage::LeaderInfo {
            epoch: record.epoch,
            decision: record.learned,
        })
    }

    /// Dispatch a decoded request. Returns the reply, if the request has one.
    ///
    /// Reply-type messages arriving here are logged and dropped.
    pub fn handle(&mut self, message: PaxosMessage) -> Result<Option<PaxosMessage>, StorageError> {
        match message {
            PaxosMessage::Propose { epoch, ballot } => self.handle_propose(epoch, ballot).map(Some),
            PaxosMessage::Accept {
                epoch,
                ballot,
                value,
            } => self.handle_accept(epoch, ballot, value).map(Some),
            PaxosMessage::Learn { decision } => {
                self.handle_learn(decision)?;
                Ok(None)
            }
            PaxosMessage::QueryLeader => self.handle_query().map(Some),
            other @ (PaxosMessage::Promise { .. }
            | PaxosMessage::Reject { .. }
            | PaxosMessage::Accepted { .. }
            | PaxosMessage::LeaderInfo { .. }
            | PaxosMessage::StaleEpoch { .. }) => {
                warn!(
                    server_id = %self.server_id,
                    message = other.name(),
                    "acceptor received a reply message, dropping"
                );
                Ok(None)
            }
        }
    }

    /// Decode a frame, dispatch it, and encode the reply.
    ///
    /// # Errors
    ///
    /// `Codec` for a malformed request, `Storage` if state could not be
    /// persisted. In both cases no reply must be sent.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<Option<Frame>, QuorumError> {
        let request = PaxosMessage::decode(frame).inspect_err(|e| {
            warn!(server_id = %self.server_id, error = %e, "dropping malformed request");
        })?;
        match self.handle(request)? {
            Some(reply) => Ok(Some(reply.encode()?)),
            None => Ok(None),
        }
    }
}
