//! Wire messages exchanged between coordinators and acceptors.
//!
//! Every message is one completed frame. The first payload byte is the
//! message tag; the remaining fields follow in a fixed order.
//!
//! | Tag | Message | Fields |
//! |-----|---------|--------|
//! | `0x01` | `Propose` | epoch, ballot |
//! | `0x02` | `Promise` | ballot, has_prior, [prior_ballot, prior_value] |
//! | `0x03` | `Reject` | higher_ballot_seen |
//! | `0x04` | `Accept` | epoch, ballot, value |
//! | `0x05` | `Accepted` | ballot |
//! | `0x06` | `Learn` | epoch, ballot, value |
//! | `0x07` | `QueryLeader` | |
//! | `0x08` | `LeaderInfo` | epoch, has_decision, [epoch, ballot, value] |
//! | `0x09` | `StaleEpoch` | current_epoch |

use hopper_core::{CodecError, Frame, FrameReader, FrameWriter};

use crate::ballot::{Ballot, Epoch};
use crate::types::{Decision, Proposal};

const TAG_PROPOSE: u8 = 0x01;
const TAG_PROMISE: u8 = 0x02;
const TAG_REJECT: u8 = 0x03;
const TAG_ACCEPT: u8 = 0x04;
const TAG_ACCEPTED: u8 = 0x05;
const TAG_LEARN: u8 = 0x06;
const TAG_QUERY_LEADER: u8 = 0x07;
const TAG_LEADER_INFO: u8 = 0x08;
const TAG_STALE_EPOCH: u8 = 0x09;

/// Every message of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaxosMessage {
    /// Phase 1 request: "promise not to accept anything below `ballot`".
    Propose {
        /// Election instance of the round.
        epoch: Epoch,
        /// Proposer's ballot.
        ballot: Ballot,
    },

    /// Phase 1 reply granting the promise.
    Promise {
        /// The ballot being promised.
        ballot: Ballot,
        /// Value this acceptor previously accepted in the same epoch, if any.
        prior: Option<Proposal>,
    },

    /// Reply to `Propose` or `Accept` carrying a higher promised ballot.
    Reject {
        /// The highest ballot the acceptor has promised.
        higher_ballot_seen: Ballot,
    },

    /// Phase 2 request: "accept `value` under `ballot`".
    Accept {
        /// Election instance of the round.
        epoch: Epoch,
        /// Proposer's ballot.
        ballot: Ballot,
        /// Value to accept.
        value: String,
    },

    /// Phase 2 reply acknowledging the accept.
    Accepted {
        /// The ballot accepted.
        ballot: Ballot,
    },

    /// One-way announcement of a decision.
    Learn {
        /// The decision.
        decision: Decision,
    },

    /// Ask an acceptor which decision it has learned.
    QueryLeader,

    /// Reply to `QueryLeader`.
    LeaderInfo {
        /// Epoch the acceptor is currently voting in.
        epoch: Epoch,
        /// Latest learned decision, if any.
        decision: Option<Decision>,
    },

    /// Reply to `Propose` or `Accept` from an instance the acceptor has
    /// already left.
    StaleEpoch {
        /// Epoch the acceptor is in.
        current_epoch: Epoch,
    },
}

impl PaxosMessage {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Propose { .. } => "propose",
            Self::Promise { .. } => "promise",
            Self::Reject { .. } => "reject",
            Self::Accept { .. } => "accept",
            Self::Accepted { .. } => "accepted",
            Self::Learn { .. } => "learn",
            Self::QueryLeader => "query-leader",
            Self::LeaderInfo { .. } => "leader-info",
            Self::StaleEpoch { .. } => "stale-epoch",
        }
    }

    /// Serialize into a completed frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if a value pushes the payload past the limit.
    pub fn encode(&self) -> Result<Frame, CodecError> {
        let mut w = FrameWriter::new();
        match self {
            Self::Propose { epoch, ballot } => {
                w.write_byte(TAG_PROPOSE);
                w.write_u64(epoch.0);
                w.write_u64(ballot.0);
            }
            Self::Promise { ballot, prior } => {
                w.write_byte(TAG_PROMISE);
                w.write_u64(ballot.0);
                match prior {
                    Some(prior) => {
                        w.write_boolean(true);
                        w.write_u64(prior.ballot.0);
                        w.write_utf(Some(&prior.value));
                    }
                    None => w.write_boolean(false),
                }
            }
            Self::Reject { higher_ballot_seen } => {
                w.write_byte(TAG_REJECT);
                w.write_u64(higher_ballot_seen.0);
            }
            Self::Accept {
                epoch,
                ballot,
                value,
            } => {
                w.write_byte(TAG_ACCEPT);
                w.write_u64(epoch.0);
                w.write_u64(ballot.0);
                w.write_utf(Some(value));
            }
            Self::Accepted { ballot } => {
                w.write_byte(TAG_ACCEPTED);
                w.write_u64(ballot.0);
            }
            Self::Learn { decision } => {
                w.write_byte(TAG_LEARN);
                write_decision(&mut w, decision);
            }
            Self::QueryLeader => {
                w.write_byte(TAG_QUERY_LEADER);
            }
            Self::LeaderInfo { epoch, decision } => {
                w.write_byte(TAG_LEADER_INFO);
                w.write_u64(epoch.0);
                match decision {
                    Some(decision) => {
                        w.write_boolean(true);
                        write_decision(&mut w, decision);
                    }
                    None => w.write_boolean(false),
                }
            }
            Self::StaleEpoch { current_epoch } => {
                w.write_byte(TAG_STALE_EPOCH);
                w.write_u64(current_epoch.0);
            }
        }
        w.complete()
    }

    /// Parse a complete frame (header included).
    ///
    /// # Errors
    ///
    /// Any [`CodecError`]: truncated or oversized frames, unknown tags,
    /// malformed fields, or trailing bytes.
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let mut r = FrameReader::new(frame)?;
        let tag = r.read_byte()?;
        let message = match tag {
            TAG_PROPOSE => Self::Propose {
                epoch: Epoch(r.read_u64()?),
                ballot: Ballot(r.read_u64()?),
            },
            TAG_PROMISE => {
                let ballot = Ballot(r.read_u64()?);
                let prior = if r.read_boolean()? {
                    Some(Proposal {
                        ballot: Ballot(r.read_u64()?),
                        value: r.read_required_utf()?,
                    })
                } else {
                    None
                };
                Self::Promise { ballot, prior }
            }
            TAG_REJECT => Self::Reject {
                higher_ballot_seen: Ballot(r.read_u64()?),
            },
            TAG_ACCEPT => Self::Accept {
                epoch: Epoch(r.read_u64()?),
                ballot: Ballot(r.read_u64()?),
                value: r.read_required_utf()?,
            },
            TAG_ACCEPTED => Self::Accepted {
                ballot: Ballot(r.read_u64()?),
            },
            TAG_LEARN => Self::Learn {
                decision: read_decision(&mut r)?,
            },
            TAG_QUERY_LEADER => Self::QueryLeader,
            TAG_LEADER_INFO => {
                let epoch = Epoch(r.read_u64()?);
                let decision = if r.read_boolean()? {
                    Some(read_decision(&mut r)?)
                } else {
                    None
                };
                Self::LeaderInfo { epoch, decision }
            }
            TAG_STALE_EPOCH => Self::StaleEpoch {
                current_epoch: Epoch(r.read_u64()?),
            },
            tag => return Err(CodecError::UnknownTag { tag }),
        };
        r.finish()?;
        Ok(message)
    }
}

fn write_decision(w: &mut FrameWriter, decision: &Decision) {
    w.write_u64(decision.epoch.0);
    w.write_u64(decision.ballot.0);
    w.write_utf(Some(&decision.value));
}

fn read_decision(r: &mut FrameReader<'_>) -> Result<Decision, CodecError> {
    Ok(Decision {
        epoch: Epoch(r.read_u64()?),
        ballot: Ballot(r.read_u64()?),
        value: r.read_required_utf()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: PaxosMessage) {
        let frame = message.encode().expect("encode");
        let decoded = PaxosMessage::decode(frame.as_bytes()).expect("decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_every_message_roundtrips() {
        roundtrip(PaxosMessage::Propose {
            epoch: Epoch::new(1),
            ballot: Ballot::new(3),
        });
        roundtrip(PaxosMessage::Promise {
            ballot: Ballot::new(3),
            prior: None,
        });
        roundtrip(PaxosMessage::Promise {
            ballot: Ballot::new(6),
            prior: Some(Proposal {
                ballot: Ballot::new(4),
                value: "node-1".to_string(),
            }),
        });
        roundtrip(PaxosMessage::Reject {
            higher_ballot_seen: Ballot::new(6),
        });
        roundtrip(PaxosMessage::Accept {
            epoch: Epoch::new(1),
            ballot: Ballot::new(3),
            value: "领导者".to_string(),
        });
        roundtrip(PaxosMessage::Accepted {
            ballot: Ballot::new(3),
        });
        roundtrip(PaxosMessage::Learn {
            decision: Decision {
                epoch: Epoch::new(2),
                ballot: Ballot::new(3),
                value: "X".to_string(),
            },
        });
        roundtrip(PaxosMessage::QueryLeader);
        roundtrip(PaxosMessage::LeaderInfo {
            epoch: Epoch::ZERO,
            decision: None,
        });
        roundtrip(PaxosMessage::LeaderInfo {
            epoch: Epoch::new(3),
            decision: Some(Decision {
                epoch: Epoch::new(2),
                ballot: Ballot::new(9),
                value: "X".to_string(),
            }),
        });
        roundtrip(PaxosMessage::StaleEpoch {
            current_epoch: Epoch::new(4),
        });
    }

    #[test]
    fn test_tag_is_first_payload_byte() {
        let frame = PaxosMessage::Reject {
            higher_ballot_seen: Ballot::new(6),
        }
        .encode()
        .expect("encode");
        assert_eq!(frame.payload()[0], TAG_REJECT);
        assert_eq!(frame.payload().len(), 1 + 8);
    }

    #[test]
    fn test_unknown_tag() {
        let mut w = FrameWriter::new();
        w.write_byte(0x7f);
        let frame = w.complete().expect("complete");
        assert_eq!(
            PaxosMessage::decode(frame.as_bytes()),
            Err(CodecError::UnknownTag { tag: 0x7f })
        );
    }

    #[test]
    fn test_accept_with_null_value_rejected() {
        let mut w = FrameWriter::new();
        w.write_byte(TAG_ACCEPT);
        w.write_u64(0);
        w.write_u64(3);
        w.write_utf(None);
        let frame = w.complete().expect("complete");
        assert_eq!(
            PaxosMessage::decode(frame.as_bytes()),
            Err(CodecError::UnexpectedNull)
        );
    }

    #[test]
    fn test_truncated_message_rejected() {
        let mut w = FrameWriter::new();
        w.write_byte(TAG_PROPOSE);
        w.write_u64(0);
        w.write_u32(3);
        let frame = w.complete().expect("complete");
        assert!(matches!(
            PaxosMessage::decode(frame.as_bytes()),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut w = FrameWriter::new();
        w.write_byte(TAG_QUERY_LEADER);
        w.write_byte(0);
        let frame = w.complete().expect("complete");
        assert!(matches!(
            PaxosMessage::decode(frame.as_bytes()),
            Err(CodecError::TrailingBytes { remaining: 1 })
        ));
    }
}
