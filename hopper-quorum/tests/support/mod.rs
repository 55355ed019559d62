//! Shared harness for election tests.
//!
//! - [`init_tracing`]: route `tracing` output to the test writer
//! - [`CapturedLogs`]: collect warnings in memory so tests can count them
//! - [`group`]: a validated group of `n` loopback replicas
//! - [`ScriptedTransport`]: a [`PeerTransport`] whose replicas answer from
//!   a fixed script and record every request they receive

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hopper_core::{Endpoint, Frame, GroupConfig, NetworkAddress, ServerId};
use hopper_quorum::{Ballot, Epoch, PaxosMessage, PeerTransport, TransportError};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber for the current thread.
pub fn init_tracing() -> tracing::dispatcher::DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .finish();
    tracing::dispatcher::set_default(&subscriber.into())
}

/// Warnings written by the code under test, kept in memory.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Capture `WARN` and above on the current thread until the guard drops.
    pub fn install(&self) -> tracing::dispatcher::DefaultGuard {
        let logs = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || logs.clone())
            .finish();
        tracing::dispatcher::set_default(&subscriber.into())
    }

    /// Number of captured lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        let bytes = self.0.lock().expect("lock");
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Endpoint of replica `id` on loopback.
pub fn endpoint(id: u32) -> Endpoint {
    Endpoint::new(
        ServerId::new(id),
        NetworkAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7000 + id as u16),
    )
}

/// A group of `n` replicas seen from `local`.
pub fn group(n: u32, local: u32) -> GroupConfig {
    GroupConfig::new((0..n).map(endpoint).collect(), ServerId::new(local)).expect("valid group")
}

/// How a scripted replica answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Promise without prior, accept everything, know no leader.
    Grant,
    /// Reject every request with this ballot.
    Reject(u64),
    /// Promise, then reject the accept with this ballot.
    RejectAccept(u64),
    /// Never answer.
    Hang,
    /// Promise, then never answer the accept.
    HangAccept,
    /// Grant after sleeping this long.
    Delay(Duration),
    /// Sit in this epoch: older requests are told so, the rest are granted.
    Epoch(u64),
    /// Answer with a frame that does not decode.
    Garbage,
    /// Fail immediately.
    Down,
}

/// Transport whose replicas follow a [`Behavior`].
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    behaviors: Mutex<HashMap<ServerId, Behavior>>,
    received: Mutex<Vec<(ServerId, PaxosMessage)>>,
}

impl ScriptedTransport {
    pub fn new(behaviors: impl IntoIterator<Item = (u32, Behavior)>) -> Self {
        Self {
            behaviors: Mutex::new(
                behaviors
                    .into_iter()
                    .map(|(id, b)| (ServerId::new(id), b))
                    .collect(),
            ),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, id: u32, behavior: Behavior) {
        self.behaviors
            .lock()
            .expect("lock")
            .insert(ServerId::new(id), behavior);
    }

    /// Every request received so far, in arrival order.
    pub fn received(&self) -> Vec<(ServerId, PaxosMessage)> {
        self.received.lock().expect("lock").clone()
    }

    /// Ballots of every `Propose` received.
    pub fn proposed_ballots(&self) -> Vec<Ballot> {
        self.received()
            .into_iter()
            .filter_map(|(_, m)| match m {
                PaxosMessage::Propose { ballot, .. } => Some(ballot),
                _ => None,
            })
            .collect()
    }

    fn behavior(&self, server_id: ServerId) -> Behavior {
        self.behaviors
            .lock()
            .expect("lock")
            .get(&server_id)
            .cloned()
            .unwrap_or(Behavior::Down)
    }

    fn record(&self, server_id: ServerId, frame: &Frame) -> PaxosMessage {
        let message = PaxosMessage::decode(frame.as_bytes()).expect("coordinator sent valid frame");
        self.received
            .lock()
            .expect("lock")
            .push((server_id, message.clone()));
        message
    }
}

fn grant(request: &PaxosMessage) -> Option<PaxosMessage> {
    match request {
        PaxosMessage::Propose { ballot, .. } => Some(PaxosMessage::Promise {
            ballot: *ballot,
            prior: None,
        }),
        PaxosMessage::Accept { ballot, .. } => Some(PaxosMessage::Accepted { ballot: *ballot }),
        PaxosMessage::QueryLeader => Some(PaxosMessage::LeaderInfo {
            epoch: Epoch::ZERO,
            decision: None,
        }),
        _ => None,
    }
}

fn in_epoch(current: Epoch, request: &PaxosMessage) -> Option<PaxosMessage> {
    match request {
        PaxosMessage::Propose { epoch, .. } | PaxosMessage::Accept { epoch, .. }
            if *epoch < current =>
        {
            Some(PaxosMessage::StaleEpoch {
                current_epoch: current,
            })
        }
        PaxosMessage::QueryLeader => Some(PaxosMessage::LeaderInfo {
            epoch: current,
            decision: None,
        }),
        other => grant(other),
    }
}

fn reply(server_id: ServerId, message: Option<PaxosMessage>) -> Result<Frame, TransportError> {
    message
        .ok_or(TransportError::NoReply { server_id })?
        .encode()
        .map_err(|e| TransportError::Remote {
            server_id,
            reason: e.to_string(),
        })
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn call(&self, endpoint: &Endpoint, request: Frame) -> Result<Frame, TransportError> {
        let server_id = endpoint.server_id;
        let message = self.record(server_id, &request);
        let is_accept = matches!(message, PaxosMessage::Accept { .. });

        match self.behavior(server_id) {
            Behavior::Grant => reply(server_id, grant(&message)),
            Behavior::Reject(higher) => reply(
                server_id,
                Some(PaxosMessage::Reject {
                    higher_ballot_seen: Ballot::new(higher),
                }),
            ),
            Behavior::RejectAccept(higher) if is_accept => reply(
                server_id,
                Some(PaxosMessage::Reject {
                    higher_ballot_seen: Ballot::new(higher),
                }),
            ),
            Behavior::RejectAccept(_) => reply(server_id, grant(&message)),
            Behavior::Hang => std::future::pending().await,
            Behavior::HangAccept if is_accept => std::future::pending().await,
            Behavior::HangAccept => reply(server_id, grant(&message)),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                reply(server_id, grant(&message))
            }
            Behavior::Epoch(epoch) => reply(server_id, in_epoch(Epoch::new(epoch), &message)),
            Behavior::Garbage => {
                Ok(Frame::from_bytes(Bytes::from_static(&[1, 0, 0, 0, 0xff])).expect("frame"))
            }
            Behavior::Down => Err(TransportError::Unreachable { server_id }),
        }
    }

    async fn cast(&self, endpoint: &Endpoint, message: Frame) -> Result<(), TransportError> {
        self.record(endpoint.server_id, &message);
        Ok(())
    }
}
