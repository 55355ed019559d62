//! Transport boundary between the coordinator and remote acceptors.
//!
//! The coordinator only needs two operations: a request/reply `call` and a
//! one-way `cast`. Connection establishment, TLS and reconnection stay
//! behind this trait.
//!
//! [`LocalTransport`] delivers frames to in-process acceptors. Links can be
//! taken down (calls fail immediately) or made silent (calls never
//! complete), which is how tests model crashed and partitioned replicas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hopper_core::{Endpoint, Frame, ServerId};
use tracing::trace;

use crate::acceptor::Acceptor;
use crate::storage::AcceptorStorage;

/// Errors returned by a [`PeerTransport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer could not be reached.
    #[error("{server_id} is unreachable")]
    Unreachable {
        /// Target replica.
        server_id: ServerId,
    },

    /// No reply arrived within the call timeout.
    #[error("call to {server_id} timed out")]
    Timeout {
        /// Target replica.
        server_id: ServerId,
    },

    /// The peer handled the request but produced no reply.
    #[error("{server_id} sent no reply")]
    NoReply {
        /// Target replica.
        server_id: ServerId,
    },

    /// The peer failed while handling the request.
    #[error("{server_id} failed to handle request: {reason}")]
    Remote {
        /// Target replica.
        server_id: ServerId,
        /// Error reported by the peer.
        reason: String,
    },
}

/// Frame delivery to other replicas.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Send `request` and wait for the reply frame.
    ///
    /// Callers bound this with their own timeout.
    async fn call(&self, endpoint: &Endpoint, request: Frame) -> Result<Frame, TransportError>;

    /// Send `message` without waiting for a reply.
    async fn cast(&self, endpoint: &Endpoint, message: Frame) -> Result<(), TransportError>;
}

/// Link condition between the local coordinator and one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Frames are delivered.
    #[default]
    Up,
    /// Calls fail immediately with `Unreachable`.
    Down,
    /// Calls never complete; casts are dropped.
    Silent,
}

struct LocalState<S: AcceptorStorage> {
    acceptors: HashMap<ServerId, Arc<Mutex<Acceptor<S>>>>,
    links: HashMap<ServerId, LinkState>,
}

/// In-process [`PeerTransport`] routing frames to registered acceptors.
pub struct LocalTransport<S: AcceptorStorage> {
    state: Mutex<LocalState<S>>,
}

impl<S: AcceptorStorage> Default for LocalTransport<S> {
    fn default() -> Self {
        Self {
            state: Mutex::new(LocalState {
                acceptors: HashMap::new(),
                links: HashMap::new(),
            }),
        }
    }
}

impl<S: AcceptorStorage> std::fmt::Debug for LocalTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport").finish_non_exhaustive()
    }
}

impl<S: AcceptorStorage> LocalTransport<S> {
    /// Create a transport with no acceptors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an acceptor under its server id, returning a shared handle.
    pub fn register(&self, acceptor: Acceptor<S>) -> Arc<Mutex<Acceptor<S>>> {
        let server_id = acceptor.server_id();
        let handle = Arc::new(Mutex::new(acceptor));
        self.lock().acceptors.insert(server_id, Arc::clone(&handle));
        handle
    }

    /// Change the link to `server_id`.
    pub fn set_link(&self, server_id: ServerId, link: LinkState) {
        self.lock().links.insert(server_id, link);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalState<S>> {
        // A panic while holding the lock leaves plain maps behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn route(&self, server_id: ServerId) -> (LinkState, Option<Arc<Mutex<Acceptor<S>>>>) {
        let state = self.lock();
        let link = state.links.get(&server_id).copied().unwrap_or_default();
        (link, state.acceptors.get(&server_id).cloned())
    }

    fn deliver(
        server_id: ServerId,
        acceptor: &Mutex<Acceptor<S>>,
        frame: &Frame,
    ) -> Result<Option<Frame>, TransportError> {
        let mut acceptor = acceptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        acceptor
            .handle_frame(frame.as_bytes())
            .map_err(|e| TransportError::Remote {
                server_id,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl<S: AcceptorStorage + 'static> PeerTransport for LocalTransport<S> {
    async fn call(&self, endpoint: &Endpoint, request: Frame) -> Result<Frame, TransportError> {
        let server_id = endpoint.server_id;
        let (link, acceptor) = self.route(server_id);
        trace!(target_server = %server_id, ?link, bytes = request.len(), "local call");

        match (link, acceptor) {
            (LinkState::Silent, _) => std::future::pending().await,
            (LinkState::Down, _) | (LinkState::Up, None) => {
                Err(TransportError::Unreachable { server_id })
            }
            (LinkState::Up, Some(acceptor)) => Self::deliver(server_id, &acceptor, &request)?
                .ok_or(TransportError::NoReply { server_id }),
        }
    }

    async fn cast(&self, endpoint: &Endpoint, message: Frame) -> Result<(), TransportError> {
        let server_id = endpoint.server_id;
        let (link, acceptor) = self.route(server_id);
        trace!(target_server = %server_id, ?link, bytes = message.len(), "local cast");

        match (link, acceptor) {
            (LinkState::Silent, _) => Ok(()),
            (LinkState::Down, _) | (LinkState::Up, None) => {
                Err(TransportError::Unreachable { server_id })
            }
            (LinkState::Up, Some(acceptor)) => {
                Self::deliver(server_id, &acceptor, &message)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot::{Ballot, Epoch};
    use crate::messages::PaxosMessage;
    use crate::storage::InMemoryAcceptorStorage;
    use crate::types::Decision;
    use hopper_core::NetworkAddress;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn endpoint(id: u32) -> Endpoint {
        Endpoint::new(
            ServerId::new(id),
            NetworkAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7000 + id as u16),
        )
    }

    fn transport() -> LocalTransport<InMemoryAcceptorStorage> {
        let transport = LocalTransport::new();
        transport.register(Acceptor::new(
            ServerId::new(0),
            InMemoryAcceptorStorage::new(),
        ));
        transport
    }

    fn propose(ballot: u64) -> Frame {
        PaxosMessage::Propose {
            epoch: Epoch::ZERO,
            ballot: Ballot::new(ballot),
        }
        .encode()
        .expect("encode")
    }

    #[tokio::test]
    async fn test_call_reaches_acceptor() {
        let transport = transport();
        let reply = transport
            .call(&endpoint(0), propose(3))
            .await
            .expect("call");
        assert!(matches!(
            PaxosMessage::decode(reply.as_bytes()).expect("decode"),
            PaxosMessage::Promise { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_down_peers_unreachable() {
        let transport = transport();
        assert_eq!(
            transport.call(&endpoint(1), propose(3)).await,
            Err(TransportError::Unreachable {
                server_id: ServerId::new(1),
            })
        );

        transport.set_link(ServerId::new(0), LinkState::Down);
        assert!(transport.call(&endpoint(0), propose(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_silent_peer_never_replies() {
        let transport = transport();
        transport.set_link(ServerId::new(0), LinkState::Silent);

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            transport.call(&endpoint(0), propose(3)),
        )
        .await;
        assert!(result.is_err(), "silent link must not reply");
    }

    #[tokio::test]
    async fn test_cast_learn_has_no_reply() {
        let transport = transport();
        let learn = PaxosMessage::Learn {
            decision: Decision {
                epoch: Epoch::ZERO,
                ballot: Ballot::new(3),
                value: "X".to_string(),
            },
        }
        .encode()
        .expect("encode");
        transport.cast(&endpoint(0), learn).await.expect("cast");

        let query = PaxosMessage::QueryLeader.encode().expect("encode");
        let reply = transport.call(&endpoint(0), query).await.expect("call");
        assert!(matches!(
            PaxosMessage::decode(reply.as_bytes()).expect("decode"),
            PaxosMessage::LeaderInfo {
                decision: Some(_),
                ..
            }
        ));
    }
}
