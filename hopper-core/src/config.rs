//! Static group configuration.
//!
//! The group is loaded once before the node starts and never changes
//! afterwards. It is passed by reference to whatever needs it; there is no
//! process-wide instance.
//!
//! # JSON layout
//!
//! ```json
//! {
//!   "local_server_id": 0,
//!   "endpoints": [
//!     { "server_id": 0, "address": "10.0.0.1:7000" },
//!     { "server_id": 1, "address": "10.0.0.2:7000" },
//!     { "server_id": 2, "address": "10.0.0.3:7000" }
//!   ]
//! }
//! ```
//!
//! `quorum_size` may be given explicitly but must still be a majority.

use serde::Deserialize;
use tracing::debug;

use crate::types::{Endpoint, NetworkAddress, NetworkAddressParseError, ServerId};

/// Majority of a group of `ring_size` replicas.
///
/// | ring size | quorum |
/// |-----------|--------|
/// | 1 | 1 |
/// | 3 | 2 |
/// | 4 | 3 |
/// | 5 | 3 |
pub const fn majority(ring_size: usize) -> usize {
    ring_size / 2 + 1
}

/// Errors raised while validating a group configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No endpoints were configured.
    #[error("group configuration has no endpoints")]
    EmptyGroup,

    /// Two endpoints share a server id.
    #[error("duplicate server id {0}")]
    DuplicateServerId(ServerId),

    /// Server ids must be exactly `0..N`.
    #[error("server ids must be contiguous: expected {expected}, found {found}")]
    ServerIdGap {
        /// The id that should have been present.
        expected: ServerId,
        /// The id found in its place.
        found: ServerId,
    },

    /// The local server id is not part of the group.
    #[error("local server {0} is not a member of the group")]
    UnknownLocalServer(ServerId),

    /// An explicit quorum size is not a majority of the group.
    #[error("quorum size {quorum_size} is not a majority of {ring_size} replicas")]
    InvalidQuorumSize {
        /// The configured quorum.
        quorum_size: usize,
        /// Number of replicas.
        ring_size: usize,
    },

    /// An endpoint address could not be parsed.
    #[error("invalid address for {server_id}: {source}")]
    InvalidAddress {
        /// Endpoint whose address is broken.
        server_id: ServerId,
        /// Parse failure.
        #[source]
        source: NetworkAddressParseError,
    },

    /// The configuration document is malformed.
    #[error("malformed group configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    server_id: u32,
    address: String,
}

#[derive(Debug, Deserialize)]
struct RawGroupConfig {
    local_server_id: u32,
    #[serde(default)]
    quorum_size: Option<usize>,
    endpoints: Vec<RawEndpoint>,
}

/// The replica group: ordered endpoints, the local replica and the quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    endpoints: Vec<Endpoint>,
    local_server_id: ServerId,
    quorum_size: usize,
}

impl GroupConfig {
    /// Validate and build a group with a majority quorum.
    ///
    /// Endpoints are ordered by server id; ids must form `0..N` exactly.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] describing why the group is unusable. These are
    /// fatal: a node must not start with an invalid group.
    pub fn new(
        mut endpoints: Vec<Endpoint>,
        local_server_id: ServerId,
    ) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::EmptyGroup);
        }

        endpoints.sort_by_key(|e| e.server_id);
        for pair in endpoints.windows(2) {
            if pair[0].server_id == pair[1].server_id {
                return Err(ConfigError::DuplicateServerId(pair[1].server_id));
            }
        }
        for (index, endpoint) in endpoints.iter().enumerate() {
            let expected = ServerId::new(index as u32);
            if endpoint.server_id != expected {
                return Err(ConfigError::ServerIdGap {
                    expected,
                    found: endpoint.server_id,
                });
            }
        }
        if local_server_id.0 as usize >= endpoints.len() {
            return Err(ConfigError::UnknownLocalServer(local_server_id));
        }

        let quorum_size = majority(endpoints.len());
        debug!(
            ring_size = endpoints.len(),
            quorum_size,
            local = %local_server_id,
            "group configuration validated"
        );

        Ok(Self {
            endpoints,
            local_server_id,
            quorum_size,
        })
    }

    /// Override the quorum size.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuorumSize` unless `quorum_size` is a majority and no
    /// larger than the group. Two disjoint quorums would break safety.
    pub fn with_quorum_size(mut self, quorum_size: usize) -> Result<Self, ConfigError> {
        let ring_size = self.endpoints.len();
        if quorum_size < majority(ring_size) || quorum_size > ring_size {
            return Err(ConfigError::InvalidQuorumSize {
                quorum_size,
                ring_size,
            });
        }
        self.quorum_size = quorum_size;
        Ok(self)
    }

    /// Parse and validate a JSON group document.
    ///
    /// # Errors
    ///
    /// `Parse` for malformed JSON, otherwise the same errors as [`GroupConfig::new`].
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawGroupConfig = serde_json::from_str(json)?;

        let endpoints = raw
            .endpoints
            .into_iter()
            .map(|e| {
                let server_id = ServerId::new(e.server_id);
                NetworkAddress::parse(&e.address)
                    .map(|address| Endpoint::new(server_id, address))
                    .map_err(|source| ConfigError::InvalidAddress { server_id, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self::new(endpoints, ServerId::new(raw.local_server_id))?;
        match raw.quorum_size {
            Some(quorum_size) => config.with_quorum_size(quorum_size),
            None => Ok(config),
        }
    }

    /// All endpoints ordered by server id.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Endpoint of a given server, if it is a member.
    pub fn endpoint(&self, server_id: ServerId) -> Option<&Endpoint> {
        self.endpoints.get(server_id.0 as usize)
    }

    /// This replica's id.
    pub fn local_server_id(&self) -> ServerId {
        self.local_server_id
    }

    /// This replica's endpoint.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoints[self.local_server_id.0 as usize]
    }

    /// Number of replicas.
    pub fn ring_size(&self) -> usize {
        self.endpoints.len()
    }

    /// Acknowledgements needed for a decision.
    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }
}
