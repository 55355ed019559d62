//! Core types for replica addressing.
//!
//! - [`ServerId`]: position of a replica in the configured group
//! - [`NetworkAddress`]: IP address + port
//! - [`Endpoint`]: a replica = server id + network address

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Identifier of a replica inside its group.
///
/// Ids are dense: a group of `N` replicas uses exactly the ids `0..N`. The
/// id doubles as the replica's residue class in ballot numbering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ServerId(pub u32);

impl ServerId {
    /// Create a new server id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The id as a `u64`, the width used by ballot arithmetic.
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server({})", self.0)
    }
}

/// Network address (IPv4/IPv6 + port).
///
/// # Examples
///
/// ```
/// use hopper_core::NetworkAddress;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let addr = NetworkAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4500);
/// assert_eq!(addr.to_string(), "127.0.0.1:4500");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// IP address (IPv4 or IPv6).
    pub ip: IpAddr,
    /// Port number.
    pub port: u16,
}

impl NetworkAddress {
    /// Create a new network address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Parse a network address from `ip:port` or `[ipv6]:port`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkAddressParseError`] when the ip, the port or the
    /// separator is missing or malformed.
    pub fn parse(s: &str) -> Result<Self, NetworkAddressParseError> {
        if let Some(bracket_end) = s.rfind(']') {
            if !s.starts_with('[') {
                return Err(NetworkAddressParseError::InvalidIp);
            }
            let ip_str = &s[1..bracket_end];
            let port_str = s[bracket_end + 1..]
                .strip_prefix(':')
                .ok_or(NetworkAddressParseError::MissingPort)?;
            let ip: IpAddr = ip_str
                .parse()
                .map_err(|_| NetworkAddressParseError::InvalidIp)?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| NetworkAddressParseError::InvalidPort)?;
            Ok(Self::new(ip, port))
        } else {
            let (ip_str, port_str) = s
                .rsplit_once(':')
                .ok_or(NetworkAddressParseError::MissingPort)?;
            let ip: IpAddr = ip_str
                .parse()
                .map_err(|_| NetworkAddressParseError::InvalidIp)?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| NetworkAddressParseError::InvalidPort)?;
            Ok(Self::new(ip, port))
        }
    }
}

impl std::fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

impl std::str::FromStr for NetworkAddress {
    type Err = NetworkAddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error parsing a network address from string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkAddressParseError {
    /// The IP address could not be parsed.
    #[error("invalid IP address")]
    InvalidIp,
    /// The port number could not be parsed.
    #[error("invalid port number")]
    InvalidPort,
    /// No port separator (`:`) found in the input.
    #[error("missing port separator")]
    MissingPort,
}

/// A replica of the group: its id and where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Position of the replica in the group.
    pub server_id: ServerId,
    /// Address the replica listens on.
    pub address: NetworkAddress,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(server_id: ServerId, address: NetworkAddress) -> Self {
        Self { server_id, address }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.server_id, self.address)
    }
}
