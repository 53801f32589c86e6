use std::{fmt, net::SocketAddr, str::FromStr};

use serde::Serialize;

use crate::error::AddressError;

/// Network identity of a participant: equality and hashing cover `(host, port)` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        // Split on the last colon so bracket-less IPv6 hosts keep their separators.
        let Some((host, port)) = trimmed.rsplit_once(':') else {
            return Err(AddressError::MissingPort(trimmed.to_string()));
        };
        if host.is_empty() {
            return Err(AddressError::EmptyHost(trimmed.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|source| AddressError::InvalidPort {
                input: trimmed.to_string(),
                source,
            })?;
        Ok(Self::new(host, port))
    }
}

/// Entry of a mesh node's static peer table.
///
/// `peer_id` is only used for lookup; the wrapped [`PeerAddress`] stays the
/// network identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeshPeer {
    peer_id: String,
    address: PeerAddress,
}

impl MeshPeer {
    pub fn new(peer_id: impl Into<String>, address: PeerAddress) -> Self {
        Self {
            peer_id: peer_id.into(),
            address,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }
}

impl fmt::Display for MeshPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.peer_id, self.address)
    }
}

impl FromStr for MeshPeer {
    type Err = AddressError;

    /// Parses `id=host:port`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let Some((peer_id, address)) = trimmed.split_once('=') else {
            return Err(AddressError::MissingPeerId(trimmed.to_string()));
        };
        let peer_id = peer_id.trim();
        if peer_id.is_empty() {
            return Err(AddressError::MissingPeerId(trimmed.to_string()));
        }
        Ok(Self::new(peer_id, address.parse()?))
    }
}
