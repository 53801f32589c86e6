//! Construction-time configuration for the relay and for nodes.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::peer::{MeshPeer, PeerAddress};

/// Port the relay listens on unless told otherwise.
pub const DEFAULT_RELAY_PORT: u16 = 12344;
/// Deadline applied to each connect, write and single-line read.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
/// How long `stop()` waits for in-flight work before aborting it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound on simultaneous outbound connections of one broadcast.
pub const DEFAULT_MAX_FANOUT: usize = 32;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub io_timeout: Duration,
    pub max_fanout: usize,
    /// `None` disables the periodic resource report.
    pub report_interval: Option<Duration>,
}

impl RelayConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_fanout: DEFAULT_MAX_FANOUT,
            report_interval: Some(DEFAULT_REPORT_INTERVAL),
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_max_fanout(mut self, max_fanout: usize) -> Self {
        self.max_fanout = max_fanout.max(1);
        self
    }

    pub fn with_report_interval(mut self, report_interval: Option<Duration>) -> Self {
        self.report_interval = report_interval;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_RELAY_PORT)))
    }
}

/// Which of the two topologies a node participates in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// Registers with a relay and receives its broadcasts.
    Broadcast { relay: PeerAddress },
    /// Serves inbound messages and dispatches to a static peer list.
    Mesh { peers: Vec<MeshPeer> },
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen: SocketAddr,
    /// Host announced in the `REGISTER:` line; defaults to the bound IP.
    pub advertise_host: Option<String>,
    pub topology: Topology,
    pub io_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl NodeConfig {
    pub fn broadcast(node_id: impl Into<String>, listen: SocketAddr, relay: PeerAddress) -> Self {
        Self::with_topology(node_id, listen, Topology::Broadcast { relay })
    }

    pub fn mesh(node_id: impl Into<String>, listen: SocketAddr, peers: Vec<MeshPeer>) -> Self {
        Self::with_topology(node_id, listen, Topology::Mesh { peers })
    }

    fn with_topology(node_id: impl Into<String>, listen: SocketAddr, topology: Topology) -> Self {
        Self {
            node_id: node_id.into(),
            listen,
            advertise_host: None,
            topology,
            io_timeout: DEFAULT_IO_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = Some(host.into());
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    /// Static peer table; empty for broadcast nodes.
    pub fn peers(&self) -> &[MeshPeer] {
        match &self.topology {
            Topology::Mesh { peers } => peers.as_slice(),
            Topology::Broadcast { .. } => &[],
        }
    }
}
