//! Processes that find each other through a relay and exchange short text
//! messages over plain TCP, one line per connection.
//!
//! Two topologies are supported:
//!
//! - **Broadcast**: nodes register with a [`relay::RelayService`], which
//!   fans every payload out to all registered nodes and prunes the ones it
//!   can no longer reach.
//! - **Mesh**: each [`node::MeshNode`] serves inbound messages and
//!   dispatches outbound ones to a static peer list, pairing every send with
//!   the peer's one-line acknowledgement.
//!
//! Modules:
//!
//! - [`registry`] is the concurrent membership set.
//! - [`relay`] accepts registrations and payloads and runs the fan-out.
//! - [`node`] runs a node's inbound listener and outbound dispatcher.
//! - [`events`] defines the notification sink a front-end plugs into.
//! - [`message`] and [`transport`] hold the line protocol and the
//!   deadline-bounded outbound exchanges.
//! - [`config`], [`peer`], [`lifecycle`] and [`error`] carry the shared types.
//! - [`monitor`] samples process resources for the relay's periodic report.
//! - [`cli`] and [`console`] make up the terminal front-end used by the binary.

pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod message;
pub mod monitor;
pub mod node;
pub mod peer;
pub mod registry;
pub mod relay;
mod server;
pub mod transport;

pub use config::{NodeConfig, RelayConfig, Topology};
pub use events::{ChannelSink, NodeEvent, NotificationSink};
pub use lifecycle::Lifecycle;
pub use node::MeshNode;
pub use peer::{MeshPeer, PeerAddress};
pub use registry::PeerRegistry;
pub use relay::RelayService;
