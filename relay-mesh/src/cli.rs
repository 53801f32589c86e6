use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{
        DEFAULT_IO_TIMEOUT, DEFAULT_MAX_FANOUT, DEFAULT_REPORT_INTERVAL, DEFAULT_SHUTDOWN_GRACE,
    },
    peer::{MeshPeer, PeerAddress},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay that keeps the membership and fans out messages.
    Relay(RelayArgs),
    /// Run a broadcast node that registers with a relay.
    Node(NodeArgs),
    /// Run a mesh node with a static peer list.
    Peer(PeerArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Socket address the relay should bind to. Use 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:12344")]
    pub listen: SocketAddr,

    /// Seconds between resource reports; 0 disables them.
    #[arg(long, default_value_t = DEFAULT_REPORT_INTERVAL.as_secs())]
    pub report_interval_secs: u64,

    /// Maximum simultaneous deliveries per broadcast.
    #[arg(long, default_value_t = DEFAULT_MAX_FANOUT)]
    pub max_fanout: usize,

    /// Deadline in milliseconds for each inbound read and each delivery.
    #[arg(long, default_value_t = DEFAULT_IO_TIMEOUT.as_millis() as u64)]
    pub io_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Identifier shown in front of every message this node sends.
    #[arg(long)]
    pub id: String,

    /// Socket address the node listens on for relay broadcasts.
    #[arg(long, default_value = "127.0.0.1:12345")]
    pub listen: SocketAddr,

    /// Address of the relay to register with.
    #[arg(long, default_value = "127.0.0.1:12344")]
    pub relay: PeerAddress,

    /// Host announced to the relay instead of the bound IP.
    #[arg(long)]
    pub advertise_host: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub timing: TimingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct PeerArgs {
    /// Identifier of this node, used in acknowledgements.
    #[arg(long)]
    pub id: String,

    /// Socket address the node listens on for direct messages.
    #[arg(long)]
    pub listen: SocketAddr,

    /// Comma-separated peer table: id=host:port,id=host:port,...
    #[arg(long, value_delimiter = ',')]
    pub peer: Vec<MeshPeer>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub timing: TimingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Print events as JSON lines instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TimingArgs {
    /// Deadline in milliseconds for each connect, write and response read.
    #[arg(long, default_value_t = DEFAULT_IO_TIMEOUT.as_millis() as u64)]
    pub io_timeout_ms: u64,

    /// Milliseconds to wait for in-flight work when stopping.
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE.as_millis() as u64)]
    pub shutdown_grace_ms: u64,
}
