use anyhow::Result;
use clap::Parser;

use relay_mesh::{
    cli::{Cli, Command},
    console,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so stdout carries only console output.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Relay(args) => console::run_relay(args).await?,
        Command::Node(args) => console::run_node(args).await?,
        Command::Peer(args) => console::run_peer(args).await?,
    }

    Ok(())
}
