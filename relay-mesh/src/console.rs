//! Terminal front-end: reads commands from stdin and prints node events.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    select,
    sync::mpsc,
};
use tracing::warn;

use crate::{
    cli::{NodeArgs, OutputArgs, PeerArgs, RelayArgs, TimingArgs},
    config::{NodeConfig, RelayConfig, Topology},
    events::{self, NodeEvent},
    node::MeshNode,
    relay::RelayService,
};

const QUIT: &str = "/quit";
const PEERS: &str = "/peers";

pub async fn run_relay(args: RelayArgs) -> Result<()> {
    let report_interval =
        (args.report_interval_secs > 0).then(|| Duration::from_secs(args.report_interval_secs));
    let config = RelayConfig::new(args.listen)
        .with_io_timeout(Duration::from_millis(args.io_timeout_ms))
        .with_max_fanout(args.max_fanout)
        .with_report_interval(report_interval);

    let relay = RelayService::new(config);
    let addr = relay.start().await.context("relay failed to start")?;
    write_stdout(&format!("*** relay listening on {addr}")).await?;

    handle_ctrl_c(tokio::signal::ctrl_c().await);
    relay.stop().await;
    Ok(())
}

pub async fn run_node(args: NodeArgs) -> Result<()> {
    let mut config = apply_timing(
        NodeConfig::broadcast(args.id, args.listen, args.relay),
        &args.timing,
    );
    if let Some(host) = args.advertise_host {
        config = config.with_advertise_host(host);
    }
    run_with_console(config, args.output).await
}

pub async fn run_peer(args: PeerArgs) -> Result<()> {
    let config = apply_timing(NodeConfig::mesh(args.id, args.listen, args.peer), &args.timing);
    run_with_console(config, args.output).await
}

fn apply_timing(config: NodeConfig, timing: &TimingArgs) -> NodeConfig {
    config
        .with_io_timeout(Duration::from_millis(timing.io_timeout_ms))
        .with_shutdown_grace(Duration::from_millis(timing.shutdown_grace_ms))
}

async fn run_with_console(config: NodeConfig, output: OutputArgs) -> Result<()> {
    let (sink, mut events) = events::channel();
    let node = MeshNode::new(config, Arc::new(sink));

    if let Err(err) = node.start().await {
        flush_events(&mut events, &output).await?;
        return Err(err).context("node failed to start");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    run_console_loop(&node, &mut events, &mut stdin, &output).await?;

    node.stop().await;
    flush_events(&mut events, &output).await
}

async fn run_console_loop(
    node: &MeshNode,
    events: &mut mpsc::UnboundedReceiver<NodeEvent>,
    stdin: &mut Lines<BufReader<Stdin>>,
    output: &OutputArgs,
) -> Result<()> {
    loop {
        select! {
            event = events.recv() => match event {
                Some(event) => render_event(&event, output).await?,
                None => break,
            },
            line = stdin.next_line() => {
                if !handle_stdin_line(line, node).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_stdin_line(line: io::Result<Option<String>>, node: &MeshNode) -> Result<bool> {
    let Some(line) = line? else {
        return Ok(false);
    };

    let text = line.trim();
    if text.is_empty() {
        return Ok(true);
    }
    if text.eq_ignore_ascii_case(QUIT) {
        write_stdout("*** leaving").await?;
        return Ok(false);
    }
    if text.eq_ignore_ascii_case(PEERS) {
        render_peers(node).await?;
        return Ok(true);
    }

    if let Topology::Broadcast { .. } = node.topology() {
        node.send_message(text).await;
        return Ok(true);
    }

    match text.split_once(char::is_whitespace) {
        Some((target, message)) if !message.trim().is_empty() => {
            node.send_message_to_node(target, message.trim());
        }
        _ => write_stderr("!!! usage: <peer-id> <message>").await?,
    }
    Ok(true)
}

async fn render_peers(node: &MeshNode) -> io::Result<()> {
    if node.peers().is_empty() {
        return write_stdout("*** no static peers").await;
    }
    for peer in node.peers() {
        write_stdout(&format!("*** peer {peer}")).await?;
    }
    Ok(())
}

async fn flush_events(
    events: &mut mpsc::UnboundedReceiver<NodeEvent>,
    output: &OutputArgs,
) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        render_event(&event, output).await?;
    }
    Ok(())
}

async fn render_event(event: &NodeEvent, output: &OutputArgs) -> Result<()> {
    if output.json {
        let encoded = serde_json::to_string(event).context("failed to encode event")?;
        return Ok(write_stdout(&encoded).await?);
    }

    let line = match event {
        NodeEvent::Received(text) => format!("<<< {text}"),
        NodeEvent::Sent(text) => format!(">>> {text}"),
        NodeEvent::Status(text) => format!("*** {text}"),
    };
    Ok(write_stdout(&line).await?)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
