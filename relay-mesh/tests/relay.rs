use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use relay_mesh::{
    Lifecycle, MeshNode, NodeConfig, NodeEvent, PeerAddress, RelayConfig, RelayService,
    error::StartError,
    events,
    message::{join_announcement, read_line, registration},
    transport,
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc::UnboundedReceiver,
    time::{sleep, timeout},
};

const IO_TIMEOUT: Duration = Duration::from_secs(1);
const WAIT: Duration = Duration::from_secs(3);

fn loopback() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
}

async fn start_relay() -> Result<(RelayService, PeerAddress)> {
    let relay = RelayService::new(
        RelayConfig::new(loopback())
            .with_io_timeout(IO_TIMEOUT)
            .with_report_interval(None),
    );
    let addr = relay.start().await?;
    Ok((relay, PeerAddress::from(addr)))
}

async fn member() -> Result<(TcpListener, PeerAddress)> {
    let listener = TcpListener::bind(loopback()).await?;
    let addr = PeerAddress::from(listener.local_addr()?);
    Ok((listener, addr))
}

async fn register(relay: &PeerAddress, member: &PeerAddress) -> Result<()> {
    transport::send_line(relay, &registration(member), IO_TIMEOUT).await?;
    Ok(())
}

async fn accept_line(listener: &TcpListener) -> Result<String> {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .context("timed out waiting for a delivery")??;
    let mut reader = BufReader::new(stream);
    read_line(&mut reader)
        .await?
        .ok_or_else(|| anyhow!("delivery closed without a line"))
}

async fn assert_no_delivery(listener: &TcpListener) {
    let next = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(next.is_err(), "unexpected extra delivery");
}

async fn wait_until<F>(description: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for {description}"))
}

async fn wait_for_event<F>(
    events: &mut UnboundedReceiver<NodeEvent>,
    mut matches: F,
) -> Result<NodeEvent>
where
    F: FnMut(&NodeEvent) -> bool,
{
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .context("timed out waiting for a node event")?
            .context("node sink closed")?;
        if matches(&event) {
            return Ok(event);
        }
    }
}

#[tokio::test]
async fn duplicate_registration_announces_once() -> Result<()> {
    let (relay, relay_addr) = start_relay().await?;
    let (listener, a) = member().await?;

    register(&relay_addr, &a).await?;
    assert_eq!(accept_line(&listener).await?, join_announcement(&a));

    register(&relay_addr, &a).await?;
    transport::send_line(&relay_addr, "NODO-X: ping", IO_TIMEOUT).await?;
    assert_eq!(accept_line(&listener).await?, "NODO-X: ping");
    assert_no_delivery(&listener).await;

    assert_eq!(relay.registry().snapshot(), vec![a]);
    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_member_is_pruned_and_others_still_receive() -> Result<()> {
    let (relay, relay_addr) = start_relay().await?;
    let (a_listener, a) = member().await?;
    let (b_listener, b) = member().await?;

    register(&relay_addr, &a).await?;
    assert_eq!(accept_line(&a_listener).await?, join_announcement(&a));
    register(&relay_addr, &b).await?;
    assert_eq!(accept_line(&a_listener).await?, join_announcement(&b));
    assert_eq!(accept_line(&b_listener).await?, join_announcement(&b));

    drop(b_listener);
    transport::send_line(&relay_addr, "NODO-A: anyone there?", IO_TIMEOUT).await?;
    assert_eq!(accept_line(&a_listener).await?, "NODO-A: anyone there?");

    let registry = relay.registry();
    wait_until("pruning of the closed member", || !registry.contains(&b)).await?;
    assert_eq!(registry.snapshot(), vec![a]);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn malformed_registrations_are_ignored() -> Result<()> {
    let (relay, relay_addr) = start_relay().await?;
    let (listener, a) = member().await?;

    transport::send_line(&relay_addr, "REGISTER:nohost", IO_TIMEOUT).await?;
    transport::send_line(&relay_addr, "REGISTER:127.0.0.1:notaport", IO_TIMEOUT).await?;
    register(&relay_addr, &a).await?;

    assert_eq!(accept_line(&listener).await?, join_announcement(&a));
    assert_no_delivery(&listener).await;
    assert_eq!(relay.registry().snapshot(), vec![a]);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn stop_is_idempotent_and_releases_the_port() -> Result<()> {
    let (relay, relay_addr) = start_relay().await?;
    assert_eq!(relay.state(), Lifecycle::Running);

    tokio::join!(relay.stop(), relay.stop());
    relay.stop().await;

    assert_eq!(relay.state(), Lifecycle::Stopped);
    let connect = TcpStream::connect((relay_addr.host(), relay_addr.port())).await;
    assert!(connect.is_err(), "listener should be closed after stop");
    Ok(())
}

#[tokio::test]
async fn relay_bind_failure_is_fatal() -> Result<()> {
    let taken = TcpListener::bind(loopback()).await?;
    let relay = RelayService::new(RelayConfig::new(taken.local_addr()?).with_report_interval(None));

    assert!(matches!(relay.start().await, Err(StartError::Bind { .. })));
    assert_eq!(relay.state(), Lifecycle::Stopped);
    assert!(matches!(
        relay.start().await,
        Err(StartError::AlreadyStarted(_))
    ));
    Ok(())
}

#[tokio::test]
async fn broadcast_nodes_exchange_messages_through_the_relay() -> Result<()> {
    let (relay, relay_addr) = start_relay().await?;

    let (sink_a, mut events_a) = events::channel();
    let node_a = MeshNode::new(
        NodeConfig::broadcast("NODO-A", loopback(), relay_addr.clone()).with_io_timeout(IO_TIMEOUT),
        Arc::new(sink_a),
    );
    let addr_a = PeerAddress::from(node_a.start().await?);
    let announce_a = join_announcement(&addr_a);
    wait_for_event(&mut events_a, |event| {
        matches!(event, NodeEvent::Received(text) if *text == announce_a)
    })
    .await?;

    let (sink_b, mut events_b) = events::channel();
    let node_b = MeshNode::new(
        NodeConfig::broadcast("NODO-B", loopback(), relay_addr.clone()).with_io_timeout(IO_TIMEOUT),
        Arc::new(sink_b),
    );
    let addr_b = PeerAddress::from(node_b.start().await?);
    let announce_b = join_announcement(&addr_b);
    wait_for_event(&mut events_a, |event| {
        matches!(event, NodeEvent::Received(text) if *text == announce_b)
    })
    .await?;
    assert_eq!(node_b.state(), Lifecycle::Running);

    node_b.send_message("hello").await;

    wait_for_event(&mut events_a, |event| {
        matches!(event, NodeEvent::Received(text) if text == "NODO-B: hello")
    })
    .await?;
    // The sender is a member too, so it hears its own broadcast.
    wait_for_event(&mut events_b, |event| {
        matches!(event, NodeEvent::Received(text) if text == "NODO-B: hello")
    })
    .await?;

    node_a.stop().await;
    node_b.stop().await;
    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_relay_only_raises_a_status() -> Result<()> {
    let (unused, relay_addr) = member().await?;
    drop(unused);

    let (sink, mut events) = events::channel();
    let node = MeshNode::new(
        NodeConfig::broadcast("NODO-A", loopback(), relay_addr).with_io_timeout(IO_TIMEOUT),
        Arc::new(sink),
    );
    node.start().await?;

    let status = wait_for_event(&mut events, |event| matches!(event, NodeEvent::Status(_))).await?;
    assert!(status.text().contains("failed to register"), "{status:?}");
    assert_eq!(node.state(), Lifecycle::Running);

    node.send_message("lost").await;
    let status = wait_for_event(&mut events, |event| {
        matches!(event, NodeEvent::Status(text) if text.contains("error sending message to relay"))
    })
    .await?;
    assert!(status.text().contains("relay"));

    node.stop().await;
    Ok(())
}

#[tokio::test]
async fn non_utf8_payload_is_relayed_lossily() -> Result<()> {
    let (relay, relay_addr) = start_relay().await?;
    let (listener, a) = member().await?;

    register(&relay_addr, &a).await?;
    assert_eq!(accept_line(&listener).await?, join_announcement(&a));

    let mut sender = TcpStream::connect((relay_addr.host(), relay_addr.port())).await?;
    sender.write_all(b"hola \xe9t\xe9\n").await?;
    sender.shutdown().await?;

    assert_eq!(accept_line(&listener).await?, "hola \u{FFFD}t\u{FFFD}");
    assert_eq!(relay.registry().snapshot(), vec![a]);

    relay.stop().await;
    Ok(())
}
