//! A participant that is both a message server and a message client.
//!
//! `start()` binds the inbound listener and then, depending on the topology:
//!
//! - **Broadcast**: sends one `REGISTER:host:port` line to the relay. The
//!   registration is fire-and-forget; failure only raises a status update.
//!   Inbound lines are forwarded to the sink as received messages.
//! - **Mesh**: spawns the outbound dispatcher. Inbound lines are forwarded
//!   to the sink and answered with an acknowledgement line.
//!
//! The dispatcher is a single consumer over a FIFO queue, so a node has at
//! most one send in flight and sends leave in submission order. Each send is
//! bounded by the configured I/O deadline, which keeps a hung peer from
//! stalling the queue forever.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::{NodeConfig, Topology},
    error::StartError,
    events::NotificationSink,
    lifecycle::{self, Lifecycle, StopRequest},
    message::{acknowledgement, read_line, registration, relay_payload, write_line},
    peer::{MeshPeer, PeerAddress},
    server, transport,
};

/// A send queued by `send_message_to_node`, consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub target_peer_id: String,
    pub payload: String,
}

pub struct MeshNode {
    config: NodeConfig,
    sink: Arc<dyn NotificationSink>,
    state: watch::Sender<Lifecycle>,
    local_addr: Mutex<Option<SocketAddr>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<OutboundRequest>>>,
    tasks: Mutex<NodeTasks>,
}

#[derive(Default)]
struct NodeTasks {
    listener: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// What the inbound listener does with each line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundRole {
    BroadcastClient,
    MeshPeer,
}

struct InboundContext {
    node_id: String,
    role: InboundRole,
    io_timeout: Duration,
    sink: Arc<dyn NotificationSink>,
}

struct Dispatcher {
    node_id: String,
    peers: Vec<MeshPeer>,
    io_timeout: Duration,
    sink: Arc<dyn NotificationSink>,
}

impl MeshNode {
    pub fn new(config: NodeConfig, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            config,
            sink,
            state: lifecycle::new_state(),
            local_addr: Mutex::new(None),
            outbound: Mutex::new(None),
            tasks: Mutex::new(NodeTasks::default()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn state(&self) -> Lifecycle {
        *self.state.borrow()
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    pub fn topology(&self) -> &Topology {
        &self.config.topology
    }

    /// Static peer table (empty for broadcast nodes).
    pub fn peers(&self) -> &[MeshPeer] {
        self.config.peers()
    }

    /// Starts the inbound listener and, per topology, registers with the relay
    /// or spawns the outbound dispatcher.
    pub async fn start(&self) -> Result<SocketAddr, StartError> {
        if !lifecycle::begin_start(&self.state) {
            return Err(StartError::AlreadyStarted(format!("node {}", self.node_id())));
        }

        let (listener, addr) = match self.bind().await {
            Ok(bound) => bound,
            Err(err) => {
                self.sink.on_status_update(&format!(
                    "node {} failed to start listener on {}: {err}",
                    self.node_id(),
                    self.config.listen
                ));
                lifecycle::finish_stop(&self.state);
                return Err(err);
            }
        };
        if self.state().is_shutting_down() {
            return Err(self.abandon_start().await);
        }
        *lock(&self.local_addr) = Some(addr);
        lock(&self.tasks).listener = Some(self.spawn_listener(listener));
        info!(node = %self.node_id(), %addr, "node listening");

        match &self.config.topology {
            Topology::Broadcast { relay } => {
                self.register_with(relay, addr).await;
                lifecycle::advance(&self.state, Lifecycle::Registered);
            }
            Topology::Mesh { peers } => {
                let (queue, requests) = mpsc::unbounded_channel();
                *lock(&self.outbound) = Some(queue);
                lock(&self.tasks).dispatcher = Some(self.spawn_dispatcher(peers.clone(), requests));
            }
        }

        // stop() may have run while registration was in flight.
        if self.state().is_shutting_down() {
            return Err(self.abandon_start().await);
        }

        lifecycle::advance(&self.state, Lifecycle::Running);
        self.sink.on_status_update(&format!(
            "node {} started, listening on {addr}",
            self.node_id()
        ));
        Ok(addr)
    }

    /// Stops the node.
    ///
    /// The listener stops accepting at once and inbound workers get the
    /// shutdown grace to finish. The outbound queue stops taking requests;
    /// whatever is already queued is drained within the same grace and the
    /// rest is discarded. Calling it again, or concurrently, is a no-op.
    pub async fn stop(&self) {
        match lifecycle::begin_stop(&self.state) {
            StopRequest::Teardown => {}
            StopRequest::NeverStarted | StopRequest::AlreadyStopping => return,
        }

        // Dropping the only sender lets the dispatcher finish once the queue is empty.
        lock(&self.outbound).take();
        let NodeTasks {
            listener,
            dispatcher,
        } = std::mem::take(&mut *lock(&self.tasks));

        // Both drains share one grace period.
        let listener_drain = async {
            if let Some(listener) = listener {
                join_task(listener, "listener").await;
            }
        };
        let dispatcher_drain = async {
            if let Some(dispatcher) = dispatcher {
                self.drain_dispatcher(dispatcher).await;
            }
        };
        tokio::join!(listener_drain, dispatcher_drain);

        lifecycle::finish_stop(&self.state);
        info!(node = %self.node_id(), "node stopped");
        self.sink
            .on_status_update(&format!("node {} stopped", self.node_id()));
    }

    /// Broadcast topology: sends `text` to the relay, prefixed with this node's id.
    pub async fn send_message(&self, text: &str) {
        let Topology::Broadcast { relay } = &self.config.topology else {
            self.sink.on_status_update(&format!(
                "node {} has no relay; use send_message_to_node",
                self.node_id()
            ));
            return;
        };

        let line = relay_payload(self.node_id(), text);
        if let Err(err) = transport::send_line(relay, &line, self.config.io_timeout).await {
            warn!(node = %self.node_id(), relay = %relay, error = %err, "relay send failed");
            self.sink
                .on_status_update(&format!("error sending message to relay {relay}: {err}"));
        }
    }

    /// Mesh topology: queues `text` for `target_peer_id` and returns immediately.
    pub fn send_message_to_node(&self, target_peer_id: &str, text: &str) {
        let request = OutboundRequest {
            target_peer_id: target_peer_id.to_string(),
            payload: text.to_string(),
        };

        let rejected = match lock(&self.outbound).as_ref() {
            Some(queue) => queue.send(request).err().map(|err| err.0),
            None => Some(request),
        };

        if let Some(request) = rejected {
            debug!(
                node = %self.node_id(),
                target = %request.target_peer_id,
                "outbound queue unavailable"
            );
            self.sink.on_status_update(&format!(
                "node {} cannot send to {}: outbound queue is not running",
                self.node_id(),
                request.target_peer_id
            ));
        }
    }

    async fn bind(&self) -> Result<(TcpListener, SocketAddr), StartError> {
        let to_bind_error = |source| StartError::Bind {
            addr: self.config.listen,
            source,
        };
        let listener = TcpListener::bind(self.config.listen)
            .await
            .map_err(to_bind_error)?;
        let addr = listener.local_addr().map_err(to_bind_error)?;
        Ok((listener, addr))
    }

    fn spawn_listener(&self, listener: TcpListener) -> JoinHandle<()> {
        let role = match self.config.topology {
            Topology::Broadcast { .. } => InboundRole::BroadcastClient,
            Topology::Mesh { .. } => InboundRole::MeshPeer,
        };
        let context = Arc::new(InboundContext {
            node_id: self.config.node_id.clone(),
            role,
            io_timeout: self.config.io_timeout,
            sink: Arc::clone(&self.sink),
        });

        tokio::spawn(server::serve(
            listener,
            lifecycle::shutdown_signal(self.state.subscribe()),
            self.config.shutdown_grace,
            move |stream, peer| handle_inbound(stream, peer, Arc::clone(&context)),
        ))
    }

    fn spawn_dispatcher(
        &self,
        peers: Vec<MeshPeer>,
        requests: mpsc::UnboundedReceiver<OutboundRequest>,
    ) -> JoinHandle<()> {
        let dispatcher = Dispatcher {
            node_id: self.config.node_id.clone(),
            peers,
            io_timeout: self.config.io_timeout,
            sink: Arc::clone(&self.sink),
        };
        tokio::spawn(dispatcher.run(requests))
    }

    async fn register_with(&self, relay: &PeerAddress, bound: SocketAddr) {
        let advertised = match &self.config.advertise_host {
            Some(host) => PeerAddress::new(host.clone(), bound.port()),
            None => PeerAddress::from(bound),
        };

        let line = registration(&advertised);
        match transport::send_line(relay, &line, self.config.io_timeout).await {
            Ok(()) => debug!(node = %self.node_id(), %relay, %advertised, "registration sent"),
            Err(err) => {
                warn!(node = %self.node_id(), %relay, error = %err, "registration failed");
                self.sink.on_status_update(&format!(
                    "node {} failed to register with relay {relay}: {err}",
                    self.node_id()
                ));
            }
        }
    }

    /// Tears down whatever a start that lost the race against `stop()` created.
    async fn abandon_start(&self) -> StartError {
        lock(&self.outbound).take();
        let NodeTasks {
            listener,
            dispatcher,
        } = std::mem::take(&mut *lock(&self.tasks));
        for task in [listener, dispatcher].into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }
        warn!(node = %self.node_id(), "node stopped while starting");
        StartError::Interrupted(format!("node {}", self.node_id()))
    }

    async fn drain_dispatcher(&self, mut dispatcher: JoinHandle<()>) {
        let grace = self.config.shutdown_grace;
        if timeout(grace, &mut dispatcher).await.is_err() {
            warn!(
                node = %self.node_id(),
                ?grace,
                "discarding outbound sends still queued after grace period"
            );
            dispatcher.abort();
            let _ = dispatcher.await;
        }
    }
}

impl Dispatcher {
    async fn run(self, mut requests: mpsc::UnboundedReceiver<OutboundRequest>) {
        while let Some(request) = requests.recv().await {
            self.dispatch(request).await;
        }
        debug!(node = %self.node_id, "outbound queue closed");
    }

    async fn dispatch(&self, request: OutboundRequest) {
        let Some(peer) = self
            .peers
            .iter()
            .find(|peer| peer.peer_id() == request.target_peer_id)
        else {
            self.sink.on_status_update(&format!(
                "error: target node {} not found",
                request.target_peer_id
            ));
            return;
        };

        match transport::request(peer.address(), &request.payload, self.io_timeout).await {
            Ok(response) => {
                debug!(node = %self.node_id, target = %peer, "message delivered");
                self.sink.on_message_sent(&format!(
                    "message sent to {peer}: '{}' - response: {response}",
                    request.payload
                ));
            }
            Err(err) => {
                warn!(node = %self.node_id, target = %peer, error = %err, "send failed");
                self.sink
                    .on_status_update(&format!("error sending message to {peer}: {err}"));
            }
        }
    }
}

async fn handle_inbound(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<InboundContext>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let line = timeout(context.io_timeout, read_line(&mut reader))
        .await
        .context("timed out waiting for a line")??;
    let Some(line) = line else {
        return Ok(());
    };

    match context.role {
        InboundRole::BroadcastClient => context.sink.on_message_received(&line),
        InboundRole::MeshPeer => {
            context.sink.on_message_received(&format!(
                "message received by {} from {peer}: {line}",
                context.node_id
            ));
            let ack = acknowledgement(&context.node_id, &line);
            timeout(context.io_timeout, write_line(&mut writer, &ack))
                .await
                .context("timed out writing acknowledgement")??;
            let _ = writer.shutdown().await;
        }
    }

    Ok(())
}

async fn join_task(task: JoinHandle<()>, name: &str) {
    if let Err(err) = task.await {
        if err.is_panic() {
            warn!(task = name, error = ?err, "node task panicked");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
