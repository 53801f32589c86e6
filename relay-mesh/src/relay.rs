//! Rendezvous relay: keeps the membership and fans payloads out to it.
//!
//! Each inbound connection carries exactly one line. `REGISTER:host:port`
//! adds the sender to the membership (announcing first-time joins to
//! everyone); any other line is broadcast verbatim. The relay never replies
//! on the inbound socket.
//!
//! A broadcast snapshots the membership and delivers over fresh connections,
//! at most `max_fanout` at a time. Each leg is independent: a member that
//! cannot be reached is pruned without affecting the other legs.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use futures::{StreamExt, stream};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    error::StartError,
    lifecycle::{self, Lifecycle, StopRequest},
    message::{RelayLine, join_announcement, read_line},
    monitor,
    peer::PeerAddress,
    registry::PeerRegistry,
    server, transport,
};

pub struct RelayService {
    config: RelayConfig,
    registry: Arc<PeerRegistry>,
    state: watch::Sender<Lifecycle>,
    local_addr: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub pruned: Vec<PeerAddress>,
}

struct RelayContext {
    registry: Arc<PeerRegistry>,
    io_timeout: Duration,
    max_fanout: usize,
}

impl RelayService {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            registry: Arc::new(PeerRegistry::new()),
            state: lifecycle::new_state(),
            local_addr: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn state(&self) -> Lifecycle {
        *self.state.borrow()
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds the listener and starts the accept loop and the resource reporter.
    ///
    /// A bind failure is fatal: the relay moves to `Stopped` and cannot be restarted.
    pub async fn start(&self) -> Result<SocketAddr, StartError> {
        if !lifecycle::begin_start(&self.state) {
            return Err(StartError::AlreadyStarted("relay".to_string()));
        }

        let listener = match TcpListener::bind(self.config.listen).await {
            Ok(listener) => listener,
            Err(source) => {
                warn!(addr = %self.config.listen, error = ?source, "relay failed to bind");
                lifecycle::finish_stop(&self.state);
                return Err(StartError::Bind {
                    addr: self.config.listen,
                    source,
                });
            }
        };
        let addr = listener.local_addr().map_err(|source| StartError::Bind {
            addr: self.config.listen,
            source,
        })?;
        if self.state().is_shutting_down() {
            return Err(StartError::Interrupted("relay".to_string()));
        }
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(addr);
        info!(%addr, "relay listening");

        let mut tasks = vec![self.spawn_accept_loop(listener)];
        if let Some(period) = self.config.report_interval {
            tasks.push(tokio::spawn(monitor::report_until(
                self.registry(),
                period,
                lifecycle::shutdown_signal(self.state.subscribe()),
            )));
        }
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);

        lifecycle::advance(&self.state, Lifecycle::Running);
        Ok(addr)
    }

    /// Stops accepting, cancels the reporter and aborts outstanding workers.
    /// Calling it again, or concurrently, is a no-op.
    pub async fn stop(&self) {
        match lifecycle::begin_stop(&self.state) {
            StopRequest::Teardown => {}
            StopRequest::NeverStarted | StopRequest::AlreadyStopping => return,
        }
        info!("relay shutting down");

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(err) = task.await {
                if err.is_panic() {
                    warn!(error = ?err, "relay task panicked");
                }
            }
        }

        lifecycle::finish_stop(&self.state);
        info!(members = self.registry.len(), "relay stopped");
    }

    fn spawn_accept_loop(&self, listener: TcpListener) -> JoinHandle<()> {
        let context = Arc::new(RelayContext {
            registry: self.registry(),
            io_timeout: self.config.io_timeout,
            max_fanout: self.config.max_fanout,
        });
        let shutdown = lifecycle::shutdown_signal(self.state.subscribe());

        tokio::spawn(server::serve(
            listener,
            shutdown,
            Duration::ZERO,
            move |stream, _peer| handle_connection(stream, Arc::clone(&context)),
        ))
    }
}

async fn handle_connection(stream: TcpStream, context: Arc<RelayContext>) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let line = timeout(context.io_timeout, read_line(&mut reader))
        .await
        .context("timed out waiting for a line")??;
    drop(reader);

    let Some(line) = line else {
        debug!("connection closed without data");
        return Ok(());
    };

    match RelayLine::parse(&line) {
        Ok(RelayLine::Register(addr)) => handle_registration(&context, addr).await,
        Ok(RelayLine::Payload(payload)) => {
            info!(payload, "relaying message");
            broadcast(&context, &payload).await;
        }
        Err(err) => warn!(line, error = %err, "dropping malformed registration"),
    }

    Ok(())
}

async fn handle_registration(context: &RelayContext, addr: PeerAddress) {
    if !context.registry.add(addr.clone()) {
        debug!(%addr, "node already registered");
        return;
    }
    info!(%addr, members = context.registry.len(), "node registered");
    broadcast(context, &join_announcement(&addr)).await;
}

async fn broadcast(context: &RelayContext, payload: &str) {
    let outcome = fan_out(
        &context.registry,
        payload,
        context.max_fanout,
        context.io_timeout,
    )
    .await;
    debug!(
        delivered = outcome.delivered,
        pruned = outcome.pruned.len(),
        "broadcast finished"
    );
}

/// Delivers `payload` to a snapshot of `registry`, removing every member
/// whose leg fails. Legs complete in any order.
pub async fn fan_out(
    registry: &PeerRegistry,
    payload: &str,
    max_fanout: usize,
    io_timeout: Duration,
) -> FanOut {
    let legs = stream::iter(registry.snapshot())
        .map(|member| async move {
            let result = transport::send_line(&member, payload, io_timeout).await;
            (member, result)
        })
        .buffer_unordered(max_fanout.max(1));
    tokio::pin!(legs);

    let mut outcome = FanOut::default();
    while let Some((member, result)) = legs.next().await {
        match result {
            Ok(()) => outcome.delivered += 1,
            Err(err) => {
                warn!(peer = %member, error = %err, "delivery failed, removing member");
                registry.remove(&member);
                outcome.pruned.push(member);
            }
        }
    }
    outcome
}
