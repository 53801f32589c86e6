//! Accept loop shared by the relay and by node listeners.

use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, warn};

/// Accepts connections until `shutdown` resolves, running `handler` for
/// each one on its own task.
///
/// Once shutdown begins the listener is dropped, so new connections are
/// refused, and outstanding workers get `grace` to finish before they are
/// aborted. A zero grace aborts them immediately.
pub(crate) async fn serve<F, H, Fut>(
    listener: TcpListener,
    shutdown: F,
    grace: Duration,
    handler: H,
)
where
    F: Future<Output = ()> + Send,
    H: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut workers = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        select! {
            _ = &mut shutdown => break,
            accept_result = listener.accept() => {
                handle_accept_result(accept_result, &mut workers, &handler);
            }
            Some(finished) = workers.join_next(), if !workers.is_empty() => {
                log_worker_exit(finished);
            }
        }
    }

    drop(listener);
    drain_workers(workers, grace).await;
}

fn handle_accept_result<H, Fut>(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    workers: &mut JoinSet<()>,
    handler: &H,
) where
    H: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    match result {
        Ok((stream, peer)) => {
            let connection = handler(stream, peer);
            workers.spawn(async move {
                if let Err(err) = connection.await {
                    warn!(peer = %peer, error = ?err, "connection closed with error");
                }
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn log_worker_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            warn!(error = ?err, "connection worker panicked");
        }
    }
}

async fn drain_workers(mut workers: JoinSet<()>, grace: Duration) {
    if workers.is_empty() {
        return;
    }

    if grace.is_zero() {
        debug!(outstanding = workers.len(), "aborting connection workers");
        workers.abort_all();
    } else {
        let drained = timeout(grace, async {
            while let Some(finished) = workers.join_next().await {
                log_worker_exit(finished);
            }
        })
        .await;
        if drained.is_err() {
            debug!(
                outstanding = workers.len(),
                "grace period elapsed, aborting connection workers"
            );
            workers.abort_all();
        }
    }

    while workers.join_next().await.is_some() {}
}
