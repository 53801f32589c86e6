//! Outbound one-line exchanges over fresh TCP connections.
//!
//! `send_line` is fire-and-forget: connect, write one line, close.
//! `request` writes one line and reads one line back. Every step runs under
//! the caller's deadline so an unresponsive peer cannot stall the caller.

use std::{future::Future, io, time::Duration};

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

use crate::{
    message::{read_line, write_line},
    peer::PeerAddress,
};

pub async fn send_line(addr: &PeerAddress, line: &str, deadline: Duration) -> io::Result<()> {
    let mut stream = connect(addr, deadline).await?;
    within(deadline, "write", write_line(&mut stream, line)).await?;
    // The peer has the full line once the write is flushed; a failed FIN is not a delivery failure.
    let _ = stream.shutdown().await;
    Ok(())
}

pub async fn request(addr: &PeerAddress, line: &str, deadline: Duration) -> io::Result<String> {
    let stream = connect(addr, deadline).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    within(deadline, "write", write_line(&mut writer, line)).await?;
    let response = within(deadline, "response read", read_line(&mut reader)).await?;
    response.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{addr} closed the connection without a response"),
        )
    })
}

async fn connect(addr: &PeerAddress, deadline: Duration) -> io::Result<TcpStream> {
    within(
        deadline,
        "connect",
        TcpStream::connect((addr.host(), addr.port())),
    )
    .await
}

async fn within<T, F>(deadline: Duration, step: &str, future: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{step} timed out after {deadline:?}"),
        )),
    }
}
