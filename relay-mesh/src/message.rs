use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{error::AddressError, peer::PeerAddress};

const LINE_ENDINGS: &[char] = &['\n', '\r'];
const REGISTER_PREFIX: &str = "REGISTER:";

/// Longest line accepted on any connection, terminator included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// A single line received by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayLine {
    /// `REGISTER:<host>:<port>`, a node asking to join the membership.
    Register(PeerAddress),
    /// Anything else; broadcast verbatim.
    Payload(String),
}

impl RelayLine {
    /// Classifies a line. Only a `REGISTER:` line with an unparsable address fails.
    pub fn parse(line: &str) -> Result<Self, AddressError> {
        match line.strip_prefix(REGISTER_PREFIX) {
            Some(address) => Ok(Self::Register(address.parse()?)),
            None => Ok(Self::Payload(line.to_string())),
        }
    }
}

pub fn registration(addr: &PeerAddress) -> String {
    format!("{REGISTER_PREFIX}{addr}")
}

pub fn join_announcement(addr: &PeerAddress) -> String {
    format!("STATUS: new node joined -> {addr}")
}

pub fn relay_payload(node_id: &str, text: &str) -> String {
    format!("{node_id}: {text}")
}

pub fn acknowledgement(node_id: &str, payload: &str) -> String {
    format!("{node_id} - message '{payload}' received")
}

/// Reads one line, stripping the terminator. `None` means the peer closed
/// the connection before sending anything.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// rejected. A line longer than [`MAX_LINE_BYTES`] fails with `InvalidData`.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(MAX_LINE_BYTES as u64);
    let bytes = limited.read_until(b'\n', &mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    if bytes == MAX_LINE_BYTES && line.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {MAX_LINE_BYTES} bytes"),
        ));
    }
    let decoded = String::from_utf8_lossy(&line);
    Ok(Some(decoded.trim_end_matches(LINE_ENDINGS).to_string()))
}

/// Writes `line` plus a newline delimiter and flushes.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Embedded newlines would split one message into several on the wire.
    let sanitized = line.replace(LINE_ENDINGS, " ");
    let mut encoded = Vec::with_capacity(sanitized.len() + 1);
    encoded.extend_from_slice(sanitized.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
