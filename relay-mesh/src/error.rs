use std::{io, net::SocketAddr, num::ParseIntError};

use thiserror::Error;

/// Errors produced while parsing `host:port` and `id=host:port` entries.
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("missing ':' separator in '{0}', expected host:port")]
    MissingPort(String),

    #[error("empty host in '{0}'")]
    EmptyHost(String),

    #[error("invalid port in '{input}'")]
    InvalidPort {
        input: String,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid peer entry '{0}', expected id=host:port")]
    MissingPeerId(String),
}

/// Errors returned by `start()` on the relay and on nodes.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("{0} was already started")]
    AlreadyStarted(String),

    #[error("{0} was stopped before it finished starting")]
    Interrupted(String),

    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
