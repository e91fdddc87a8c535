use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::queue::QueueOverflow;

/// Errors raised by the acceptor.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listening socket could not be bound. Fatal at startup.
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// A single accept call failed. The accept loop logs it and keeps going.
    #[error("failed to accept connection")]
    Accept(#[source] io::Error),
}

/// Why a session left the `Active` state.
///
/// Every variant is terminal for that one session only; nothing here is ever
/// surfaced to other clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseReason {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("read failed: {0}")]
    ReadFailed(io::ErrorKind),
    #[error("write failed: {0}")]
    WriteFailed(io::ErrorKind),
    #[error(transparent)]
    Overflow(#[from] QueueOverflow),
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),
    #[error("relay shutting down")]
    Shutdown,
}
