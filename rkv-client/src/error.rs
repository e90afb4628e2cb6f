//! # Client Errors
//!
//! One discriminated error kind for every failure a caller can observe, from
//! a refused socket to an exhausted pool.
//!
//! ## Notes
//! - The type is `Clone` so a single transport failure can be delivered to
//!   every request that was pending on the broken connection.
//! - A RESP error reply is *not* a failure of the connection. `Connection`
//!   hands it back as [`ReplyValue::Error`](rkv_common::ReplyValue::Error);
//!   the command façade lifts it into [`ClientError::Server`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rkv_common::{ProtocolError, ServerError};

use crate::connection::ConnectionState;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Why a pending request was aborted without its own failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The connection was closed while the request was pending.
    Closed,
    /// An earlier request on the same connection timed out; the stream can no
    /// longer be trusted to be frame-aligned.
    CommandTimeout,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Closed => write!(f, "connection closed"),
            AbortReason::CommandTimeout => write!(f, "earlier command timed out"),
        }
    }
}

/// Errors surfaced by connections, the pool and the command façade.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Socket-level failure (connect, DNS, read, write, EOF).
    #[error("transport error: {0}")]
    Io(Arc<std::io::Error>),

    /// Malformed RESP bytes, or a command that cannot be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection is not in the READY state.
    #[error("connection not ready (state: {0})")]
    NotReady(ConnectionState),

    /// A deadline passed before the reply arrived.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The request was failed because its connection went away.
    #[error("connection aborted: {0}")]
    Aborted(AbortReason),

    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(ServerError),

    /// The server demanded credentials that are missing or were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The pool is at its maximum size and nothing is idle.
    #[error("all {max} connections are occupied, consider raising the max connection limit")]
    PoolExhausted { max: usize },

    /// The pool is shutting down.
    #[error("pool is shut down")]
    PoolClosed,

    /// Address could not be parsed into host and port.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// TLS configuration or handshake failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// A reply had a shape the caller did not expect.
    #[error("unexpected response")]
    UnexpectedResponse,
}

impl ClientError {
    /// True when the error invalidated the connection it happened on.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Protocol(_)
                | ClientError::Timeout(_)
                | ClientError::Aborted(_)
                | ClientError::Tls(_)
        )
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}
