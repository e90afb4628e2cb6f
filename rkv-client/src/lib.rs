//! # RespKV Async Client
//!
//! Purpose: Talk to a Redis-compatible server over RESP2 with connections
//! that pipeline requests and a pool that bounds how many sockets are open.
//!
//! ## Design Principles
//! 1. **Actor Pattern**: Each connection is driven by one task that owns the
//!    socket; handles are cheap clones.
//! 2. **Object Pool Pattern**: The pool reuses READY connections and evicts
//!    idle or failed ones on its own.
//! 3. **Streaming Decoding**: Replies split across reads are resumed, never
//!    assumed to arrive whole.
//! 4. **Typed Failures**: Every failure is a [`ClientError`] variant; error
//!    replies from the server are values, not transport failures.
//!
//! ## Example
//!
//! ```no_run
//! use rkv_client::{Client, Pool, PoolConfig};
//!
//! # async fn demo() -> rkv_client::ClientResult<()> {
//! let pool = Pool::new(PoolConfig::new("127.0.0.1", 6379));
//! let client = Client::with_pool(pool.clone());
//! client.set("greeting", "hello").await?;
//! assert_eq!(client.get("greeting").await?.as_deref(), Some("hello"));
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod connection;
mod error;
mod pool;
mod transport;
mod value;

pub use client::{Client, ClientTtl, ListPosition, ScoreOrder};
pub use config::{
    ConnectionConfig, PoolConfig, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST,
    DEFAULT_POOL_IDLE_TIMEOUT, DEFAULT_POOL_MAX, DEFAULT_POOL_MIN, DEFAULT_PORT,
    DEFAULT_REAP_INTERVAL, POOL_MIN_CAP,
};
pub use connection::{Connection, ConnectionEvent, ConnectionId, ConnectionState};
pub use error::{AbortReason, ClientError, ClientResult};
pub use pool::{Pool, PoolStatus, PooledConnection};
pub use transport::TlsConfig;
pub use value::FieldValue;

pub use rkv_common::{Arg, Command, Pipeline, ProtocolError, ReplyValue, ServerError};
