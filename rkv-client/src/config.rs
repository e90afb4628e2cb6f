//! # Client Configuration
//!
//! Purpose: Hold connection and pool options as plain in-memory structures
//! with documented defaults.
//!
//! ## Design Principles
//! 1. **Tolerant Input**: Missing or zero host/port fall back to defaults and
//!    an inverted min/max pair is normalized rather than rejected.
//! 2. **Serde-Friendly**: Both structs deserialize from partial documents;
//!    durations are written in milliseconds.
//! 3. **Template Pattern**: The pool stamps every connection it creates from
//!    one `ConnectionConfig`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ClientError, ClientResult};
use crate::transport::TlsConfig;

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default limit for opening the socket (and TLS handshake).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default limit for a request (or a pipelined batch) to be answered.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default inactivity period after which a pooled connection may be evicted.
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of connections the pool tries to keep open.
pub const DEFAULT_POOL_MIN: usize = 2;
/// Upper bound for the configured minimum.
pub const POOL_MIN_CAP: usize = 10;
/// Default maximum number of pooled connections.
pub const DEFAULT_POOL_MAX: usize = 10;
/// Default period of the background reaper.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(600);

/// Options for one connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// ACL user name sent with AUTH (only used when `password` is set).
    pub username: Option<String>,
    /// Password sent with AUTH when the server demands authentication.
    pub password: Option<String>,
    /// Limit for opening the socket.
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis::duration")]
    pub connect_timeout: Duration,
    /// Limit for each request to be answered.
    #[serde(rename = "command_timeout_ms", deserialize_with = "millis::duration")]
    pub command_timeout: Duration,
    /// Inactivity period after which an `IdleTimeout` event is emitted.
    #[serde(rename = "idle_timeout_ms", deserialize_with = "millis::optional_duration")]
    pub idle_timeout: Option<Duration>,
    /// TLS material; plain TCP when absent.
    #[serde(skip)]
    pub tls: Option<TlsConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            idle_timeout: None,
            tls: None,
        }
    }
}

impl ConnectionConfig {
    /// Creates a configuration for `host:port` with default timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnectionConfig {
            host: host.into(),
            port,
            ..ConnectionConfig::default()
        }
    }

    /// Parses `host:port` (IPv6 hosts in brackets). An empty host falls back
    /// to [`DEFAULT_HOST`].
    pub fn from_addr(addr: &str) -> ClientResult<Self> {
        let invalid = || ClientError::InvalidAddress(addr.to_string());
        let (host, port) = addr.trim().rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let host = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host);
        if host.contains(':') && !addr.contains('[') {
            return Err(invalid());
        }
        Ok(ConnectionConfig::new(host, port))
    }

    /// Host and port to dial, with empty values replaced by the defaults.
    pub fn address(&self) -> (&str, u16) {
        let host = if self.host.trim().is_empty() {
            DEFAULT_HOST
        } else {
            self.host.as_str()
        };
        let port = if self.port == 0 { DEFAULT_PORT } else { self.port };
        (host, port)
    }
}

/// Options for a connection pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Template for every pooled connection.
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    /// Number of connections the pool tries to keep open.
    pub min: usize,
    /// Hard cap on open connections.
    pub max: usize,
    /// Inactivity period after which an idle pooled connection is evicted.
    #[serde(rename = "pool_idle_timeout_ms", deserialize_with = "millis::duration")]
    pub idle_timeout: Duration,
    /// Period of the background reaper.
    #[serde(rename = "reap_interval_ms", deserialize_with = "millis::duration")]
    pub reap_interval: Duration,
    /// Open `min` connections in the background when the pool is created.
    pub prefill: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            connection: ConnectionConfig::default(),
            min: DEFAULT_POOL_MIN,
            max: DEFAULT_POOL_MAX,
            idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            reap_interval: DEFAULT_REAP_INTERVAL,
            prefill: false,
        }
    }
}

impl PoolConfig {
    /// Creates a pool configuration for `host:port` with default sizing.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        PoolConfig {
            connection: ConnectionConfig::new(host, port),
            ..PoolConfig::default()
        }
    }

    /// Applies the sizing rules: `min` is capped at [`POOL_MIN_CAP`], `max` is
    /// raised to at least `min` and never below one.
    pub fn normalized(mut self) -> Self {
        self.min = self.min.min(POOL_MIN_CAP);
        self.max = self.max.max(self.min).max(1);
        self
    }

    /// Connection template with the pool's idle timeout applied.
    pub(crate) fn connection_template(&self) -> ConnectionConfig {
        let mut template = self.connection.clone();
        template.idle_timeout = Some(self.idle_timeout);
        template
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub fn optional_duration<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
    }
}
