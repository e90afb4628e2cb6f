//! # Transport
//!
//! Purpose: Open the byte stream a connection runs on, either plain TCP or
//! TLS over TCP, behind one boxed stream type.

use std::fmt;
#[cfg(feature = "tls")]
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::{ClientError, ClientResult};

/// Bidirectional byte stream owned by a connection driver.
pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub(crate) type BoxStream = Box<dyn AsyncStream>;

/// TLS material for a connection.
///
/// The rustls client configuration (roots, client certificate and key) is
/// built by the caller; this crate only performs the handshake.
#[derive(Clone)]
pub struct TlsConfig {
    /// Prepared rustls client configuration.
    #[cfg(feature = "tls")]
    pub client_config: Arc<tokio_rustls::rustls::ClientConfig>,
    /// Name presented for SNI and certificate checks; the host when absent.
    pub server_name: Option<String>,
}

impl TlsConfig {
    #[cfg(feature = "tls")]
    pub fn new(client_config: Arc<tokio_rustls::rustls::ClientConfig>) -> Self {
        TlsConfig {
            client_config,
            server_name: None,
        }
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Dials the configured address and wraps the socket in TLS when requested.
pub(crate) async fn open(config: &ConnectionConfig) -> ClientResult<BoxStream> {
    let (host, port) = config.address();
    debug!(host, port, tls = config.tls.is_some(), "dialing");
    let stream = TcpStream::connect((host, port)).await?;
    // Disable Nagle to keep request latency low for small payloads.
    stream.set_nodelay(true)?;

    match &config.tls {
        None => Ok(Box::new(stream)),
        Some(tls) => wrap_tls(stream, host, tls).await,
    }
}

#[cfg(feature = "tls")]
async fn wrap_tls(stream: TcpStream, host: &str, tls: &TlsConfig) -> ClientResult<BoxStream> {
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::TlsConnector;

    let name = tls.server_name.clone().unwrap_or_else(|| host.to_string());
    let server_name = ServerName::try_from(name).map_err(|err| ClientError::Tls(err.to_string()))?;
    let connector = TlsConnector::from(tls.client_config.clone());
    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|err| ClientError::Tls(err.to_string()))?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "tls"))]
async fn wrap_tls(_stream: TcpStream, _host: &str, _tls: &TlsConfig) -> ClientResult<BoxStream> {
    Err(ClientError::Tls(
        "TLS requested but the `tls` feature is not enabled".to_string(),
    ))
}
