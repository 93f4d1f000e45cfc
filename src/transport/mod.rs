//! Opening connections to the target.
//!
//! [`Connector`] produces a raw byte stream for a [`Target`]; [`open`] runs
//! the WebSocket opening handshake over it under the configured timeouts.
//! The driver is generic over the connector so tests can substitute
//! in-memory streams for TCP.

#[cfg(feature = "tls-rustls")]
pub mod tls;

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{Limits, Target, TestConfig};
use crate::connection::Socket;
use crate::error::{Error, Result};
use crate::protocol::handshake::{ClientRequest, HandshakeResponse, find_header_end, generate_key};

/// Produces byte streams to a target.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Stream type handed to the handshake.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Establish a transport-level connection to `target`.
    async fn connect(&self, target: &Target) -> Result<Self::Stream>;
}

#[cfg(feature = "tls-rustls")]
pub use tls::MaybeTlsStream;

/// Stream produced by [`TcpConnector`].
#[cfg(not(feature = "tls-rustls"))]
pub type MaybeTlsStream = TcpStream;

/// Connects over TCP, adding TLS for `wss://` when built with `tls-rustls`.
#[derive(Clone)]
pub struct TcpConnector {
    #[cfg(feature = "tls-rustls")]
    tls: std::sync::Arc<tokio_rustls::rustls::ClientConfig>,
}

impl TcpConnector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "tls-rustls")]
            tls: tls::client_config_with_webpki_roots(),
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = MaybeTlsStream;

    async fn connect(&self, target: &Target) -> Result<Self::Stream> {
        let stream = TcpStream::connect((target.host(), target.port())).await?;
        stream.set_nodelay(true)?;

        #[cfg(feature = "tls-rustls")]
        {
            if target.is_secure() {
                let tls = tls::connect(self.tls.clone(), target.host(), stream).await?;
                return Ok(MaybeTlsStream::Tls(Box::new(tls)));
            }
            Ok(MaybeTlsStream::Plain(stream))
        }

        #[cfg(not(feature = "tls-rustls"))]
        {
            if target.is_secure() {
                return Err(Error::Tls(
                    "wss:// targets require the tls-rustls feature".into(),
                ));
            }
            Ok(stream)
        }
    }
}

/// Connect and upgrade, bounding each step by its configured timeout.
///
/// # Errors
///
/// - `Error::Timeout` with stage `"connect"` or `"handshake"`
/// - `Error::UnexpectedStatus` if the server refused the upgrade
/// - `Error::InvalidHandshake` for a malformed or mismatching response
/// - any error from the connector
pub async fn open<C>(connector: &C, config: &TestConfig) -> Result<Socket<C::Stream>>
where
    C: Connector + ?Sized,
{
    let stream = with_timeout(
        "connect",
        config.connect_timeout,
        connector.connect(&config.target),
    )
    .await?;
    with_timeout(
        "handshake",
        config.handshake_timeout,
        handshake(stream, &config.target, &config.limits),
    )
    .await
}

async fn with_timeout<T>(
    stage: &'static str,
    after: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, fut)
        .await
        .unwrap_or(Err(Error::Timeout { stage, after }))
}

/// Run the client side of the opening handshake over `stream`.
///
/// Bytes the server sent after its response head are kept for the socket.
///
/// # Errors
///
/// - `Error::HandshakeTooLarge` if the response head exceeds the limit
/// - `Error::InvalidHandshake` if the stream ends before the head completes
/// - errors from [`HandshakeResponse::parse`] and
///   [`HandshakeResponse::verify`]
pub async fn handshake<S>(mut stream: S, target: &Target, limits: &Limits) -> Result<Socket<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key()?;
    let mut request = Vec::with_capacity(256);
    ClientRequest::new(target, key.as_str()).write(&mut request)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);
    let head_len = loop {
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
        limits.check_handshake_size(buf.len())?;
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::InvalidHandshake(
                "connection closed before the response completed".into(),
            ));
        }
    };

    let head = buf.split_to(head_len);
    HandshakeResponse::parse(&head)?.verify(&key)?;
    Ok(Socket::with_buffered(stream, buf, limits))
}
