//! TCP/TLS stream and its read/write halves.

// ============================================================================
// Imports
// ============================================================================

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::{debug, info, trace};
use url::{Host, Url};

use crate::error::{Error, Result};
use crate::protocol::handshake::is_secure;

use super::tls::TlsOptions;

// ============================================================================
// Constants
// ============================================================================

/// Read buffer size for the buffered reader.
const READ_BUFFER_SIZE: usize = 8 * 1024;

// ============================================================================
// MaybeTlsStream
// ============================================================================

/// A plain TCP stream or a TLS session over one.
#[derive(Debug)]
pub enum MaybeTlsStream {
    /// Unencrypted `ws://` stream.
    Plain(TcpStream),
    /// Encrypted `wss://` stream.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// An open connection to the server, before it is split.
#[derive(Debug)]
pub struct Transport {
    stream: MaybeTlsStream,
    peer: SocketAddr,
}

impl Transport {
    /// Connects to the host and port named by `url`.
    ///
    /// `wss://` URLs are wrapped in TLS according to `tls`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] on DNS failure, refused connection, TLS
    /// configuration or negotiation failure.
    pub async fn open(url: &Url, tls: &TlsOptions) -> Result<Self> {
        let host = url
            .host()
            .ok_or_else(|| Error::connect(format!("URL '{url}' has no host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::connect(format!("URL '{url}' has no port")))?;

        let host = match host {
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| Error::connect(format!("{host}:{port}: {e}")))?;
        let peer = tcp
            .peer_addr()
            .map_err(|e| Error::connect(format!("{host}:{port}: {e}")))?;
        tcp.set_nodelay(true)
            .map_err(|e| Error::connect(format!("{host}:{port}: {e}")))?;

        debug!(%peer, "TCP connection established");

        if !is_secure(url) {
            return Ok(Self {
                stream: MaybeTlsStream::Plain(tcp),
                peer,
            });
        }

        let connector = TlsConnector::from(tls.client_config()?);
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| Error::connect(format!("invalid server name '{host}': {e}")))?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::connect(format!("TLS handshake with {host} failed: {e}")))?;

        info!(%peer, verify = tls.verify, "TLS session established");

        Ok(Self {
            stream: MaybeTlsStream::Tls(Box::new(stream)),
            peer,
        })
    }

    /// Returns the remote address.
    #[inline]
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Splits into independently usable read and write halves.
    #[must_use]
    pub fn split(self) -> (TransportReader, TransportWriter) {
        let (read, write) = tokio::io::split(self.stream);
        (
            TransportReader {
                inner: BufReader::with_capacity(READ_BUFFER_SIZE, read),
            },
            TransportWriter {
                inner: write,
                closed: false,
            },
        )
    }
}

// ============================================================================
// TransportReader
// ============================================================================

/// Buffered read half.
///
/// Bytes buffered while reading the handshake byte by byte are returned by
/// the next [`read_chunk`](Self::read_chunk), so nothing is lost between
/// handshake and framing.
#[derive(Debug)]
pub struct TransportReader {
    inner: BufReader<ReadHalf<MaybeTlsStream>>,
}

impl TransportReader {
    /// Reads a single byte; `None` on EOF.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on read failure.
    pub async fn read_byte(&mut self) -> Result<Option<u8>> {
        match self.inner.read_u8().await {
            Ok(byte) => Ok(Some(byte)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads up to `buf.len()` bytes; `0` on EOF.
    ///
    /// Waits for readability without spinning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on read failure.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buf).await?;
        trace!(bytes = n, "Chunk read");
        Ok(n)
    }
}

// ============================================================================
// TransportWriter
// ============================================================================

/// Write half.
#[derive(Debug)]
pub struct TransportWriter {
    inner: WriteHalf<MaybeTlsStream>,
    closed: bool,
}

impl TransportWriter {
    /// Writes all bytes and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] after [`close`](Self::close), or
    /// [`Error::Io`] on write failure.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shuts down the write direction. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.inner.shutdown().await {
            debug!(error = %e, "Shutdown of write half failed");
        }
    }

    /// Returns `true` after [`close`](Self::close).
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

// ============================================================================
// Tests
// ============================================================================
