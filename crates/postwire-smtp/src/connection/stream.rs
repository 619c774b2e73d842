//! Transport streams for SMTP connections.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::config::TlsConfig;
use crate::error::{Error, Result};

/// A stream that is either plaintext or TLS over the same transport.
pub enum SmtpStream<S> {
    /// Plaintext stream.
    Plain(S),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<S>>),
}

impl<S> SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Upgrades a plaintext stream to TLS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the stream is already TLS, or the
    /// handshake error.
    pub async fn upgrade_to_tls(self, tls: &TlsConfig) -> Result<Self> {
        match self {
            Self::Plain(inner) => {
                let stream = tls
                    .connector
                    .connect(tls.server_name.clone(), inner)
                    .await?;
                Ok(Self::Tls(Box::new(stream)))
            }
            Self::Tls(_) => Err(Error::InvalidState("Stream is already TLS".to_string())),
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl<S> std::fmt::Debug for SmtpStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

impl<S> AsyncRead for SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl<S> AsyncWrite for SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Creates a TLS connector trusting the bundled web PKI roots.
#[must_use]
pub fn create_tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Opens a TCP connection, giving up after `timeout`.
///
/// # Errors
///
/// Returns [`Error::Timeout`] or the connect error.
pub async fn connect_plain(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    let tcp = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Timeout(timeout))??;
    tcp.set_nodelay(true)?;
    Ok(tcp)
}

/// Opens a TCP connection and performs the TLS handshake immediately.
///
/// # Errors
///
/// Returns [`Error::Timeout`], the connect error or the handshake error.
pub async fn connect_tls(
    host: &str,
    port: u16,
    tls: &TlsConfig,
    timeout: Duration,
) -> Result<SmtpStream<TcpStream>> {
    let tcp = connect_plain(host, port, timeout).await?;
    let stream = tokio::time::timeout(
        timeout,
        tls.connector.connect(tls.server_name.clone(), tcp),
    )
    .await
    .map_err(|_| Error::Timeout(timeout))??;
    Ok(SmtpStream::Tls(Box::new(stream)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_plain_stream_passes_bytes_through() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = SmtpStream::Plain(client);
        assert!(!stream.is_tls());

        stream.write_all(b"NOOP\r\n").await.unwrap();
        let mut buf = [0u8; 6];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"NOOP\r\n");

        server.write_all(b"250 OK\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"250 OK\r\n");
    }

    #[tokio::test]
    async fn test_handshake_against_garbage_fails() {
        let (client, mut server) = tokio::io::duplex(4096);
        let tls = TlsConfig::new("mail.example.com").unwrap();

        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = server.read(&mut buf).await;
            let _ = server.write_all(b"this is not a TLS record\r\n").await;
        });

        let result = SmtpStream::Plain(client).upgrade_to_tls(&tls).await;
        assert!(result.is_err());
        peer.await.unwrap();
    }
}
