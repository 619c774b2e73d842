//! Connection plumbing: configuration, transport streams, the I/O task and
//! close notification.

mod channel;
mod config;
mod lifecycle;
mod stream;

pub use channel::{Channel, HandlerChain, Outbound, Stage};
pub use config::{Security, SessionConfig, SessionConfigBuilder, TlsConfig};
pub use lifecycle::{CloseFuture, LifecycleObserver};
pub use stream::{SmtpStream, connect_plain, connect_tls, create_tls_connector};

use crate::error::Result;
use crate::session::{ClientResponse, SmtpSession};

/// Connects to an SMTP server and waits for its greeting.
///
/// With [`Security::Implicit`] the TLS handshake happens before the
/// greeting. Without a TLS configuration, one is derived from `host` so that
/// STARTTLS can be issued later.
///
/// # Errors
///
/// Returns an error if the connection, the handshake or the greeting fails.
pub async fn connect(host: &str, port: u16, mut config: SessionConfig) -> Result<ClientResponse> {
    if config.tls.is_none() {
        config.tls = Some(TlsConfig::new(host)?);
    }

    match config.security {
        Security::None => {
            let tcp = connect_plain(host, port, config.connect_timeout).await?;
            tracing::debug!(host, port, "connected");
            SmtpSession::establish(SmtpStream::Plain(tcp), config).await
        }
        Security::Implicit => {
            let tls = config.tls.clone().ok_or_else(|| {
                crate::Error::InvalidState("implicit TLS requires a TLS configuration".into())
            })?;
            let stream = connect_tls(host, port, &tls, config.connect_timeout).await?;
            tracing::debug!(host, port, "connected with TLS");
            SmtpSession::establish(stream, config).await
        }
    }
}
