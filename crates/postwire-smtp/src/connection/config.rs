//! Session configuration types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::runtime::Handle;
use tokio_rustls::TlsConnector;

use super::stream::create_tls_connector;
use crate::error::Result;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plaintext; STARTTLS may be issued later (ports 25 and 587).
    #[default]
    None,
    /// TLS from the first byte (port 465).
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 587,
            Self::Implicit => 465,
        }
    }
}

/// TLS parameters used by STARTTLS and implicit-TLS connects.
#[derive(Clone)]
pub struct TlsConfig {
    /// Connector performing the client handshake.
    pub connector: TlsConnector,
    /// Name the server certificate must match.
    pub server_name: ServerName<'static>,
}

impl TlsConfig {
    /// Creates a TLS configuration trusting the bundled web PKI roots.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid DNS name or IP address.
    pub fn new(host: &str) -> Result<Self> {
        Self::with_connector(create_tls_connector(), host)
    }

    /// Creates a TLS configuration from a custom connector.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid DNS name or IP address.
    pub fn with_connector(connector: TlsConnector, host: &str) -> Result<Self> {
        let server_name = ServerName::try_from(host.to_string())?;
        Ok(Self {
            connector,
            server_name,
        })
    }

    /// Creates a TLS configuration from a rustls client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid DNS name or IP address.
    pub fn from_client_config(config: Arc<rustls::ClientConfig>, host: &str) -> Result<Self> {
        Self::with_connector(TlsConnector::from(config), host)
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// SMTP session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Runtime that completes every operation result. Defaults to the
    /// runtime current when the session is created.
    pub executor: Option<Handle>,
    /// TLS parameters for STARTTLS and implicit TLS.
    pub tls: Option<TlsConfig>,
    /// Security mode used by [`connect`](crate::connect).
    pub security: Security,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long an operation may wait for its replies. `None` waits forever.
    pub response_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            executor: None,
            tls: None,
            security: Security::None,
            connect_timeout: Duration::from_secs(30),
            response_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Creates a plaintext configuration without TLS parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

/// Builder for session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the runtime that completes operation results.
    #[must_use]
    pub fn executor(mut self, handle: Handle) -> Self {
        self.config.executor = Some(handle);
        self
    }

    /// Sets the TLS parameters.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.config.security = security;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the response timeout.
    #[must_use]
    pub const fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}
