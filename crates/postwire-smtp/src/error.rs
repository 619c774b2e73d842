//! Error types for SMTP session operations.

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
///
/// Errors are cheap to clone: a single transport failure is reported to the
/// close notification and to every result still waiting on the connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(String),

    /// Protocol error (malformed reply, encoder state violation).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Invalid argument supplied to a session operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),

    /// No response arrived in time.
    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    /// The connection ended before the expected responses arrived.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The continuation task was cancelled or panicked.
    #[error("Executor error: {0}")]
    Executor(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<rustls::pki_types::InvalidDnsNameError> for Error {
    fn from(err: rustls::pki_types::InvalidDnsNameError) -> Self {
        Self::InvalidDnsName(err.to_string())
    }
}

impl Error {
    /// Returns true if this error reports a capability or state precondition
    /// that was checked before anything was written.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::NotSupported(_) | Self::InvalidState(_))
    }

    /// Returns true if this error reports a rejected argument.
    #[must_use]
    pub const fn is_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::InvalidAddress(_))
    }

    /// Returns true if the transport is gone.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed(_))
    }
}
