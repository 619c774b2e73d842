//! Close notification for a connection.

use std::future::{Future, IntoFuture};
use std::pin::Pin;

use tokio::sync::watch;

use crate::error::{Error, Result};

type Outcome = Option<Result<()>>;

/// Resolves once the connection is gone.
///
/// Clones observe the same outcome, which is `Ok(())` for a graceful close
/// and the first transport failure otherwise.
#[derive(Debug, Clone)]
pub struct CloseFuture {
    rx: watch::Receiver<Outcome>,
}

impl CloseFuture {
    /// Returns true once the connection has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Returns the outcome if the connection has closed.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<()>> {
        self.rx.borrow().clone()
    }

    /// Waits for the connection to close.
    ///
    /// # Errors
    ///
    /// Returns the failure that caused an abnormal close.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.rx.clone();
        let outcome = rx.wait_for(Option::is_some).await.ok().and_then(|v| v.clone());
        outcome.unwrap_or_else(|| {
            Err(Error::ConnectionClosed(
                "connection task ended without reporting".into(),
            ))
        })
    }
}

impl IntoFuture for CloseFuture {
    type Output = Result<()>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

/// Watches the connection for failures and reports its end exactly once.
#[derive(Debug)]
pub struct LifecycleObserver {
    tx: watch::Sender<Outcome>,
    cause: Option<Error>,
}

impl LifecycleObserver {
    /// Creates an observer and the future it will fulfil.
    #[must_use]
    pub fn new() -> (Self, CloseFuture) {
        let (tx, rx) = watch::channel(None);
        (Self { tx, cause: None }, CloseFuture { rx })
    }

    /// Records a transport failure. Only the first cause is kept.
    pub fn exception_caught(&mut self, err: Error) {
        if self.cause.is_none() {
            tracing::warn!(error = %err, "SMTP connection failed");
            self.cause = Some(err);
        } else {
            tracing::debug!(error = %err, "further failure after connection failure");
        }
    }

    /// Returns the recorded failure, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Error> {
        self.cause.as_ref()
    }

    /// Fulfils the close future unless it already is.
    pub fn channel_inactive(&mut self) {
        let outcome = self.cause.clone().map_or(Ok(()), Err);
        let fulfilled = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
        if fulfilled {
            tracing::debug!("SMTP connection closed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn test_graceful_close() {
        let (mut observer, close) = LifecycleObserver::new();
        assert!(!close.is_closed());

        observer.channel_inactive();
        assert!(close.is_closed());
        assert!(close.wait().await.is_ok());
        assert!(close.clone().await.is_ok());
    }

    #[tokio::test]
    async fn test_abnormal_close_carries_first_cause() {
        let (mut observer, close) = LifecycleObserver::new();
        observer.exception_caught(io::Error::new(io::ErrorKind::ConnectionReset, "reset").into());
        observer.exception_caught(Error::Protocol("later".into()));
        observer.channel_inactive();

        let err = close.wait().await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
    }

    #[tokio::test]
    async fn test_fulfilled_only_once() {
        let (mut observer, close) = LifecycleObserver::new();
        observer.channel_inactive();
        observer.exception_caught(Error::Protocol("too late".into()));
        observer.channel_inactive();

        assert!(close.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiters_released_together() {
        let (mut observer, close) = LifecycleObserver::new();
        let first = tokio::spawn(close.clone().into_future());
        let second = tokio::spawn(close.clone().into_future());

        observer.exception_caught(Error::Protocol("bad reply".into()));
        observer.channel_inactive();

        assert!(matches!(first.await.unwrap(), Err(Error::Protocol(_))));
        assert!(matches!(second.await.unwrap(), Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_dropped_observer_reports_closed() {
        let (observer, close) = LifecycleObserver::new();
        drop(observer);
        assert!(matches!(close.wait().await, Err(Error::ConnectionClosed(_))));
    }
}
