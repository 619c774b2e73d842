//! Matches server replies to the requests that produced them.
//!
//! SMTP replies carry no tag, so the only way to pair them with requests is
//! order. Each submission registers an expectation for N replies *before*
//! its bytes are written; the I/O task hands every decoded reply to the
//! oldest expectation, and releases it once it holds N replies.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::types::Reply;

/// Receives the replies of one expectation.
pub type ResponseReceiver = oneshot::Receiver<Result<Vec<Reply>>>;

/// Runs on the I/O task with the raw replies before they are released.
pub type Interceptor = Box<dyn FnOnce(&[Reply]) + Send>;

type Describe = Box<dyn Fn() -> String + Send>;

struct Expectation {
    expected: usize,
    received: Vec<Reply>,
    describe: Describe,
    intercept: Option<Interceptor>,
    tx: oneshot::Sender<Result<Vec<Reply>>>,
}

impl Expectation {
    fn complete(self) {
        if let Some(intercept) = self.intercept {
            intercept(&self.received);
        }
        if self.tx.send(Ok(self.received)).is_err() {
            tracing::debug!("reply receiver dropped before completion");
        }
    }

    fn fail(self, err: Error) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                request = %(self.describe)(),
                received = self.received.len(),
                expected = self.expected,
                "abandoning expectation: {err}"
            );
        }
        let _ = self.tx.send(Err(err));
    }
}

#[derive(Default)]
struct State {
    pending: VecDeque<Expectation>,
    closed: Option<Error>,
}

/// FIFO queue of expectations for one connection.
#[derive(Default)]
pub struct ResponseCorrelator {
    state: Mutex<State>,
}

impl ResponseCorrelator {
    /// Creates an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an expectation for `expected` replies.
    ///
    /// `describe` is only evaluated when a diagnostic needs it.
    pub fn expect<F>(&self, expected: usize, describe: F) -> ResponseReceiver
    where
        F: Fn() -> String + Send + 'static,
    {
        self.register(expected, Box::new(describe), None)
    }

    /// Registers an expectation whose replies are first shown to `intercept`
    /// on the I/O task.
    pub fn expect_intercepted<F>(
        &self,
        expected: usize,
        describe: F,
        intercept: Interceptor,
    ) -> ResponseReceiver
    where
        F: Fn() -> String + Send + 'static,
    {
        self.register(expected, Box::new(describe), Some(intercept))
    }

    fn register(
        &self,
        expected: usize,
        describe: Describe,
        intercept: Option<Interceptor>,
    ) -> ResponseReceiver {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();

        if let Some(cause) = &state.closed {
            let _ = tx.send(Err(cause.clone()));
            return rx;
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(request = %describe(), expected, "expecting replies");
        }

        let expectation = Expectation {
            expected,
            received: Vec::with_capacity(expected),
            describe,
            intercept,
            tx,
        };

        if expected == 0 {
            drop(state);
            expectation.complete();
        } else {
            state.pending.push_back(expectation);
        }
        rx
    }

    /// Hands a decoded reply to the oldest expectation.
    pub fn dispatch(&self, reply: Reply) {
        let mut state = self.lock();

        let Some(front) = state.pending.front_mut() else {
            drop(state);
            tracing::warn!(code = %reply.code, text = %reply.message_text(), "unexpected reply");
            return;
        };

        front.received.push(reply);
        if front.received.len() < front.expected {
            return;
        }

        let done = state.pending.pop_front();
        drop(state);
        if let Some(expectation) = done {
            expectation.complete();
        }
    }

    /// Fails every pending expectation and refuses new ones.
    pub fn close(&self, cause: &Error) {
        let pending = {
            let mut state = self.lock();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(Error::ConnectionClosed(cause.to_string()));
            std::mem::take(&mut state.pending)
        };

        for expectation in pending {
            expectation.fail(Error::ConnectionClosed(cause.to_string()));
        }
    }

    /// Returns the number of expectations still waiting for replies.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ResponseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ResponseCorrelator")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::types::ReplyCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn reply(code: u16, text: &str) -> Reply {
        Reply::new(ReplyCode::new(code), vec![text.to_string()])
    }

    #[tokio::test]
    async fn test_single_expectation() {
        let correlator = ResponseCorrelator::new();
        let rx = correlator.expect(1, || "NOOP".into());
        correlator.dispatch(reply(250, "ok"));

        let replies = rx.await.unwrap().unwrap();
        assert_eq!(replies, vec![reply(250, "ok")]);
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn test_fifo_order_and_grouping() {
        let correlator = ResponseCorrelator::new();
        let first = correlator.expect(2, || "MAIL, RCPT".into());
        let second = correlator.expect(1, || "DATA".into());

        correlator.dispatch(reply(250, "sender ok"));
        assert_eq!(correlator.pending(), 2);
        correlator.dispatch(reply(250, "recipient ok"));
        correlator.dispatch(reply(354, "go ahead"));

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, vec![reply(250, "sender ok"), reply(250, "recipient ok")]);
        assert_eq!(second, vec![reply(354, "go ahead")]);
    }

    #[tokio::test]
    async fn test_interceptor_runs_before_release() {
        let correlator = ResponseCorrelator::new();
        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        let rx = correlator.expect_intercepted(
            1,
            || "EHLO".into(),
            Box::new(move |replies: &[Reply]| {
                assert_eq!(replies.len(), 1);
                flag.store(true, Ordering::SeqCst);
            }),
        );

        correlator.dispatch(reply(250, "hello"));
        assert!(seen.load(Ordering::SeqCst));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_dropped() {
        let correlator = ResponseCorrelator::new();
        correlator.dispatch(reply(421, "bye"));

        let rx = correlator.expect(1, || "NOOP".into());
        correlator.dispatch(reply(250, "ok"));
        assert_eq!(rx.await.unwrap().unwrap(), vec![reply(250, "ok")]);
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_future_expectations() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.expect(2, || "MAIL, RCPT".into());
        correlator.dispatch(reply(250, "ok"));

        correlator.close(&Error::Protocol("boom".into()));

        assert!(matches!(
            pending.await.unwrap(),
            Err(Error::ConnectionClosed(msg)) if msg.contains("boom")
        ));
        let late = correlator.expect(1, || "NOOP".into());
        assert!(matches!(late.await.unwrap(), Err(Error::ConnectionClosed(_))));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn test_zero_replies_completes_immediately() {
        let correlator = ResponseCorrelator::new();
        let rx = correlator.expect(0, String::new);
        assert_eq!(rx.await.unwrap().unwrap(), Vec::<Reply>::new());
    }

    #[test]
    fn test_describe_is_lazy() {
        let correlator = ResponseCorrelator::new();
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let _rx = correlator.expect(1, move || {
            flag.store(true, Ordering::SeqCst);
            String::new()
        });
        // No subscriber is installed, so DEBUG is disabled.
        assert!(!called.load(Ordering::SeqCst));
    }
}
