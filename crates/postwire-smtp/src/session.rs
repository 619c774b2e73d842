//! The SMTP client session.
//!
//! A [`SmtpSession`] is a cheap, clonable handle to one connection. Command
//! operations validate their preconditions synchronously, register the
//! replies they expect, enqueue their bytes and return a [`SessionFuture`].
//! Results are always completed on the configured executor, never on the
//! connection's I/O task.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::command::{Frame, Request, Verb, describe_requests};
use crate::connection::{
    Channel, CloseFuture, LifecycleObserver, SessionConfig, SmtpStream, TlsConfig,
};
use crate::content::MessageContent;
use crate::correlator::{Interceptor, ResponseCorrelator, ResponseReceiver};
use crate::error::{Error, Result};
use crate::pipeline::check_pipelined;
use crate::types::{AuthMechanism, Capabilities, Extension, Reply, SharedCapabilities};

/// A server reply together with the session it arrived on.
#[derive(Debug, Clone)]
pub struct ClientResponse {
    /// The reply.
    pub reply: Reply,
    /// The session, for chaining the next command.
    pub session: SmtpSession,
}

impl ClientResponse {
    /// Returns true if the server refused the request (4xx or 5xx).
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.reply.is_error()
    }
}

/// Result of a session operation, completed on the session's executor.
///
/// Dropping it does not cancel the operation.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct SessionFuture<T> {
    handle: JoinHandle<Result<T>>,
}

impl<T> Future for SessionFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) => Poll::Ready(Err(Error::Executor(err.to_string()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Encryption state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlsState {
    /// Plaintext; STARTTLS may be issued.
    Plain = 0,
    /// STARTTLS sent, reply pending.
    Requested = 1,
    /// Server accepted STARTTLS, handshake running.
    Handshaking = 2,
    /// Handshake completed.
    Encrypted = 3,
    /// Handshake failed; the connection is closed.
    Failed = 4,
}

impl TlsState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Plain,
            1 => Self::Requested,
            2 => Self::Handshaking,
            3 => Self::Encrypted,
            _ => Self::Failed,
        }
    }
}

struct Inner {
    channel: Channel,
    correlator: Arc<ResponseCorrelator>,
    capabilities: Arc<SharedCapabilities>,
    tls_state: AtomicU8,
    tls: Option<TlsConfig>,
    executor: Handle,
    response_timeout: Option<Duration>,
    close: CloseFuture,
    submit: Mutex<()>,
}

/// Client side of one SMTP connection.
#[derive(Clone)]
pub struct SmtpSession {
    inner: Arc<Inner>,
}

impl SmtpSession {
    /// Starts a session over an established plaintext stream and waits for
    /// the server greeting.
    ///
    /// The returned response carries the greeting and the new session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no tokio runtime is available, or
    /// the failure that prevented the greeting from arriving.
    pub async fn from_stream<S>(stream: S, config: SessionConfig) -> Result<ClientResponse>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::establish(SmtpStream::Plain(stream), config).await
    }

    /// Starts a session over a plaintext or TLS stream and waits for the
    /// server greeting.
    ///
    /// # Errors
    ///
    /// Same as [`SmtpSession::from_stream`].
    pub async fn establish<S>(stream: SmtpStream<S>, config: SessionConfig) -> Result<ClientResponse>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = Handle::try_current()
            .ok()
            .or_else(|| config.executor.clone())
            .ok_or_else(|| Error::InvalidState("no tokio runtime available".into()))?;
        let executor = config.executor.unwrap_or_else(|| io.clone());

        let tls_state = if stream.is_tls() {
            TlsState::Encrypted
        } else {
            TlsState::Plain
        };

        let correlator = Arc::new(ResponseCorrelator::new());
        // The greeting is unsolicited, so its expectation must exist before
        // the I/O task starts reading.
        let greeting = correlator.expect(1, || "server greeting".to_string());

        let (observer, close) = LifecycleObserver::new();
        let channel = Channel::spawn(&io, stream, Arc::clone(&correlator), observer);

        let session = Self {
            inner: Arc::new(Inner {
                channel,
                correlator,
                capabilities: Arc::new(SharedCapabilities::default()),
                tls_state: AtomicU8::new(tls_state as u8),
                tls: config.tls,
                executor,
                response_timeout: config.response_timeout,
                close,
                submit: Mutex::new(()),
            }),
        };

        let reply = session.await_first(greeting).await?;
        tracing::debug!(code = %reply.code, encrypted = session.is_encrypted(), "session established");
        Ok(ClientResponse { reply, session })
    }

    /// Sends one command and returns its reply.
    ///
    /// An EHLO reply replaces the session's capabilities, whatever its code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the command would not fit on one
    /// line. Nothing is written in that case.
    pub fn send(&self, request: Request) -> Result<SessionFuture<ClientResponse>> {
        request.check_line_safe()?;

        let intercept = (*request.verb() == Verb::Ehlo).then(|| self.ehlo_interceptor());
        let described = request.clone();
        let rx = self.submit(1, move || described.describe(), intercept, |channel| {
            channel.write_and_flush(Frame::Request(request));
        });

        Ok(self.respond_with_first(rx))
    }

    /// Sends message content after a DATA command has been accepted.
    ///
    /// The 8BITMIME rendition is used when the server advertised 8BITMIME,
    /// the 7-bit rendition otherwise.
    ///
    /// # Errors
    ///
    /// This operation has no synchronous failure; the `Result` keeps the
    /// shape of the other operations.
    pub fn send_content(&self, content: &MessageContent) -> Result<SessionFuture<ClientResponse>> {
        let body = self.encode_content(content);
        let rx = self.submit(1, || "message contents".to_string(), None, |channel| {
            channel.write(Frame::Content(body));
            channel.write(Frame::EndOfContent);
            channel.flush();
        });

        Ok(self.respond_with_first(rx))
    }

    /// Sends a group of commands without waiting between them.
    ///
    /// The replies are returned in request order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the server did not advertise
    /// PIPELINING, and [`Error::InvalidArgument`] if the group is empty or a
    /// command is not allowed where it appears.
    pub fn send_pipelined(&self, requests: Vec<Request>) -> Result<SessionFuture<Vec<ClientResponse>>> {
        self.pipelined(None, requests)
    }

    /// Sends message content followed by a group of commands without waiting
    /// between them.
    ///
    /// Only the replies to `requests` are returned; the content's reply is
    /// consumed.
    ///
    /// # Errors
    ///
    /// Same as [`SmtpSession::send_pipelined`].
    pub fn send_pipelined_with_content(
        &self,
        content: &MessageContent,
        requests: Vec<Request>,
    ) -> Result<SessionFuture<Vec<ClientResponse>>> {
        self.pipelined(Some(content), requests)
    }

    fn pipelined(
        &self,
        content: Option<&MessageContent>,
        requests: Vec<Request>,
    ) -> Result<SessionFuture<Vec<ClientResponse>>> {
        if !self.is_supported(Extension::Pipelining) {
            return Err(Error::NotSupported(Extension::Pipelining.keyword().to_string()));
        }
        check_pipelined(&requests)?;
        for request in &requests {
            request.check_line_safe()?;
        }

        let body = content.map(|content| self.encode_content(content));
        let has_content = body.is_some();
        let expected = requests.len() + usize::from(has_content);

        let intercept = requests
            .last()
            .is_some_and(|last| *last.verb() == Verb::Ehlo)
            .then(|| self.ehlo_interceptor());

        let described = requests.clone();
        let describe = move || {
            let group = describe_requests(&described);
            if has_content {
                format!("message contents, {group}")
            } else {
                group
            }
        };

        let rx = self.submit(expected, describe, intercept, |channel| {
            if let Some(body) = body {
                channel.write(Frame::Content(body));
                channel.write(Frame::EndOfContent);
            }
            for request in requests {
                channel.write(Frame::Request(request));
            }
            channel.flush();
        });

        let session = self.clone();
        Ok(self.complete(async move {
            let replies = session.await_replies(rx).await?;
            Ok(replies
                .into_iter()
                .skip(usize::from(has_content))
                .map(|reply| ClientResponse {
                    reply,
                    session: session.clone(),
                })
                .collect())
        }))
    }

    /// Authenticates with AUTH PLAIN, sending the credentials as the initial
    /// response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] unless an EHLO reply advertised PLAIN.
    pub fn auth_plain(&self, username: &str, password: &str) -> Result<SessionFuture<ClientResponse>> {
        if !self.is_auth_plain_supported() {
            return Err(Error::NotSupported("AUTH PLAIN".into()));
        }

        let payload = BASE64.encode(format!("{username}\0{username}\0{password}"));
        self.send(Request::auth(AuthMechanism::Plain, Some(payload)))
    }

    /// Authenticates with AUTH LOGIN: the username goes with the command and
    /// the password on its own line once the server asks for it.
    ///
    /// If the server refuses the username, that reply is returned and the
    /// password is never sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] unless an EHLO reply advertised LOGIN.
    pub fn auth_login(&self, username: &str, password: &str) -> Result<SessionFuture<ClientResponse>> {
        if !self.is_auth_login_supported() {
            return Err(Error::NotSupported("AUTH LOGIN".into()));
        }

        let user = BASE64.encode(username);
        let mut line = BASE64.encode(password).into_bytes();
        line.extend_from_slice(b"\r\n");
        let password_line = Bytes::from(line);

        let first = self.send(Request::auth(AuthMechanism::Login, Some(user)))?;

        let session = self.clone();
        Ok(self.complete(async move {
            let response = first.await?;
            if response.is_error() {
                return Ok(response);
            }

            let rx = session.submit(1, || "auth login password".to_string(), None, |channel| {
                channel.write_and_flush(Frame::Raw(password_line));
            });
            let reply = session.await_first(rx).await?;
            Ok(ClientResponse { reply, session })
        }))
    }

    /// Upgrades the connection with STARTTLS.
    ///
    /// A refusal from the server is returned as a normal response and leaves
    /// the connection usable in plaintext. A failed handshake fails the
    /// result and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the connection is already
    /// encrypted, a negotiation is already running, or the session has no
    /// TLS configuration.
    pub fn start_tls(&self) -> Result<SessionFuture<ClientResponse>> {
        let Some(tls) = self.inner.tls.clone() else {
            return Err(Error::InvalidState("no TLS configuration for STARTTLS".into()));
        };

        self.transition_tls(TlsState::Plain, TlsState::Requested)
            .map_err(|current| match current {
                TlsState::Encrypted => Error::InvalidState("connection is already encrypted".into()),
                TlsState::Failed => Error::InvalidState("TLS negotiation already failed".into()),
                _ => Error::InvalidState("STARTTLS already in progress".into()),
            })?;

        let rx = self.submit(1, || "STARTTLS".to_string(), None, |channel| {
            channel.write_and_flush(Frame::Request(Request::starttls()));
        });

        let session = self.clone();
        Ok(self.complete(async move {
            let reply = match session.await_first(rx).await {
                Ok(reply) => reply,
                Err(err) => {
                    session.store_tls(TlsState::Failed);
                    return Err(err);
                }
            };

            if reply.is_error() {
                tracing::info!(code = %reply.code, "server refused STARTTLS");
                session.store_tls(TlsState::Plain);
                return Ok(ClientResponse { reply, session });
            }

            session.store_tls(TlsState::Handshaking);
            let outcome = session
                .inner
                .channel
                .start_tls(tls)
                .await
                .unwrap_or_else(|_| Err(Error::ConnectionClosed("connection closed during TLS handshake".into())));

            match outcome {
                Ok(()) => {
                    session.store_tls(TlsState::Encrypted);
                    tracing::info!("connection upgraded to TLS");
                    Ok(ClientResponse { reply, session })
                }
                Err(err) => {
                    session.store_tls(TlsState::Failed);
                    session.inner.channel.close();
                    Err(err)
                }
            }
        }))
    }

    /// Returns true if the last EHLO reply advertised `extension`.
    #[must_use]
    pub fn is_supported(&self, extension: Extension) -> bool {
        self.supported_extensions().contains(extension)
    }

    /// Returns the capabilities from the last EHLO reply.
    #[must_use]
    pub fn supported_extensions(&self) -> Capabilities {
        self.inner.capabilities.load()
    }

    /// Returns true once a TLS handshake has completed.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.tls_state() == TlsState::Encrypted
    }

    /// Returns the current encryption state.
    #[must_use]
    pub fn tls_state(&self) -> TlsState {
        TlsState::from_u8(self.inner.tls_state.load(Ordering::Acquire))
    }

    /// Returns true if the last EHLO reply advertised AUTH PLAIN.
    #[must_use]
    pub fn is_auth_plain_supported(&self) -> bool {
        self.supported_extensions().auth_plain()
    }

    /// Returns true if the last EHLO reply advertised AUTH LOGIN.
    #[must_use]
    pub fn is_auth_login_supported(&self) -> bool {
        self.supported_extensions().auth_login()
    }

    /// Closes the connection and returns its close notification.
    ///
    /// Calling it again returns the same notification.
    pub fn close(&self) -> CloseFuture {
        self.inner.channel.close();
        self.close_future()
    }

    /// Returns the notification resolved when the connection closes.
    #[must_use]
    pub fn close_future(&self) -> CloseFuture {
        self.inner.close.clone()
    }

    fn ehlo_interceptor(&self) -> Interceptor {
        let capabilities = Arc::clone(&self.inner.capabilities);
        Box::new(move |replies: &[Reply]| {
            if let Some(reply) = replies.last() {
                let caps = Capabilities::from_ehlo(reply.details());
                tracing::debug!(?caps, "capabilities replaced");
                capabilities.replace(caps);
            }
        })
    }

    fn encode_content(&self, content: &MessageContent) -> Bytes {
        content.encoded_for(self.is_supported(Extension::EightBitMime))
    }

    /// Registers the expectation and enqueues the frames as one step, so no
    /// other submission can slip in between.
    fn submit<D, W>(
        &self,
        expected: usize,
        describe: D,
        intercept: Option<Interceptor>,
        write: W,
    ) -> ResponseReceiver
    where
        D: Fn() -> String + Send + 'static,
        W: FnOnce(&Channel),
    {
        let _guard = self
            .inner
            .submit
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let rx = match intercept {
            Some(intercept) => self
                .inner
                .correlator
                .expect_intercepted(expected, describe, intercept),
            None => self.inner.correlator.expect(expected, describe),
        };
        write(&self.inner.channel);
        rx
    }

    fn respond_with_first(&self, rx: ResponseReceiver) -> SessionFuture<ClientResponse> {
        let session = self.clone();
        self.complete(async move {
            let reply = session.await_first(rx).await?;
            Ok(ClientResponse { reply, session })
        })
    }

    fn complete<T, F>(&self, future: F) -> SessionFuture<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        SessionFuture {
            handle: self.inner.executor.spawn(future),
        }
    }

    async fn await_replies(&self, rx: ResponseReceiver) -> Result<Vec<Reply>> {
        let received = match self.inner.response_timeout {
            Some(limit) => {
                if let Ok(received) = tokio::time::timeout(limit, rx).await {
                    received
                } else {
                    // A skipped reply would shift every later one.
                    tracing::warn!(?limit, "no reply in time, closing connection");
                    self.inner.channel.close();
                    return Err(Error::Timeout(limit));
                }
            }
            None => rx.await,
        };
        received.map_err(|_| Error::ConnectionClosed("reply was abandoned".into()))?
    }

    async fn await_first(&self, rx: ResponseReceiver) -> Result<Reply> {
        self.await_replies(rx)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Protocol("no reply received".into()))
    }

    fn transition_tls(&self, from: TlsState, to: TlsState) -> std::result::Result<(), TlsState> {
        self.inner
            .tls_state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TlsState::from_u8)
    }

    fn store_tls(&self, state: TlsState) {
        self.inner.tls_state.store(state as u8, Ordering::Release);
    }
}

impl fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSession")
            .field("capabilities", &self.supported_extensions())
            .field("tls_state", &self.tls_state())
            .field("pending", &self.inner.correlator.pending())
            .field("closed", &self.inner.close.is_closed())
            .finish_non_exhaustive()
    }
}
