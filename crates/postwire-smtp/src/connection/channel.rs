//! The I/O task that owns a connection.
//!
//! Every byte of a session goes through one spawned task. Callers never
//! touch the stream: they enqueue frames on an unbounded queue, which keeps
//! submission synchronous, and the task feeds decoded replies to the
//! [`ResponseCorrelator`].

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::config::TlsConfig;
use super::lifecycle::LifecycleObserver;
use super::stream::SmtpStream;
use crate::command::{Frame, RequestEncoder};
use crate::correlator::ResponseCorrelator;
use crate::error::{Error, Result};
use crate::parser::ReplyDecoder;

const READ_BUFFER_SIZE: usize = 8192;

/// A processing stage installed on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// TLS termination.
    Tls,
    /// Request encoder and reply decoder.
    Codec,
    /// Failure and close observer.
    Lifecycle,
}

/// Ordered stages of a connection, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerChain {
    stages: Vec<Stage>,
}

impl HandlerChain {
    /// Creates an empty chain.
    #[must_use]
    pub const fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Installs `stage` in front of every other stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the stage is already installed.
    pub fn add_first(&mut self, stage: Stage) -> Result<()> {
        self.check_absent(stage)?;
        self.stages.insert(0, stage);
        Ok(())
    }

    /// Installs `stage` behind every other stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the stage is already installed.
    pub fn add_last(&mut self, stage: Stage) -> Result<()> {
        self.check_absent(stage)?;
        self.stages.push(stage);
        Ok(())
    }

    /// Returns true if `stage` is installed.
    #[must_use]
    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    /// Returns the installed stages, outermost first.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn check_absent(&self, stage: Stage) -> Result<()> {
        if self.contains(stage) {
            return Err(Error::InvalidState(format!("{stage:?} stage already installed")));
        }
        Ok(())
    }
}

/// Work handed to the I/O task.
#[derive(Debug)]
pub enum Outbound {
    /// Encode a frame into the write buffer.
    Frame(Frame),
    /// Write out everything buffered.
    Flush,
    /// Perform the TLS handshake and report on `done`.
    StartTls {
        /// TLS parameters.
        tls: TlsConfig,
        /// Receives the handshake outcome.
        done: oneshot::Sender<Result<()>>,
    },
    /// Flush and close the connection.
    Close,
}

/// Handle to a connection's I/O task.
#[derive(Debug, Clone)]
pub struct Channel {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Channel {
    /// Spawns the I/O task for `stream` on `handle`.
    ///
    /// Replies are dispatched to `correlator`; `observer` is notified of
    /// failures and of the connection's end.
    pub fn spawn<S>(
        handle: &Handle,
        stream: SmtpStream<S>,
        correlator: Arc<ResponseCorrelator>,
        observer: LifecycleObserver,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Driver::new(stream, correlator, observer);
        handle.spawn(driver.run(rx));
        Self { tx }
    }

    /// Queues a frame without flushing.
    pub fn write(&self, frame: Frame) {
        self.submit(Outbound::Frame(frame));
    }

    /// Flushes queued frames.
    pub fn flush(&self) {
        self.submit(Outbound::Flush);
    }

    /// Queues a frame and flushes.
    pub fn write_and_flush(&self, frame: Frame) {
        self.write(frame);
        self.flush();
    }

    /// Asks the I/O task to negotiate TLS over the current stream.
    pub fn start_tls(&self, tls: TlsConfig) -> oneshot::Receiver<Result<()>> {
        let (done, rx) = oneshot::channel();
        self.submit(Outbound::StartTls { tls, done });
        rx
    }

    /// Asks the I/O task to close the connection. Safe to call repeatedly.
    pub fn close(&self) {
        self.submit(Outbound::Close);
    }

    /// Returns true while the I/O task is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.tx.is_closed()
    }

    fn submit(&self, outbound: Outbound) {
        if self.tx.send(outbound).is_err() {
            tracing::debug!("connection already closed, dropping outbound work");
        }
    }
}

enum Exit {
    Requested,
    PeerClosed,
    Released,
}

struct Driver<S> {
    stream: Option<SmtpStream<S>>,
    chain: HandlerChain,
    encoder: RequestEncoder,
    decoder: ReplyDecoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    correlator: Arc<ResponseCorrelator>,
    observer: LifecycleObserver,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(
        stream: SmtpStream<S>,
        correlator: Arc<ResponseCorrelator>,
        observer: LifecycleObserver,
    ) -> Self {
        Self {
            stream: Some(stream),
            chain: HandlerChain::new(),
            encoder: RequestEncoder::new(),
            decoder: ReplyDecoder::new(),
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            correlator,
            observer,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Outbound>) {
        let reason = match self.event_loop(&mut rx).await {
            Ok(Exit::Requested) => "connection closed by client",
            Ok(Exit::Released) => "all session handles dropped",
            Ok(Exit::PeerClosed) => "connection closed by server",
            Err(err) => {
                self.observer.exception_caught(err);
                "connection failed"
            }
        };
        rx.close();

        if self.observer.cause().is_none() {
            if let Some(stream) = self.stream.as_mut() {
                if let Err(err) = stream.shutdown().await {
                    tracing::debug!(error = %err, "shutdown failed");
                }
            }
        }
        self.stream = None;

        let cause = self
            .observer
            .cause()
            .cloned()
            .unwrap_or_else(|| Error::ConnectionClosed(reason.to_string()));
        self.correlator.close(&cause);
        self.observer.channel_inactive();
    }

    /// Installs the codec and lifecycle stages, behind TLS when the stream
    /// is already encrypted.
    fn install_stages(&mut self) -> Result<()> {
        self.chain.add_last(Stage::Codec)?;
        self.chain.add_last(Stage::Lifecycle)?;
        if self.stream.as_ref().is_some_and(SmtpStream::is_tls) {
            self.chain.add_first(Stage::Tls)?;
        }
        tracing::trace!(stages = ?self.chain.stages(), "handler chain installed");
        Ok(())
    }

    async fn event_loop(&mut self, rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Result<Exit> {
        self.install_stages()?;
        loop {
            tokio::select! {
                biased;
                outbound = rx.recv() => match outbound {
                    Some(Outbound::Frame(frame)) => {
                        self.encoder.encode(&frame, &mut self.write_buf)?;
                    }
                    Some(Outbound::Flush) => self.flush().await?,
                    Some(Outbound::StartTls { tls, done }) => self.start_tls(&tls, done).await?,
                    Some(Outbound::Close) => {
                        self.flush().await?;
                        return Ok(Exit::Requested);
                    }
                    None => {
                        self.flush().await?;
                        return Ok(Exit::Released);
                    }
                },
                read = read_some(&mut self.stream, &mut self.read_buf) => {
                    if read? == 0 {
                        return self.peer_closed();
                    }
                    while let Some(reply) = self.decoder.decode(&mut self.read_buf)? {
                        self.correlator.dispatch(reply);
                    }
                }
            }
        }
    }

    fn peer_closed(&self) -> Result<Exit> {
        let outstanding = self.correlator.pending();
        if outstanding > 0 || self.decoder.is_mid_reply() || !self.read_buf.is_empty() {
            return Err(Error::ConnectionClosed(format!(
                "server closed the connection with {outstanding} replies outstanding"
            )));
        }
        Ok(Exit::PeerClosed)
    }

    async fn flush(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::InvalidState("no stream to write to".into()));
        };
        stream.write_all(&self.write_buf).await?;
        stream.flush().await?;
        self.write_buf.clear();
        Ok(())
    }

    async fn start_tls(&mut self, tls: &TlsConfig, done: oneshot::Sender<Result<()>>) -> Result<()> {
        if self.chain.contains(Stage::Tls) {
            let _ = done.send(Err(Error::InvalidState("TLS already negotiated".into())));
            return Ok(());
        }
        self.flush().await?;

        if !self.read_buf.is_empty() || self.decoder.is_mid_reply() {
            tracing::warn!(
                bytes = self.read_buf.len(),
                "discarding plaintext received after STARTTLS reply"
            );
            self.read_buf.clear();
            self.decoder = ReplyDecoder::new();
        }

        let Some(stream) = self.stream.take() else {
            let err = Error::InvalidState("no stream to upgrade".into());
            let _ = done.send(Err(err.clone()));
            return Err(err);
        };

        match stream.upgrade_to_tls(tls).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.chain.add_first(Stage::Tls)?;
                tracing::debug!(stages = ?self.chain.stages(), "TLS stage installed");
                let _ = done.send(Ok(()));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "TLS handshake failed");
                let _ = done.send(Err(err.clone()));
                Err(err)
            }
        }
    }
}

async fn read_some<S>(stream: &mut Option<SmtpStream<S>>, buf: &mut BytesMut) -> io::Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match stream {
        Some(stream) => stream.read_buf(buf).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::command::Request;
    use crate::types::ReplyCode;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn test_handler_chain_ordering() {
        let mut chain = HandlerChain::new();
        chain.add_last(Stage::Codec).unwrap();
        chain.add_last(Stage::Lifecycle).unwrap();
        chain.add_first(Stage::Tls).unwrap();
        assert_eq!(chain.stages(), &[Stage::Tls, Stage::Codec, Stage::Lifecycle]);
        assert!(chain.contains(Stage::Tls));
    }

    #[test]
    fn test_handler_chain_refuses_duplicates() {
        let mut chain = HandlerChain::new();
        chain.add_first(Stage::Tls).unwrap();
        assert!(matches!(chain.add_first(Stage::Tls), Err(Error::InvalidState(_))));
        assert_eq!(chain.stages().len(), 1);
    }

    #[tokio::test]
    async fn test_driver_installs_codec_then_lifecycle() {
        let (client, _server) = tokio::io::duplex(64);
        let (observer, _close) = LifecycleObserver::new();
        let mut driver = Driver::new(
            SmtpStream::Plain(client),
            Arc::new(ResponseCorrelator::new()),
            observer,
        );
        driver.install_stages().unwrap();
        assert_eq!(driver.chain.stages(), &[Stage::Codec, Stage::Lifecycle]);
        assert!(!driver.chain.contains(Stage::Tls));
        assert!(matches!(driver.install_stages(), Err(Error::InvalidState(_))));
    }

    fn spawn_channel() -> (
        Channel,
        Arc<ResponseCorrelator>,
        crate::connection::CloseFuture,
        tokio::io::DuplexStream,
    ) {
        let (client, server) = tokio::io::duplex(4096);
        let correlator = Arc::new(ResponseCorrelator::new());
        let (observer, close) = LifecycleObserver::new();
        let channel = Channel::spawn(
            &Handle::current(),
            SmtpStream::Plain(client),
            Arc::clone(&correlator),
            observer,
        );
        (channel, correlator, close, server)
    }

    #[tokio::test]
    async fn test_write_flush_and_dispatch() {
        let (channel, correlator, _close, server) = spawn_channel();
        let mut server = BufReader::new(server);

        let rx = correlator.expect(1, || "NOOP".into());
        channel.write_and_flush(Frame::Request(Request::noop()));

        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        assert_eq!(line, "NOOP\r\n");
        server.get_mut().write_all(b"250 2.0.0 OK\r\n").await.unwrap();

        let replies = rx.await.unwrap().unwrap();
        assert_eq!(replies[0].code, ReplyCode::OK);
    }

    #[tokio::test]
    async fn test_scripted_exchange_then_server_close() {
        let mock = tokio_test::io::Builder::new()
            .write(b"MAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\n")
            .read(b"250 2.1.0 OK\r\n250 2.1.5 OK\r\n")
            .build();
        let correlator = Arc::new(ResponseCorrelator::new());
        let (observer, close) = LifecycleObserver::new();
        let channel = Channel::spawn(
            &Handle::current(),
            SmtpStream::Plain(mock),
            Arc::clone(&correlator),
            observer,
        );

        let rx = correlator.expect(2, || "MAIL, RCPT".into());
        channel.write(Frame::Request(Request::new(
            crate::command::Verb::Mail,
            ["FROM:<a@example.com>"],
        )));
        channel.write(Frame::Request(Request::new(
            crate::command::Verb::Rcpt,
            ["TO:<b@example.com>"],
        )));
        channel.flush();

        let replies = rx.await.unwrap().unwrap();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r.code == ReplyCode::OK));
        assert!(close.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_graceful_and_fails_later_expectations() {
        let (channel, correlator, close, _server) = spawn_channel();
        channel.close();
        channel.close();

        assert!(close.wait().await.is_ok());
        assert!(!channel.is_active());
        let late = correlator.expect(1, || "NOOP".into());
        assert!(matches!(late.await.unwrap(), Err(Error::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn test_peer_eof_with_pending_reply_is_abnormal() {
        let (channel, correlator, close, server) = spawn_channel();
        let rx = correlator.expect(1, || "NOOP".into());
        channel.write_and_flush(Frame::Request(Request::noop()));
        drop(server);

        assert!(close.wait().await.is_err());
        assert!(matches!(rx.await.unwrap(), Err(Error::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn test_encoder_violation_closes_connection() {
        let (channel, _correlator, close, _server) = spawn_channel();
        channel.write_and_flush(Frame::EndOfContent);
        assert!(matches!(close.wait().await, Err(Error::Protocol(_))));
    }
}
