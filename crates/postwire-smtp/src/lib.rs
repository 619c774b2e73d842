//! # postwire-smtp
//!
//! An asynchronous SMTP client session engine (RFC 5321) built on tokio.
//!
//! ## Features
//!
//! - **Response correlation**: replies are matched to requests by order,
//!   with the expectation registered before any byte is written
//! - **Pipelining** (RFC 2920): grouped commands validated before sending
//! - **Capability discovery**: every EHLO reply replaces the extension set
//! - **STARTTLS** (RFC 3207) via rustls, and implicit TLS (port 465)
//! - **Authentication** (RFC 4954): PLAIN and LOGIN
//! - **Executor hand-off**: results complete on a caller-chosen runtime,
//!   never on the connection's I/O task
//!
//! ## Quick Start
//!
//! ```ignore
//! use postwire_smtp::{Address, MessageContent, Request, SessionConfig, connect};
//!
//! #[tokio::main]
//! async fn main() -> postwire_smtp::Result<()> {
//!     let greeting = connect("smtp.example.com", 587, SessionConfig::new()).await?;
//!     let session = greeting.session;
//!
//!     session.send(Request::ehlo("client.example.com"))?.await?;
//!     session.start_tls()?.await?;
//!     session.send(Request::ehlo("client.example.com"))?.await?;
//!     session.auth_plain("user@example.com", "password")?.await?;
//!
//!     let from = Address::new("sender@example.com")?;
//!     let to = Address::new("recipient@example.com")?;
//!     let replies = session
//!         .send_pipelined(vec![
//!             Request::mail_from(&from),
//!             Request::rcpt_to(&to),
//!             Request::data(),
//!         ])?
//!         .await?;
//!     assert!(replies.iter().all(|r| !r.is_error()));
//!
//!     let content = MessageContent::from_bytes("Subject: Test\n\nHello, World!\n");
//!     session.send_content(&content)?.await?;
//!
//!     session.send(Request::quit())?.await?;
//!     session.close().await
//! }
//! ```
//!
//! ## Threading
//!
//! ```text
//! caller ── send() ──→ correlator.expect() ──→ Channel queue ──→ I/O task ──→ server
//!                                                                  │
//! caller ←── SessionFuture ←── executor ←── correlator.dispatch() ←┘
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP requests and the outbound frame encoder
//! - [`connection`]: configuration, streams, the I/O task, close notification
//! - [`correlator`]: FIFO matching of replies to requests
//! - [`parser`]: reply decoder
//! - [`pipeline`]: pipelined group validation
//! - [`types`]: addresses, extensions, replies

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod content;
pub mod correlator;
mod error;
pub mod parser;
pub mod pipeline;
mod session;
pub mod types;

pub use command::{Request, Verb};
pub use connection::{CloseFuture, Security, SessionConfig, SessionConfigBuilder, TlsConfig, connect};
pub use content::MessageContent;
pub use error::{Error, Result};
pub use pipeline::check_pipelined;
pub use session::{ClientResponse, SessionFuture, SmtpSession, TlsState};
pub use types::{Address, AuthMechanism, Capabilities, Extension, Reply, ReplyCode};
