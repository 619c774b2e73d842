//! SMTP response parser.

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Maximum reply line length to prevent memory exhaustion.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum size of one reply across all of its lines.
pub const MAX_REPLY_LENGTH: usize = 1024 * 1024;

/// Parses an SMTP reply from response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// # Errors
///
/// Returns an error if the reply is malformed or its lines disagree on the
/// reply code.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("Empty reply".into()));
    };

    let code = parse_code(first)?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        if parse_code(line)? != code {
            return Err(Error::Protocol(format!(
                "Reply code changed within multi-line reply: {line}"
            )));
        }
        match line.get(4..) {
            Some(text) => message.push(text.to_string()),
            None if line.len() <= 4 => message.push(String::new()),
            None => return Err(Error::Protocol(format!("Malformed reply line: {line}"))),
        }
    }

    Ok(Reply::new(ReplyCode::new(code), message))
}

fn parse_code(line: &str) -> Result<u16> {
    let code_str = line
        .get(0..3)
        .ok_or_else(|| Error::Protocol(format!("Reply too short: {line}")))?;
    if !code_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Protocol(format!("Invalid reply code: {code_str}")));
    }
    code_str
        .parse::<u16>()
        .map_err(|_| Error::Protocol(format!("Invalid reply code: {code_str}")))
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Multi-line replies use `-` separator for continuation and ` ` for the last
/// line. A bare three-digit code also ends a reply.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    match line.as_bytes().get(3) {
        Some(b' ') => true,
        Some(_) => false,
        None => line.len() == 3,
    }
}

/// Incremental reply decoder.
///
/// Feed it the connection's read buffer; it consumes complete lines and
/// yields a [`Reply`] whenever the last line of a reply has arrived.
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    lines: Vec<String>,
    size: usize,
}

impl ReplyDecoder {
    /// Creates a new decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the next complete reply from `buf`, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if a line or a whole reply is too long, or if a reply
    /// is malformed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Reply>> {
        loop {
            let Some(pos) = find_crlf(buf) else {
                if buf.len() > MAX_LINE_LENGTH {
                    return Err(Error::Protocol("reply line too long".into()));
                }
                return Ok(None);
            };

            let raw = buf.split_to(pos);
            buf.advance(2);
            let line = String::from_utf8_lossy(&raw).into_owned();
            tracing::trace!(line = %line, "S:");

            if line.is_empty() {
                continue;
            }

            self.size += line.len();
            if self.size > MAX_REPLY_LENGTH {
                return Err(Error::Protocol(format!(
                    "reply exceeds {MAX_REPLY_LENGTH} bytes over {} lines",
                    self.lines.len() + 1
                )));
            }

            let last = is_last_reply_line(&line);
            self.lines.push(line);

            if last {
                self.size = 0;
                let lines = std::mem::take(&mut self.lines);
                return parse_reply(&lines).map(Some);
            }
        }
    }

    /// Returns true if part of a multi-line reply has been consumed.
    #[must_use]
    pub fn is_mid_reply(&self) -> bool {
        !self.lines.is_empty()
    }
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
