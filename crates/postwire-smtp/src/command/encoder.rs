//! Outbound frame encoder.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Request, Verb};
use crate::error::{Error, Result};

/// A unit of outbound data handed to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A command line.
    Request(Request),
    /// Message content following DATA, already in wire form.
    Content(Bytes),
    /// Marks the end of message content; encoded as the `.` line.
    EndOfContent,
    /// Bytes written as-is (SASL continuation lines).
    Raw(Bytes),
}

/// Encodes frames and tracks whether message content is expected.
///
/// DATA switches the encoder into content mode. Only content, the end marker
/// or RSET are accepted until the end marker arrives.
#[derive(Debug, Default)]
pub struct RequestEncoder {
    content_expected: bool,
}

impl RequestEncoder {
    /// Creates a new encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while the encoder waits for message content.
    #[must_use]
    pub const fn is_content_expected(&self) -> bool {
        self.content_expected
    }

    /// Appends the wire form of `frame` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the frame is not allowed in the current
    /// state. Nothing is written in that case.
    pub fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        match frame {
            Frame::Request(request) => {
                if self.content_expected {
                    if *request.verb() == Verb::Rset {
                        self.content_expected = false;
                    } else {
                        return Err(Error::Protocol(format!(
                            "message content expected, got {}",
                            request.verb()
                        )));
                    }
                }
                request.encode_into(dst);
                if request.verb().is_content_expected() {
                    self.content_expected = true;
                }
            }
            Frame::Content(body) => {
                if !self.content_expected {
                    return Err(Error::Protocol("no message content expected".into()));
                }
                dst.put_slice(body);
            }
            Frame::EndOfContent => {
                if !self.content_expected {
                    return Err(Error::Protocol("no message content expected".into()));
                }
                dst.put_slice(b".\r\n");
                self.content_expected = false;
            }
            Frame::Raw(bytes) => dst.put_slice(bytes),
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn encode_all(encoder: &mut RequestEncoder, frames: &[Frame]) -> Result<Vec<u8>> {
        let mut dst = BytesMut::new();
        for frame in frames {
            encoder.encode(frame, &mut dst)?;
        }
        Ok(dst.to_vec())
    }

    #[test]
    fn test_data_then_content() {
        let mut encoder = RequestEncoder::new();
        let out = encode_all(
            &mut encoder,
            &[
                Frame::Request(Request::data()),
                Frame::Content(Bytes::from_static(b"Subject: x\r\n\r\nhi\r\n")),
                Frame::EndOfContent,
                Frame::Request(Request::quit()),
            ],
        )
        .unwrap();
        assert_eq!(out, b"DATA\r\nSubject: x\r\n\r\nhi\r\n.\r\nQUIT\r\n");
        assert!(!encoder.is_content_expected());
    }

    #[test]
    fn test_content_without_data_is_rejected() {
        let mut encoder = RequestEncoder::new();
        let mut dst = BytesMut::new();
        let err = encoder
            .encode(&Frame::Content(Bytes::from_static(b"x\r\n")), &mut dst)
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(dst.is_empty());
        assert!(encoder.encode(&Frame::EndOfContent, &mut dst).is_err());
    }

    #[test]
    fn test_request_while_content_expected() {
        let mut encoder = RequestEncoder::new();
        let mut dst = BytesMut::new();
        encoder.encode(&Frame::Request(Request::data()), &mut dst).unwrap();
        assert!(encoder.is_content_expected());
        assert!(encoder.encode(&Frame::Request(Request::noop()), &mut dst).is_err());
    }

    #[test]
    fn test_rset_clears_content_state() {
        let mut encoder = RequestEncoder::new();
        let out = encode_all(
            &mut encoder,
            &[Frame::Request(Request::data()), Frame::Request(Request::rset())],
        )
        .unwrap();
        assert_eq!(out, b"DATA\r\nRSET\r\n");
        assert!(!encoder.is_content_expected());
    }

    #[test]
    fn test_raw_bypasses_state() {
        let mut encoder = RequestEncoder::new();
        let out = encode_all(&mut encoder, &[Frame::Raw(Bytes::from_static(b"cGFzcw==\r\n"))])
            .unwrap();
        assert_eq!(out, b"cGFzcw==\r\n");
    }
}
