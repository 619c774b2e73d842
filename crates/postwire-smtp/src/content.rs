//! Message content ready to follow a DATA command.
//!
//! The session does not encode MIME bodies itself. Callers hand it both a
//! 7-bit-safe rendition and an 8BITMIME rendition of the same message, and
//! the session picks one based on what the server advertised.

use bytes::{BufMut, Bytes, BytesMut};

/// A message body in its two transfer encodings.
///
/// Both bodies are stored in wire form: CRLF line endings, leading dots
/// doubled, and a final CRLF. The terminating `.` line is written by the
/// request encoder, not stored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    seven_bit: Bytes,
    eight_bit: Bytes,
}

impl MessageContent {
    /// Creates content from a 7-bit-safe body and an 8BITMIME body.
    #[must_use]
    pub fn new(seven_bit: impl AsRef<[u8]>, eight_bit: impl AsRef<[u8]>) -> Self {
        Self {
            seven_bit: to_wire_form(seven_bit.as_ref()),
            eight_bit: to_wire_form(eight_bit.as_ref()),
        }
    }

    /// Creates content that is sent identically in both encodings.
    #[must_use]
    pub fn from_bytes(body: impl AsRef<[u8]>) -> Self {
        let wire = to_wire_form(body.as_ref());
        Self {
            seven_bit: wire.clone(),
            eight_bit: wire,
        }
    }

    /// Returns the 7-bit-safe body.
    #[must_use]
    pub fn seven_bit_encoded(&self) -> Bytes {
        self.seven_bit.clone()
    }

    /// Returns the 8BITMIME body.
    #[must_use]
    pub fn eight_bit_mime_encoded(&self) -> Bytes {
        self.eight_bit.clone()
    }

    /// Returns the body to send given whether the server supports 8BITMIME.
    #[must_use]
    pub fn encoded_for(&self, eight_bit_mime: bool) -> Bytes {
        if eight_bit_mime {
            self.eight_bit_mime_encoded()
        } else {
            self.seven_bit_encoded()
        }
    }
}

/// Normalizes line endings to CRLF and byte-stuffs lines starting with `.`.
fn to_wire_form(body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(body.len() + body.len() / 64 + 2);

    if body.is_empty() {
        return out.freeze();
    }

    let body = body.strip_suffix(b"\n").unwrap_or(body);
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            out.put_u8(b'.');
        }
        out.put_slice(line);
        out.put_slice(b"\r\n");
    }

    out.freeze()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_crlf_normalization() {
        let content = MessageContent::from_bytes("Subject: hi\n\nbody\n");
        assert_eq!(
            &content.seven_bit_encoded()[..],
            b"Subject: hi\r\n\r\nbody\r\n"
        );
    }

    #[test]
    fn test_existing_crlf_is_kept() {
        let content = MessageContent::from_bytes("a\r\nb\r\n");
        assert_eq!(&content.seven_bit_encoded()[..], b"a\r\nb\r\n");
    }

    #[test]
    fn test_missing_final_newline_is_added() {
        let content = MessageContent::from_bytes("a\r\nb");
        assert_eq!(&content.seven_bit_encoded()[..], b"a\r\nb\r\n");
    }

    #[test]
    fn test_dot_stuffing() {
        let content = MessageContent::from_bytes("foo\n.bar\n..baz\n.\n");
        assert_eq!(
            &content.seven_bit_encoded()[..],
            b"foo\r\n..bar\r\n...baz\r\n..\r\n"
        );
    }

    #[test]
    fn test_empty_body() {
        let content = MessageContent::from_bytes("");
        assert!(content.seven_bit_encoded().is_empty());
    }

    #[test]
    fn test_encoding_choice() {
        let content = MessageContent::new("caf=C3=A9\n", "caf\u{e9}\n");
        assert_eq!(&content.encoded_for(false)[..], b"caf=C3=A9\r\n");
        assert_eq!(&content.encoded_for(true)[..], "caf\u{e9}\r\n".as_bytes());
    }
}
