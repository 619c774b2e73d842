//! SMTP reply types.

use std::fmt;

/// SMTP reply from server.
///
/// `message` holds one entry per reply line with the code and separator
/// stripped. For an EHLO reply these are the capability lines, preceded by
/// the server's greeting line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Reply message lines.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns true if the server refused the request (4xx or 5xx).
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code.is_error()
    }

    /// Returns the detail lines of the reply.
    #[must_use]
    pub fn details(&self) -> &[String] {
        &self.message
    }

    /// Returns the full message as a single string.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message.join(" / "))
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Returns true for any transient or permanent failure.
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.0 >= 400
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Common reply codes
impl ReplyCode {
    /// 220 Service ready / ready to start TLS
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCEEDED: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 454 TLS not available due to temporary reason
    pub const TLS_UNAVAILABLE: Self = Self(454);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 503 Bad sequence of commands
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    mod reply_code_tests {
        use super::*;

        #[test]
        fn classes() {
            assert!(ReplyCode::OK.is_success());
            assert!(ReplyCode::START_DATA.is_intermediate());
            assert!(ReplyCode::AUTH_CONTINUE.is_intermediate());
            assert!(ReplyCode::TLS_UNAVAILABLE.is_transient());
            assert!(ReplyCode::AUTH_FAILED.is_permanent());
        }

        #[test]
        fn errors_start_at_400() {
            assert!(!ReplyCode::OK.is_error());
            assert!(!ReplyCode::AUTH_CONTINUE.is_error());
            assert!(!ReplyCode::new(399).is_error());
            assert!(ReplyCode::new(400).is_error());
            assert!(ReplyCode::SERVICE_UNAVAILABLE.is_error());
            assert!(ReplyCode::TRANSACTION_FAILED.is_error());
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", ReplyCode::OK), "250");
            assert_eq!(ReplyCode::new(421).as_u16(), 421);
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn error_reply() {
            let reply = Reply::new(ReplyCode::BAD_SEQUENCE, vec!["Bad sequence".to_string()]);
            assert!(reply.is_error());
            assert!(!reply.is_success());
        }

        #[test]
        fn details_and_text() {
            let reply = Reply::new(
                ReplyCode::OK,
                vec!["mx.example.com".to_string(), "PIPELINING".to_string()],
            );
            assert_eq!(reply.details().len(), 2);
            assert_eq!(reply.message_text(), "mx.example.com\nPIPELINING");
            assert_eq!(reply.to_string(), "250 mx.example.com / PIPELINING");
        }

        #[test]
        fn empty_message() {
            let reply = Reply::new(ReplyCode::OK, vec![]);
            assert_eq!(reply.message_text(), "");
        }
    }
}
