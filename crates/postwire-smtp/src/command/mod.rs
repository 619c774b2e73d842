//! SMTP request types and their wire form.

mod encoder;

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::types::{Address, AuthMechanism};

pub use encoder::{Frame, RequestEncoder};

/// Placeholder written in place of any AUTH request in diagnostics.
pub const REDACTED_AUTH: &str = "<redacted-auth-command>";

/// SMTP command keyword.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verb {
    /// HELO - Simple greeting
    Helo,
    /// EHLO - Extended greeting
    Ehlo,
    /// MAIL - Start mail transaction
    Mail,
    /// RCPT - Add recipient
    Rcpt,
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// VRFY - Verify address
    Vrfy,
    /// EXPN - Expand mailing list
    Expn,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
    /// HELP - Ask for help
    Help,
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth,
    /// Any other (extension) command, sent verbatim
    Other(String),
}

impl Verb {
    /// Returns the keyword as written on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
            Self::Mail => "MAIL",
            Self::Rcpt => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Vrfy => "VRFY",
            Self::Expn => "EXPN",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::Help => "HELP",
            Self::StartTls => "STARTTLS",
            Self::Auth => "AUTH",
            Self::Other(name) => name,
        }
    }

    /// Resolves a keyword to its verb, ignoring case. Unknown keywords become
    /// [`Verb::Other`] unchanged.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Self {
        const KNOWN: [Verb; 13] = [
            Verb::Helo,
            Verb::Ehlo,
            Verb::Mail,
            Verb::Rcpt,
            Verb::Data,
            Verb::Rset,
            Verb::Vrfy,
            Verb::Expn,
            Verb::Noop,
            Verb::Quit,
            Verb::Help,
            Verb::StartTls,
            Verb::Auth,
        ];
        KNOWN
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(keyword))
            .unwrap_or_else(|| Self::Other(keyword.to_string()))
    }

    fn normalize(self) -> Self {
        match self {
            Self::Other(name) => Self::from_keyword(&name),
            verb => verb,
        }
    }

    /// Returns true if the server answers this command by waiting for
    /// message content.
    #[must_use]
    pub const fn is_content_expected(&self) -> bool {
        matches!(self, Self::Data)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured SMTP command: a verb and its space-separated parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    verb: Verb,
    parameters: Vec<String>,
}

impl Request {
    /// Creates a request from a verb and parameters.
    ///
    /// A [`Verb::Other`] naming a standard keyword is resolved to that verb,
    /// so `Other("auth")` is treated as AUTH everywhere.
    #[must_use]
    pub fn new<I, S>(verb: Verb, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            verb: verb.normalize(),
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }

    fn bare(verb: Verb) -> Self {
        Self {
            verb,
            parameters: Vec::new(),
        }
    }

    /// `EHLO <hostname>`
    #[must_use]
    pub fn ehlo(hostname: impl Into<String>) -> Self {
        Self::new(Verb::Ehlo, [hostname.into()])
    }

    /// `HELO <hostname>`
    #[must_use]
    pub fn helo(hostname: impl Into<String>) -> Self {
        Self::new(Verb::Helo, [hostname.into()])
    }

    /// `MAIL FROM:<address>`
    #[must_use]
    pub fn mail_from(from: &Address) -> Self {
        Self::new(Verb::Mail, [format!("FROM:<{from}>")])
    }

    /// `MAIL FROM:<>` (null reverse path, used for bounces)
    #[must_use]
    pub fn mail_from_null() -> Self {
        Self::new(Verb::Mail, ["FROM:<>"])
    }

    /// `RCPT TO:<address>`
    #[must_use]
    pub fn rcpt_to(to: &Address) -> Self {
        Self::new(Verb::Rcpt, [format!("TO:<{to}>")])
    }

    /// `DATA`
    #[must_use]
    pub fn data() -> Self {
        Self::bare(Verb::Data)
    }

    /// `RSET`
    #[must_use]
    pub fn rset() -> Self {
        Self::bare(Verb::Rset)
    }

    /// `NOOP`
    #[must_use]
    pub fn noop() -> Self {
        Self::bare(Verb::Noop)
    }

    /// `QUIT`
    #[must_use]
    pub fn quit() -> Self {
        Self::bare(Verb::Quit)
    }

    /// `VRFY <string>`
    #[must_use]
    pub fn vrfy(target: impl Into<String>) -> Self {
        Self::new(Verb::Vrfy, [target.into()])
    }

    /// `EXPN <list>`
    #[must_use]
    pub fn expn(list: impl Into<String>) -> Self {
        Self::new(Verb::Expn, [list.into()])
    }

    /// `HELP [topic]`
    #[must_use]
    pub fn help(topic: Option<&str>) -> Self {
        Self::new(Verb::Help, topic)
    }

    /// `STARTTLS`
    #[must_use]
    pub fn starttls() -> Self {
        Self::bare(Verb::StartTls)
    }

    /// `AUTH <mechanism> [initial-response]`
    #[must_use]
    pub fn auth(mechanism: AuthMechanism, initial_response: Option<String>) -> Self {
        let mut request = Self::new(Verb::Auth, [mechanism.as_str()]);
        request.parameters.extend(initial_response);
        request
    }

    /// Appends an ESMTP parameter such as `BODY=8BITMIME` or `SIZE=1024`.
    #[must_use]
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameters.push(parameter.into());
        self
    }

    /// Returns the command verb.
    #[must_use]
    pub const fn verb(&self) -> &Verb {
        &self.verb
    }

    /// Returns the parameters.
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Rejects requests that would not fit on a single command line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the verb is empty or any part
    /// contains CR or LF.
    pub fn check_line_safe(&self) -> Result<()> {
        let verb = self.verb.as_str();
        if verb.is_empty() || verb.contains(char::is_whitespace) {
            return Err(Error::InvalidArgument(format!(
                "invalid command keyword {verb:?}"
            )));
        }
        if self.parameters.iter().any(|p| p.contains(['\r', '\n'])) {
            return Err(Error::InvalidArgument(format!(
                "{verb} parameters must not contain line breaks"
            )));
        }
        Ok(())
    }

    /// Writes the CRLF-terminated command line into `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_slice(self.verb.as_str().as_bytes());
        for parameter in &self.parameters {
            dst.put_u8(b' ');
            dst.put_slice(parameter.as_bytes());
        }
        dst.put_slice(b"\r\n");
    }

    /// Serializes the command to bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    /// Renders the request for diagnostics, hiding AUTH parameters.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.verb == Verb::Auth {
            return REDACTED_AUTH.to_string();
        }
        if self.parameters.is_empty() {
            self.verb.to_string()
        } else {
            format!("{} {}", self.verb, self.parameters.join(" "))
        }
    }
}

/// Renders a group of requests for diagnostics, hiding AUTH parameters.
#[must_use]
pub fn describe_requests(requests: &[Request]) -> String {
    requests
        .iter()
        .map(Request::describe)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    #[test]
    fn test_helo_ehlo() {
        assert_eq!(
            Request::helo("client.example.com").serialize(),
            b"HELO client.example.com\r\n"
        );
        assert_eq!(
            Request::ehlo("client.example.com").serialize(),
            b"EHLO client.example.com\r\n"
        );
    }

    #[test]
    fn test_starttls_command() {
        assert_eq!(Request::starttls().serialize(), b"STARTTLS\r\n");
    }

    #[test]
    fn test_auth_plain() {
        let req = Request::auth(AuthMechanism::Plain, Some("AHVzZXIAcGFzcw==".to_string()));
        assert_eq!(req.serialize(), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
    }

    #[test]
    fn test_auth_without_initial_response() {
        let req = Request::auth(AuthMechanism::Login, None);
        assert_eq!(req.serialize(), b"AUTH LOGIN\r\n");
    }

    #[test]
    fn test_mail_from_with_params() {
        let req = Request::mail_from(&addr("sender@example.com"))
            .with_parameter("BODY=8BITMIME")
            .with_parameter("SIZE=12345");
        assert_eq!(
            req.serialize(),
            b"MAIL FROM:<sender@example.com> BODY=8BITMIME SIZE=12345\r\n"
        );
    }

    #[test]
    fn test_mail_from_null() {
        assert_eq!(Request::mail_from_null().serialize(), b"MAIL FROM:<>\r\n");
    }

    #[test]
    fn test_rcpt_to_command() {
        let req = Request::rcpt_to(&addr("recipient@example.com"));
        assert_eq!(req.serialize(), b"RCPT TO:<recipient@example.com>\r\n");
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Request::data().serialize(), b"DATA\r\n");
        assert_eq!(Request::rset().serialize(), b"RSET\r\n");
        assert_eq!(Request::noop().serialize(), b"NOOP\r\n");
        assert_eq!(Request::quit().serialize(), b"QUIT\r\n");
        assert_eq!(Request::help(None).serialize(), b"HELP\r\n");
        assert_eq!(Request::help(Some("MAIL")).serialize(), b"HELP MAIL\r\n");
    }

    #[test]
    fn test_other_verb() {
        let req = Request::new(Verb::Other("XCLIENT".into()), ["ADDR=192.0.2.1"]);
        assert_eq!(req.serialize(), b"XCLIENT ADDR=192.0.2.1\r\n");
    }

    #[test]
    fn test_from_keyword() {
        assert_eq!(Verb::from_keyword("ehlo"), Verb::Ehlo);
        assert_eq!(Verb::from_keyword("StartTLS"), Verb::StartTls);
        assert_eq!(
            Verb::from_keyword("XCLIENT"),
            Verb::Other("XCLIENT".into())
        );
    }

    #[test]
    fn test_keyword_spelled_as_other_verb_is_resolved() {
        let req = Request::new(Verb::Other("auth".into()), ["PLAIN", "c2VjcmV0"]);
        assert_eq!(req.verb(), &Verb::Auth);
        assert_eq!(req.serialize(), b"AUTH PLAIN c2VjcmV0\r\n");

        let description = describe_requests(&[req]);
        assert_eq!(description, REDACTED_AUTH);
        assert!(!description.contains("c2VjcmV0"));

        let ehlo = Request::new(Verb::Other("Ehlo".into()), ["me"]);
        assert_eq!(ehlo.verb(), &Verb::Ehlo);
    }

    #[test]
    fn test_content_expected() {
        assert!(Verb::Data.is_content_expected());
        assert!(!Verb::Mail.is_content_expected());
    }

    #[test]
    fn test_line_safety() {
        assert!(Request::noop().check_line_safe().is_ok());
        assert!(Request::vrfy("a\r\nQUIT").check_line_safe().is_err());
        assert!(Request::new(Verb::Other(String::new()), Vec::<String>::new())
            .check_line_safe()
            .is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(Request::noop().describe(), "NOOP");
        assert_eq!(Request::ehlo("me").describe(), "EHLO me");
        let requests = [
            Request::mail_from(&addr("a@example.com")),
            Request::rcpt_to(&addr("b@example.com")),
        ];
        assert_eq!(
            describe_requests(&requests),
            "MAIL FROM:<a@example.com>, RCPT TO:<b@example.com>"
        );
    }

    #[test]
    fn test_describe_redacts_auth() {
        let secret = "c2VjcmV0";
        let requests = [
            Request::noop(),
            Request::auth(AuthMechanism::Plain, Some(secret.to_string())),
        ];
        let description = describe_requests(&requests);
        assert_eq!(description, format!("NOOP, {REDACTED_AUTH}"));
        assert!(!description.contains(secret));
        assert!(!description.contains("PLAIN"));
    }
}
