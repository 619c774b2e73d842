//! SMTP extension registry and capability snapshots.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Known SMTP service extensions advertised in an EHLO reply.
///
/// Keywords that are not in this registry are ignored when capabilities are
/// discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Extension {
    /// PIPELINING - Command pipelining (RFC 2920)
    Pipelining = 0,
    /// 8BITMIME - 8-bit MIME transport (RFC 6152)
    EightBitMime = 1,
    /// BINARYMIME - Binary MIME (RFC 3030)
    BinaryMime = 2,
    /// CHUNKING - Chunked message transfer (RFC 3030)
    Chunking = 3,
    /// DSN - Delivery status notifications (RFC 3461)
    Dsn = 4,
    /// ENHANCEDSTATUSCODES - Enhanced status codes (RFC 2034)
    EnhancedStatusCodes = 5,
    /// SMTPUTF8 - UTF-8 email addresses (RFC 6531)
    SmtpUtf8 = 6,
    /// SIZE - Maximum message size (RFC 1870)
    Size = 7,
    /// STARTTLS - TLS upgrade (RFC 3207)
    StartTls = 8,
    /// AUTH - Authentication (RFC 4954)
    Auth = 9,
}

impl Extension {
    /// Every registered extension.
    pub const ALL: [Self; 10] = [
        Self::Pipelining,
        Self::EightBitMime,
        Self::BinaryMime,
        Self::Chunking,
        Self::Dsn,
        Self::EnhancedStatusCodes,
        Self::SmtpUtf8,
        Self::Size,
        Self::StartTls,
        Self::Auth,
    ];

    /// Looks up an EHLO keyword, ignoring case.
    #[must_use]
    pub fn find(keyword: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ext| ext.keyword().eq_ignore_ascii_case(keyword))
    }

    /// Returns the EHLO keyword for this extension.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Pipelining => "PIPELINING",
            Self::EightBitMime => "8BITMIME",
            Self::BinaryMime => "BINARYMIME",
            Self::Chunking => "CHUNKING",
            Self::Dsn => "DSN",
            Self::EnhancedStatusCodes => "ENHANCEDSTATUSCODES",
            Self::SmtpUtf8 => "SMTPUTF8",
            Self::Size => "SIZE",
            Self::StartTls => "STARTTLS",
            Self::Auth => "AUTH",
        }
    }

    const fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication (RFC 4616)
    Plain,
    /// LOGIN - legacy plaintext
    Login,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if s.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

const AUTH_PLAIN_BIT: u32 = 1 << 30;
const AUTH_LOGIN_BIT: u32 = 1 << 31;

/// Immutable snapshot of what the server advertised in its last EHLO reply.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    /// A snapshot with nothing advertised.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds a snapshot from the detail lines of an EHLO reply.
    ///
    /// The first token of each line is looked up in the registry. For an
    /// `AUTH` line, the remaining tokens set the PLAIN and LOGIN flags.
    #[must_use]
    pub fn from_ehlo<S: AsRef<str>>(details: &[S]) -> Self {
        let mut caps = Self::empty();

        for line in details {
            let mut parts = line.as_ref().split_whitespace();
            let Some(keyword) = parts.next() else {
                continue;
            };

            if let Some(ext) = Extension::find(keyword) {
                caps.insert(ext);
            }

            if keyword.eq_ignore_ascii_case("AUTH") {
                for mechanism in parts.filter_map(AuthMechanism::parse) {
                    caps.insert_auth(mechanism);
                }
            }
        }

        caps
    }

    /// Returns true if the extension was advertised.
    #[must_use]
    pub const fn contains(self, ext: Extension) -> bool {
        self.0 & ext.bit() != 0
    }

    /// Returns true if `AUTH PLAIN` was advertised.
    #[must_use]
    pub const fn auth_plain(self) -> bool {
        self.0 & AUTH_PLAIN_BIT != 0
    }

    /// Returns true if `AUTH LOGIN` was advertised.
    #[must_use]
    pub const fn auth_login(self) -> bool {
        self.0 & AUTH_LOGIN_BIT != 0
    }

    /// Returns true if the given mechanism was advertised.
    #[must_use]
    pub const fn supports_auth(self, mechanism: AuthMechanism) -> bool {
        match mechanism {
            AuthMechanism::Plain => self.auth_plain(),
            AuthMechanism::Login => self.auth_login(),
        }
    }

    /// Iterates over the advertised extensions in registry order.
    pub fn extensions(self) -> impl Iterator<Item = Extension> {
        Extension::ALL
            .into_iter()
            .filter(move |ext| self.contains(*ext))
    }

    /// Returns true if nothing was advertised.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn insert(&mut self, ext: Extension) {
        self.0 |= ext.bit();
    }

    fn insert_auth(&mut self, mechanism: AuthMechanism) {
        self.0 |= match mechanism {
            AuthMechanism::Plain => AUTH_PLAIN_BIT,
            AuthMechanism::Login => AUTH_LOGIN_BIT,
        };
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("extensions", &self.extensions().collect::<Vec<_>>())
            .field("auth_plain", &self.auth_plain())
            .field("auth_login", &self.auth_login())
            .finish()
    }
}

/// Capability snapshot shared between the I/O task (single writer) and any
/// number of readers.
///
/// A new EHLO reply replaces the whole snapshot with one atomic store.
#[derive(Debug, Default)]
pub(crate) struct SharedCapabilities(AtomicU32);

impl SharedCapabilities {
    pub(crate) fn load(&self) -> Capabilities {
        Capabilities(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn replace(&self, caps: Capabilities) {
        self.0.store(caps.0, Ordering::Release);
    }
}
