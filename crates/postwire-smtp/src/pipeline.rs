//! Command grouping rules for SMTP pipelining (RFC 2920).
//!
//! A client that has seen PIPELINING in the EHLO reply may send several
//! commands before reading their replies. RFC 2920 section 3.1 limits which
//! commands may share a group:
//!
//! - RSET, MAIL and RCPT may appear anywhere in a group.
//! - EHLO, DATA, VRFY, EXPN, QUIT and NOOP change state the client has to
//!   react to, so they may only appear as the last command of a group.
//! - Everything else (AUTH, STARTTLS, HELP, extension commands) cannot be
//!   pipelined at all.
//!
//! # Example
//!
//! ```ignore
//! use postwire_smtp::command::Request;
//! use postwire_smtp::pipeline::check_pipelined;
//!
//! check_pipelined(&[Request::rset(), Request::noop()])?;
//! ```

use crate::command::{Request, Verb};
use crate::error::{Error, Result};

/// Where a command may sit in a pipelined group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePlacement {
    /// May appear at any position.
    Anywhere,

    /// May only appear as the last command.
    LastOnly,

    /// Cannot be pipelined.
    Never,
}

impl Verb {
    /// Returns where this command may appear in a pipelined group.
    #[must_use]
    pub const fn pipeline_placement(&self) -> PipelinePlacement {
        match self {
            Self::Rset | Self::Mail | Self::Rcpt => PipelinePlacement::Anywhere,

            Self::Ehlo | Self::Data | Self::Vrfy | Self::Expn | Self::Quit | Self::Noop => {
                PipelinePlacement::LastOnly
            }

            Self::Helo
            | Self::Help
            | Self::StartTls
            | Self::Auth
            | Self::Other(_) => PipelinePlacement::Never,
        }
    }

    /// Returns true if the command may appear before the end of a group.
    #[must_use]
    pub const fn is_valid_anywhere_pipelined(&self) -> bool {
        matches!(self.pipeline_placement(), PipelinePlacement::Anywhere)
    }

    /// Returns true if the command may end a group.
    #[must_use]
    pub const fn is_valid_at_end_pipelined(&self) -> bool {
        !matches!(self.pipeline_placement(), PipelinePlacement::Never)
    }
}

/// Checks that `requests` may be sent as one pipelined group.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] naming the offending command if the
/// group is empty or a command is out of place.
pub fn check_pipelined(requests: &[Request]) -> Result<()> {
    if requests.is_empty() {
        return Err(Error::InvalidArgument(
            "You must provide requests to pipeline".into(),
        ));
    }

    let last = requests.len() - 1;
    for (i, request) in requests.iter().enumerate() {
        let verb = request.verb();

        if i == last {
            if !verb.is_valid_at_end_pipelined() {
                return Err(Error::InvalidArgument(format!(
                    "{verb} cannot be used in a pipelined request"
                )));
            }
        } else if !verb.is_valid_anywhere_pipelined() {
            let rule = if verb.is_valid_at_end_pipelined() {
                "must appear last in a pipelined request"
            } else {
                "cannot be used in a pipelined request"
            };
            return Err(Error::InvalidArgument(format!("{verb} {rule}")));
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::types::{Address, AuthMechanism};
    use proptest::prelude::*;

    fn mail() -> Request {
        Request::mail_from(&Address::new("a@example.com").unwrap())
    }

    fn rcpt() -> Request {
        Request::rcpt_to(&Address::new("b@example.com").unwrap())
    }

    fn message(result: Result<()>) -> String {
        match result {
            Err(Error::InvalidArgument(msg)) => msg,
            other => panic!("Expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn test_typical_transaction_group() {
        assert!(check_pipelined(&[mail(), rcpt(), rcpt(), Request::data()]).is_ok());
    }

    #[test]
    fn test_single_commands() {
        assert!(check_pipelined(&[Request::noop()]).is_ok());
        assert!(check_pipelined(&[Request::rset()]).is_ok());
        assert!(check_pipelined(&[Request::quit()]).is_ok());
    }

    #[test]
    fn test_empty_group() {
        assert_eq!(
            message(check_pipelined(&[])),
            "You must provide requests to pipeline"
        );
    }

    #[test]
    fn test_state_changing_command_not_last() {
        assert_eq!(
            message(check_pipelined(&[Request::data(), mail()])),
            "DATA must appear last in a pipelined request"
        );
        assert_eq!(
            message(check_pipelined(&[Request::ehlo("me"), Request::noop()])),
            "EHLO must appear last in a pipelined request"
        );
    }

    #[test]
    fn test_non_pipelinable_last() {
        assert_eq!(
            message(check_pipelined(&[mail(), Request::starttls()])),
            "STARTTLS cannot be used in a pipelined request"
        );
        assert_eq!(
            message(check_pipelined(&[Request::helo("me")])),
            "HELO cannot be used in a pipelined request"
        );
    }

    #[test]
    fn test_non_pipelinable_not_last() {
        let auth = Request::auth(AuthMechanism::Plain, Some("x".into()));
        assert_eq!(
            message(check_pipelined(&[auth, Request::noop()])),
            "AUTH cannot be used in a pipelined request"
        );
    }

    #[test]
    fn test_first_violation_is_reported() {
        assert_eq!(
            message(check_pipelined(&[mail(), Request::quit(), Request::help(None)])),
            "QUIT must appear last in a pipelined request"
        );
    }

    #[test]
    fn test_anywhere_is_subset_of_at_end() {
        for verb in [Verb::Rset, Verb::Mail, Verb::Rcpt] {
            assert!(verb.is_valid_anywhere_pipelined());
            assert!(verb.is_valid_at_end_pipelined());
        }
    }

    fn any_verb() -> impl Strategy<Value = Verb> {
        prop_oneof![
            Just(Verb::Helo),
            Just(Verb::Ehlo),
            Just(Verb::Mail),
            Just(Verb::Rcpt),
            Just(Verb::Data),
            Just(Verb::Rset),
            Just(Verb::Vrfy),
            Just(Verb::Expn),
            Just(Verb::Noop),
            Just(Verb::Quit),
            Just(Verb::Help),
            Just(Verb::StartTls),
            Just(Verb::Auth),
            "X[A-Z]{3,8}".prop_map(Verb::Other),
        ]
    }

    proptest! {
        #[test]
        fn prop_valid_iff_prefix_anywhere_and_last_terminal(
            verbs in prop::collection::vec(any_verb(), 1..8)
        ) {
            let requests: Vec<Request> = verbs
                .iter()
                .map(|v| Request::new(v.clone(), Vec::<String>::new()))
                .collect();
            let (last, prefix) = verbs.split_last().unwrap();
            let expected_ok = prefix.iter().all(Verb::is_valid_anywhere_pipelined)
                && last.is_valid_at_end_pipelined();

            let result = check_pipelined(&requests);
            prop_assert_eq!(result.is_ok(), expected_ok);

            if let Err(Error::InvalidArgument(msg)) = result {
                let offender = verbs
                    .iter()
                    .enumerate()
                    .find(|(i, v)| {
                        if *i == verbs.len() - 1 {
                            !v.is_valid_at_end_pipelined()
                        } else {
                            !v.is_valid_anywhere_pipelined()
                        }
                    })
                    .map(|(_, v)| v.to_string())
                    .unwrap();
                prop_assert!(msg.starts_with(&offender));
            }
        }
    }
}
