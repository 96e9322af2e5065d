//! Parsing of single protocol lines: verb/argument split, line
//! validation, address extraction and DATA phase dot-unescaping.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use thiserror::Error;

/// Maximum accepted size of a command line, CRLF included.
pub const MAX_COMMAND_LINE: usize = 2048;

/// Maximum accepted size of a single DATA line, CRLF included.
pub const MAX_DATA_LINE: usize = 16384;

static MAIL_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)FROM:\s*<([^>]*)>").expect("valid MAIL FROM pattern")
});

static RCPT_TO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)TO:\s*<([^>]+)>").expect("valid RCPT TO pattern"));

/// Reasons a raw command line is refused before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("line doesn't end in \\r\\n")]
    MissingCrlf,

    #[error("line contains a NUL byte")]
    Nul,

    #[error("line too long")]
    TooLong,

    #[error("unexpected argument")]
    UnexpectedArgument,
}

/// An email address extracted from `FROM:<...>` or `TO:<...>` syntax.
///
/// No normalization is applied, equality is an exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailAddress(String);

impl MailAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn email(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single raw line received while reading commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    raw: String,
}

impl CommandLine {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Checks the line before dispatch: CRLF termination, no NUL bytes,
    /// and no argument on verbs defined without one. The length bound
    /// applies to the raw bytes and is enforced by the reader.
    pub fn check_valid(&self) -> Result<(), LineError> {
        if !self.raw.ends_with("\r\n") {
            return Err(LineError::MissingCrlf);
        }
        if self.raw.contains('\0') {
            return Err(LineError::Nul);
        }
        match self.verb().as_str() {
            "RSET" | "DATA" | "QUIT" if !self.arg().is_empty() => {
                Err(LineError::UnexpectedArgument)
            }
            _ => Ok(()),
        }
    }

    /// The leading token of the line, uppercased.
    pub fn verb(&self) -> String {
        let content = self.content();
        match content.split_once(' ') {
            Some((verb, _)) => verb.to_ascii_uppercase(),
            None => content.trim_end().to_ascii_uppercase(),
        }
    }

    /// Everything after the verb, surrounding whitespace removed.
    pub fn arg(&self) -> &str {
        self.content()
            .split_once(' ')
            .map(|(_, arg)| arg.trim())
            .unwrap_or_default()
    }

    fn content(&self) -> &str {
        self.raw
            .strip_suffix("\r\n")
            .or_else(|| self.raw.strip_suffix('\n'))
            .unwrap_or(&self.raw)
    }
}

/// Extracts the sender from a MAIL argument such as `FROM:<alice@example.com>`.
///
/// The null reverse-path `FROM:<>` yields an empty address.
pub fn parse_mail_from(arg: &str) -> Option<MailAddress> {
    MAIL_FROM_RE
        .captures(arg)
        .and_then(|captures| captures.get(1))
        .map(|m| MailAddress::new(m.as_str()))
}

/// Extracts the recipient from a RCPT argument such as `TO:<bob@example.com>`.
pub fn parse_rcpt_to(arg: &str) -> Option<MailAddress> {
    RCPT_TO_RE
        .captures(arg)
        .and_then(|captures| captures.get(1))
        .map(|m| MailAddress::new(m.as_str()))
}

/// Returns `true` for the line that ends the DATA phase (`.` followed by CRLF).
pub fn is_data_terminator(line: &[u8]) -> bool {
    line == b".\r\n"
}

/// Removes the transparency dot a sender adds in front of body lines
/// starting with `.`; lines not starting with a dot are returned as is.
pub fn unescape_dot(line: &[u8]) -> &[u8] {
    line.strip_prefix(b".").unwrap_or(line)
}
