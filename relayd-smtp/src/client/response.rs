use core::fmt::{self, Display, Formatter};

use super::error::{ClientError, Result};

/// One line of a reply: `250-text` or `250 text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` while more lines follow (`-` separator).
    pub is_last: bool,
    pub message: String,
}

/// A complete reply, with the text of every line in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, 200..=299)
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        matches!(self.code, 500..=599)
    }

    /// Parses a single reply line without its terminator.
    ///
    /// # Errors
    ///
    /// [`ClientError::MalformedReply`] unless the line starts with three
    /// digits followed by nothing, a space or a `-`.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let malformed = || ClientError::MalformedReply(format!("'{line}'"));

        let (digits, rest) = line.split_at_checked(3).ok_or_else(malformed)?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let code = digits.parse().map_err(|_| malformed())?;

        let (is_last, message) = match rest.as_bytes().first() {
            None => (true, ""),
            Some(b' ') => (true, &rest[1..]),
            Some(b'-') => (false, &rest[1..]),
            Some(_) => return Err(malformed()),
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: message.to_string(),
        })
    }
}

impl Display for Response {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} {}", self.code, self.lines.join(" / "))
    }
}
