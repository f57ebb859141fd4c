use core::fmt::{self, Display, Formatter};

/// A single `source -> destination` forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasRecord {
    source: String,
    destination: String,
}

impl AliasRecord {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// The address as seen by the relay
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The address mail is forwarded to
    #[inline]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The mail domain of the destination, everything after the first `@`.
    ///
    /// Returns `None` when the destination has no `@` or nothing follows it.
    pub fn domain(&self) -> Option<&str> {
        self.destination
            .split_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }

    /// Parses one listing line of the form `<source><ws><destination>`.
    ///
    /// The separator is the first space or tab; a line without one, or one
    /// that starts with whitespace, carries no record.
    fn parse_line(line: &str) -> Option<Self> {
        let separator = line.find([' ', '\t']).filter(|&ix| ix > 0)?;

        let source = line[..separator].trim();
        let destination = line[separator + 1..].trim();

        if destination.is_empty() {
            return None;
        }

        Some(Self::new(source, destination))
    }
}

impl Display for AliasRecord {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} -> {}", self.source, self.destination)
    }
}

/// Parses a full alias listing, one record per line, in encounter order.
///
/// Lines that do not describe a record are skipped rather than treated as
/// errors, so a partially malformed listing still yields its good lines.
pub fn parse_listing(body: &str) -> Vec<AliasRecord> {
    body.split('\n').filter_map(AliasRecord::parse_line).collect()
}
