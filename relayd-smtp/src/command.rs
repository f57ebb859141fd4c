use core::fmt::{self, Display, Formatter};

use ahash::AHashMap;

/// ESMTP parameters given after the reverse path of MAIL FROM (RFC 5321 3.3).
///
/// Keys are stored upper-cased; flag parameters (e.g. `SMTPUTF8`) carry no value.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MailParameters {
    params: AHashMap<String, Option<String>>,
}

impl MailParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses whitespace separated `KEY[=VALUE]` pairs.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed parameter.
    pub fn from_params_str(params: &str) -> Result<Self, String> {
        let mut parsed = Self::new();

        for param in params.split_ascii_whitespace() {
            match param.split_once('=') {
                Some(("", _)) => return Err(format!("Malformed parameter '{param}'")),
                Some((_, "")) => return Err(format!("Parameter '{param}' is missing a value")),
                Some((key, value)) => parsed.insert(key, value),
                None => parsed.insert_flag(param),
            }
        }

        if let Some(size) = parsed.get("SIZE")
            && size.parse::<usize>().is_err()
        {
            return Err(format!("Invalid SIZE value '{size}'"));
        }

        Ok(parsed)
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.params
            .insert(key.to_ascii_uppercase(), Some(value.to_string()));
    }

    pub fn insert_flag(&mut self, key: &str) {
        self.params.insert(key.to_ascii_uppercase(), None);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .get(&key.to_ascii_uppercase())
            .and_then(Option::as_deref)
    }

    /// The declared message size (RFC 1870), if any
    pub fn size(&self) -> Option<usize> {
        self.get("SIZE").and_then(|size| size.parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Display for MailParameters {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = self.params.keys().collect::<Vec<_>>();
        keys.sort();

        for (i, key) in keys.into_iter().enumerate() {
            if i > 0 {
                fmt.write_str(" ")?;
            }
            match &self.params[key] {
                Some(value) => write!(fmt, "{key}={value}")?,
                None => fmt.write_str(key)?,
            }
        }

        Ok(())
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl HeloVariant {
    pub fn id(&self) -> &str {
        match self {
            Self::Ehlo(id) | Self::Helo(id) => id,
        }
    }
}

impl Display for HeloVariant {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ehlo(id) => write!(fmt, "EHLO {id}"),
            Self::Helo(id) => write!(fmt, "HELO {id}"),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// The reverse path, empty for the null sender
    MailFrom(String, MailParameters),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Help,
    Quit,
    StartTls,
    /// A known verb with unusable arguments
    Invalid(String),
    /// Anything we do not recognise at all
    Unknown(String),
}

/// Splits `<path> rest` at the closing bracket, honouring quoted local
/// parts, and returns the path verbatim along with whatever follows.
///
/// An RFC 5321 source route (`<@a,@b:user@c>`) is dropped. Nothing else is
/// validated; an empty path is only meaningful for MAIL FROM, so callers
/// decide whether to accept it.
fn split_path(args: &str) -> Result<(String, &str), String> {
    let ill_formatted = || format!("Ill-formatted path: {args}");

    let inner = args.strip_prefix('<').ok_or_else(ill_formatted)?;

    let mut quoted = false;
    let mut escaped = false;
    let close = inner
        .char_indices()
        .find_map(|(ix, c)| {
            match c {
                _ if escaped => escaped = false,
                '\\' if quoted => escaped = true,
                '"' => quoted = !quoted,
                '>' if !quoted => return Some(ix),
                _ => {}
            }
            None
        })
        .ok_or_else(ill_formatted)?;

    let path = &inner[..close];
    let rest = &inner[close + 1..];

    let path = if path.starts_with('@') {
        path.split_once(':').map_or(path, |(_, mailbox)| mailbox)
    } else {
        path
    };

    Ok((path.to_string(), rest.trim()))
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(variant) => write!(fmt, "{variant}"),
            Self::MailFrom(from, params) if params.is_empty() => write!(fmt, "MAIL FROM:<{from}>"),
            Self::MailFrom(from, params) => write!(fmt, "MAIL FROM:<{from}> {params}"),
            Self::RcptTo(to) => write!(fmt, "RCPT TO:<{to}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Help => fmt.write_str("HELP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTls => fmt.write_str("STARTTLS"),
            Self::Invalid(reason) => write!(fmt, "Invalid({reason})"),
            Self::Unknown(command) => write!(fmt, "Unknown({command})"),
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();
        let (verb, args) = trimmed
            .find(|c: char| c.is_ascii_whitespace())
            .map_or((trimmed, ""), |ix| trimmed.split_at(ix));

        match verb.to_ascii_uppercase().as_str() {
            "HELO" | "EHLO" => {
                let id = args.trim();
                if id.is_empty() {
                    return Err(Self::Invalid(format!("Expected hostname in {trimmed}")));
                }

                if verb.eq_ignore_ascii_case("EHLO") {
                    Ok(Self::Helo(HeloVariant::Ehlo(id.to_string())))
                } else {
                    Ok(Self::Helo(HeloVariant::Helo(id.to_string())))
                }
            }
            "MAIL" => {
                let rest = strip_keyword(args, "FROM:")
                    .ok_or_else(|| Self::Invalid("Expected MAIL FROM:<address>".to_string()))?;

                let (sender, params) = split_path(rest).map_err(Self::Invalid)?;
                let params = MailParameters::from_params_str(params).map_err(Self::Invalid)?;

                Ok(Self::MailFrom(sender, params))
            }
            "RCPT" => {
                let rest = strip_keyword(args, "TO:")
                    .ok_or_else(|| Self::Invalid("Expected RCPT TO:<address>".to_string()))?;

                // Any RCPT parameters are accepted and ignored
                match split_path(rest).map(|(path, _)| path) {
                    Ok(recipient) if recipient.is_empty() => {
                        Err(Self::Invalid("Recipient address required".to_string()))
                    }
                    Ok(recipient) => Ok(Self::RcptTo(recipient)),
                    Err(reason) => Err(Self::Invalid(reason)),
                }
            }
            "DATA" if args.is_empty() => Ok(Self::Data),
            "RSET" if args.is_empty() => Ok(Self::Rset),
            "QUIT" if args.is_empty() => Ok(Self::Quit),
            "STARTTLS" if args.is_empty() => Ok(Self::StartTls),
            "NOOP" => Ok(Self::Noop),
            "HELP" => Ok(Self::Help),
            "DATA" | "RSET" | "QUIT" | "STARTTLS" => {
                Err(Self::Invalid(format!("{verb} takes no arguments")))
            }
            _ => Err(Self::Unknown(trimmed.to_string())),
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Unknown("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}

/// Matches `keyword` case-insensitively at the start of `args`, returning
/// what follows it with surrounding whitespace removed.
fn strip_keyword<'a>(args: &'a str, keyword: &str) -> Option<&'a str> {
    let args = args.trim_start();
    let head = args.get(..keyword.len())?;

    head.eq_ignore_ascii_case(keyword)
        .then(|| args[keyword.len()..].trim())
}
