use core::fmt::{self, Display};

/// SMTP service extensions advertised in the EHLO response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// RFC 3207, only offered while the connection is still plaintext.
    StartTls,

    /// RFC 1870. A limit of 0 advertises the extension without a maximum.
    Size(usize),

    /// RFC 6152. Message bodies are relayed as opaque octets.
    EightBitMime,
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::StartTls => fmt.write_str("STARTTLS"),
            Self::EightBitMime => fmt.write_str("8BITMIME"),
            Self::Size(0) => fmt.write_str("SIZE"),
            Self::Size(max) => write!(fmt, "SIZE {max}"),
        }
    }
}
