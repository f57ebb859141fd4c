use core::fmt::{self, Display, Formatter};

/// SMTP reply codes used by the relay, in both directions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    HelpMessage,
    ServiceReady,
    GoodBye,
    Ok,
    StartMailInput,
    Unavailable,
    ActionUnavailable,
    InsufficientStorage,
    SyntaxError,
    ParameterSyntax,
    NotImplemented,
    InvalidCommandSequence,
    StartTlsRequired,
    Error,
    ExceededStorage,
    TransactionFailed,
    Unknown(u32),
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            214 => Self::HelpMessage,
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            250 => Self::Ok,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            451 => Self::ActionUnavailable,
            452 => Self::InsufficientStorage,
            500 => Self::SyntaxError,
            501 => Self::ParameterSyntax,
            502 => Self::NotImplemented,
            503 => Self::InvalidCommandSequence,
            530 => Self::StartTlsRequired,
            550 => Self::Error,
            552 => Self::ExceededStorage,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::HelpMessage => 214,
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::ActionUnavailable => 451,
            Status::InsufficientStorage => 452,
            Status::SyntaxError => 500,
            Status::ParameterSyntax => 501,
            Status::NotImplemented => 502,
            Status::InvalidCommandSequence => 503,
            Status::StartTlsRequired => 530,
            Status::Error => 550,
            Status::ExceededStorage => 552,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}
