use std::io;

use relayd_smtp::client::{ClientError, Response};
use thiserror::Error;

/// Errors that can occur while setting up DNS resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// The system resolver configuration could not be loaded.
    #[error("Unable to initialise DNS resolver: {0}")]
    Init(#[from] hickory_resolver::ResolveError),
}

/// Why handing a message to the next hop failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Failed to connect to {host}: {source}")]
    ConnectionFailed {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("{host} rejected the connection: {response}")]
    GreetingRejected { host: String, response: Response },

    #[error("{host} rejected HELO/EHLO: {response}")]
    HeloRejected { host: String, response: Response },

    #[error("{host} rejected sender <{sender}>: {response}")]
    SenderRejected {
        host: String,
        sender: String,
        response: Response,
    },

    #[error("{host} rejected recipient <{recipient}>: {response}")]
    RecipientRejected {
        host: String,
        recipient: String,
        response: Response,
    },

    #[error("{host} rejected message data: {response}")]
    DataRejected { host: String, response: Response },

    #[error("SMTP client error: {0}")]
    Client(#[from] ClientError),

    #[error("Timed out after {secs}s waiting for {phase}")]
    Timeout { phase: &'static str, secs: u64 },
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;

impl DeliveryError {
    /// Returns `true` if the remote server answered with a permanent (5xx) rejection.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::GreetingRejected { response, .. }
            | Self::HeloRejected { response, .. }
            | Self::SenderRejected { response, .. }
            | Self::RecipientRejected { response, .. }
            | Self::DataRejected { response, .. } => response.is_permanent_error(),
            _ => false,
        }
    }
}
