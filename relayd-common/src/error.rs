use std::io;

use thiserror::Error;

/// Why an inbound session ended early.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    /// The peer stayed silent, or connected, for longer than allowed.
    #[error("Session timed out after {0} seconds")]
    Timeout(u64),
}

impl SessionError {
    /// Whether the peer, rather than this server, is to blame.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Timeout(_) | Self::Tls(_))
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),
}
