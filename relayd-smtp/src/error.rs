//! Error types for the inbound SMTP server.

use std::io;

use thiserror::Error;

/// Errors that can occur during connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O error during connection operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection was closed by peer.
    #[error("Connection closed by peer")]
    Closed,

    /// A line exceeded the permitted length.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Errors that can occur while loading the TLS identity or upgrading.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Failed to load TLS certificate.
    #[error("Failed to load TLS certificate from {path}: {reason}")]
    CertificateLoad { path: String, reason: String },

    /// Failed to load TLS private key.
    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    /// TLS handshake failed.
    #[error("TLS upgrade failed: {0}")]
    UpgradeFailed(#[from] io::Error),

    /// STARTTLS on a connection that is already encrypted.
    #[error("Connection is already using TLS")]
    AlreadyActive,

    /// Rustls library error.
    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for TlsError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

/// Specialized `Result` type for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Specialized `Result` type for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;
