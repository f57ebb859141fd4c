//! The seam between the SMTP front end and whatever consumes messages.

use core::fmt::Display;
use std::net::SocketAddr;

use async_trait::async_trait;
use relayd_common::envelope::Envelope;
use thiserror::Error;

/// Why a complete message could not be taken over.
///
/// The reason is shown to the peer after `451 Requested action aborted:`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct TransactionError {
    reason: String,
}

impl TransactionError {
    pub fn new(reason: impl Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Receives every message a session accepts.
///
/// Called once per completed DATA phase with the full envelope. Returning
/// an error makes the session answer with a transient failure, so the
/// sending server keeps the message and tries again later.
#[async_trait]
pub trait SmtpTransactionHandler: Send + Sync {
    /// # Errors
    ///
    /// A [`TransactionError`] whose reason is reported to the peer.
    async fn handle_message(
        &self,
        peer: SocketAddr,
        envelope: &Envelope,
    ) -> Result<(), TransactionError>;
}

#[cfg(test)]
mod test {
    use super::TransactionError;

    #[test]
    fn reason_is_display() {
        let err = TransactionError::new(format_args!("relay to {} failed", "mx.b.com"));
        assert_eq!(err.to_string(), "relay to mx.b.com failed");
        assert_eq!(err.reason(), "relay to mx.b.com failed");
    }
}
