//! Outbound SMTP delivery of a single message to a single recipient.
//!
//! Every delivery opens a fresh plain-text connection. The dialogue is:
//! greeting, EHLO (falling back to HELO), MAIL FROM, RCPT TO, DATA, the
//! dot-stuffed body and finally QUIT.

use std::time::Duration;

use async_trait::async_trait;
use relayd_common::{config::ClientTimeouts, tracing};
use relayd_smtp::client::{ClientError, Response, SmtpClient};

use crate::error::{DeliveryError, DeliveryResult};

/// Standard SMTP relay port.
pub const DEFAULT_PORT: u16 = 25;

/// Hands a message to a mail exchange.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Delivers `body` from `sender` to `recipient` through `host`.
    ///
    /// # Errors
    ///
    /// Any failure before the message is accepted by `host`.
    async fn deliver(
        &self,
        host: &str,
        sender: &str,
        recipient: &str,
        body: &[u8],
    ) -> DeliveryResult<()>;
}

/// [`Deliver`] speaking SMTP over TCP.
#[derive(Debug, Clone)]
pub struct SmtpDelivery {
    helo_name: String,
    port: u16,
    timeouts: ClientTimeouts,
}

impl SmtpDelivery {
    /// `helo_name` is announced in EHLO/HELO.
    #[must_use]
    pub fn new(helo_name: impl Into<String>) -> Self {
        Self {
            helo_name: helo_name.into(),
            port: DEFAULT_PORT,
            timeouts: ClientTimeouts::default(),
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    async fn connect(&self, host: &str) -> DeliveryResult<SmtpClient> {
        let limit = self.timeouts.connect();
        let connected = tokio::time::timeout(limit, SmtpClient::connect((host, self.port)))
            .await
            .map_err(|_| DeliveryError::Timeout {
                phase: "connect",
                secs: limit.as_secs(),
            })?;

        let mut client = connected.map_err(|err| match err {
            ClientError::Io(source) => DeliveryError::ConnectionFailed {
                host: host.to_string(),
                source,
            },
            other => DeliveryError::Client(other),
        })?;

        let greeting = step("greeting", self.timeouts.command(), client.read_greeting()).await?;
        if greeting.code != 220 {
            return Err(DeliveryError::GreetingRejected {
                host: host.to_string(),
                response: greeting,
            });
        }

        Ok(client)
    }

    async fn greet(&self, client: &mut SmtpClient, host: &str) -> DeliveryResult<()> {
        let limit = self.timeouts.command();

        let ehlo = step("EHLO", limit, client.ehlo(&self.helo_name)).await?;
        if ehlo.is_success() {
            return Ok(());
        }

        tracing::debug!("{host} rejected EHLO ({ehlo}), falling back to HELO");
        let helo = step("HELO", limit, client.helo(&self.helo_name)).await?;
        if helo.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::HeloRejected {
                host: host.to_string(),
                response: helo,
            })
        }
    }
}

#[async_trait]
impl Deliver for SmtpDelivery {
    #[tracing::instrument(level = "debug", skip(self, body), fields(port = self.port, size = body.len()), err)]
    async fn deliver(
        &self,
        host: &str,
        sender: &str,
        recipient: &str,
        body: &[u8],
    ) -> DeliveryResult<()> {
        let command = self.timeouts.command();
        let mut client = self.connect(host).await?;

        self.greet(&mut client, host).await?;

        let response = step("MAIL FROM", command, client.mail_from(sender)).await?;
        if !response.is_success() {
            return Err(DeliveryError::SenderRejected {
                host: host.to_string(),
                sender: sender.to_string(),
                response,
            });
        }

        let response = step("RCPT TO", command, client.rcpt_to(recipient)).await?;
        if !response.is_success() {
            return Err(DeliveryError::RecipientRejected {
                host: host.to_string(),
                recipient: recipient.to_string(),
                response,
            });
        }

        let response = step("DATA", command, client.data()).await?;
        if response.code != 354 {
            return Err(DeliveryError::DataRejected {
                host: host.to_string(),
                response,
            });
        }

        let response = step("message data", self.timeouts.data(), client.send_data(body)).await?;
        if !response.is_success() {
            return Err(DeliveryError::DataRejected {
                host: host.to_string(),
                response,
            });
        }

        // The message is already accepted, so QUIT problems are not failures
        match tokio::time::timeout(self.timeouts.quit(), client.quit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::warn!("QUIT to {host} failed after delivery: {err}"),
            Err(_) => tracing::warn!(
                "QUIT to {host} timed out after {}s following delivery",
                self.timeouts.quit_secs
            ),
        }

        Ok(())
    }
}

/// Runs one client step under `limit`.
async fn step<F>(phase: &'static str, limit: Duration, fut: F) -> DeliveryResult<Response>
where
    F: Future<Output = Result<Response, ClientError>> + Send,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DeliveryError::Timeout {
            phase,
            secs: limit.as_secs(),
        })?
        .map_err(DeliveryError::from)
}
