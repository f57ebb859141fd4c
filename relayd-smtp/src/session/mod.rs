use std::{net::SocketAddr, sync::Arc, time::Instant};

use relayd_common::{
    Signal, config::ServerTimeouts, error::SessionError, internal, outgoing, status::Status,
    tracing,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
};
use tokio_rustls::TlsAcceptor;

use crate::{
    connection::Connection,
    error::ConnectionError,
    state::{DEFAULT_MAX_RECIPIENTS, SessionState, State},
    transaction_handler::SmtpTransactionHandler,
};

mod io;
mod response;

/// Longest command line accepted, CRLF included (RFC 5321 4.5.3.1.4).
const MAX_COMMAND_LINE: usize = 512;

/// Default limit on message size, 10 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(PartialEq, Eq, Debug)]
pub enum Event {
    ConnectionClose,
    ConnectionKeepAlive,
}

pub type Response = (Option<Vec<String>>, Event);

/// Settings shared by every session a listener spawns.
#[derive(Clone)]
pub struct SessionConfig {
    pub banner: String,
    pub tls: Option<TlsAcceptor>,
    pub force_tls: bool,
    pub max_message_size: usize,
    pub max_recipients: usize,
    pub timeouts: ServerTimeouts,
}

impl SessionConfig {
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

impl core::fmt::Debug for SessionConfig {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        fmt.debug_struct("SessionConfig")
            .field("banner", &self.banner)
            .field("tls", &self.tls.is_some())
            .field("force_tls", &self.force_tls)
            .field("max_message_size", &self.max_message_size)
            .field("max_recipients", &self.max_recipients)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Builder for `SessionConfig`
pub struct SessionConfigBuilder {
    banner: String,
    tls: Option<TlsAcceptor>,
    force_tls: bool,
    max_message_size: usize,
    max_recipients: usize,
    timeouts: ServerTimeouts,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            banner: String::new(),
            tls: None,
            force_tls: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_recipients: DEFAULT_MAX_RECIPIENTS,
            timeouts: ServerTimeouts::default(),
        }
    }
}

impl SessionConfigBuilder {
    /// Set the hostname announced in the greeting and EHLO reply
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    /// Offer STARTTLS using this acceptor
    #[must_use]
    pub fn with_tls(mut self, tls: Option<TlsAcceptor>) -> Self {
        self.tls = tls;
        self
    }

    /// Refuse MAIL FROM until the connection is encrypted
    #[must_use]
    pub const fn with_force_tls(mut self, force_tls: bool) -> Self {
        self.force_tls = force_tls;
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    #[must_use]
    pub const fn with_max_recipients(mut self, max_recipients: usize) -> Self {
        self.max_recipients = max_recipients;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            banner: if self.banner.is_empty() {
                "localhost".to_string()
            } else {
                self.banner
            },
            tls: self.tls,
            force_tls: self.force_tls,
            max_message_size: self.max_message_size,
            max_recipients: self.max_recipients,
            timeouts: self.timeouts,
        }
    }
}

pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    peer: SocketAddr,
    pub(super) connection: Connection<Stream>,
    pub(super) state: State,
    pub(super) context: SessionState,
    pub(super) config: Arc<SessionConfig>,
    pub(super) handler: Arc<dyn SmtpTransactionHandler>,
    start_time: Instant,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn create(
        stream: Stream,
        peer: SocketAddr,
        config: Arc<SessionConfig>,
        handler: Arc<dyn SmtpTransactionHandler>,
    ) -> Self {
        let context = SessionState {
            tls_available: config.tls.is_some(),
            force_tls: config.force_tls,
            max_message_size: config.max_message_size,
            max_recipients: config.max_recipients,
            ..SessionState::default()
        };

        Self {
            peer,
            connection: Connection::new(stream),
            state: State::default(),
            context,
            config,
            handler,
            start_time: Instant::now(),
        }
    }

    pub(super) async fn send(&mut self, lines: Vec<String>) -> Result<(), SessionError> {
        for line in lines {
            outgoing!("{line}");

            self.connection.send(&line).await.map_err(|err| {
                internal!(level = ERROR, "{err}");
                SessionError::Protocol(format!("Failed to send response: {err}"))
            })?;
        }

        Ok(())
    }

    /// Drives the conversation until the peer quits, the connection drops,
    /// a timeout fires or shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] for I/O failures, timeouts and failed TLS
    /// handshakes. A peer simply going away is not an error.
    #[tracing::instrument(level = "debug", skip_all, fields(peer = %self.peer), err)]
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!("Connected");

        self.send(vec![format!(
            "{} {} ESMTP relayd",
            Status::ServiceReady,
            self.config.banner
        )])
        .await?;

        let result = loop {
            if self.start_time.elapsed() >= self.config.timeouts.connection() {
                tracing::warn!(
                    peer = %self.peer,
                    max_secs = self.config.timeouts.connection_secs,
                    "Connection exceeded maximum lifetime, closing"
                );
                break Err(SessionError::Timeout(self.config.timeouts.connection_secs));
            }

            let line = tokio::select! {
                _ = shutdown.recv() => {
                    internal!(level = INFO, "Shutdown received, closing session");
                    break self
                        .send(vec![format!("{} Server shutting down", Status::Unavailable)])
                        .await;
                }

                line = tokio::time::timeout(
                    self.config.timeouts.command(),
                    self.connection.read_line(MAX_COMMAND_LINE),
                ) => line,
            };

            let line = match line {
                Err(_) => {
                    tracing::warn!(
                        peer = %self.peer,
                        state = %self.state,
                        timeout_secs = self.config.timeouts.command_secs,
                        "Client connection timed out"
                    );
                    break Err(SessionError::Timeout(self.config.timeouts.command_secs));
                }
                Ok(Err(ConnectionError::Closed)) => break Ok(()),
                Ok(Err(ConnectionError::LineTooLong(limit))) => {
                    self.send(vec![format!(
                        "{} Line exceeds {limit} bytes",
                        Status::SyntaxError
                    )])
                    .await?;
                    break Ok(());
                }
                Ok(Err(ConnectionError::Io(err))) => break Err(SessionError::Connection(err)),
                Ok(Ok(line)) => line,
            };

            self.receive_command(&line);

            let (response, event) = self.response();
            self.send(response.unwrap_or_default()).await?;

            if event == Event::ConnectionClose {
                break Ok(());
            }

            match self.state {
                State::StartTls => {
                    self = self.upgrade().await?;
                }
                State::Data => {
                    if self.receive_data().await? == Event::ConnectionClose {
                        break Ok(());
                    }
                }
                _ => {}
            }
        };

        internal!("Connection closed");

        result
    }

    /// Replaces the plaintext connection with an encrypted one.
    async fn upgrade(mut self) -> Result<Self, SessionError> {
        let Some(acceptor) = self.config.tls.clone() else {
            return Err(SessionError::Tls("STARTTLS accepted without an acceptor".to_string()));
        };

        let (connection, info) = self
            .connection
            .upgrade(&acceptor)
            .await
            .map_err(|err| SessionError::Tls(err.to_string()))?;

        internal!(level = DEBUG, "Connection successfully upgraded with {info}");

        self.connection = connection;
        self.context.tls_established();
        self.state = State::default();

        Ok(self)
    }
}
