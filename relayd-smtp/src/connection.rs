use core::fmt::{self, Display, Formatter};

use relayd_common::tracing;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::{TlsAcceptor, rustls::ServerConnection, server::TlsStream};

use crate::error::{ConnectionError, ConnectionResult, TlsError, TlsResult};

/// Negotiated parameters of an upgraded connection, for logging.
#[derive(Debug, Default)]
pub struct TlsInfo {
    protocol: String,
    cipher: String,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> Self {
        Self {
            protocol: conn
                .protocol_version()
                .and_then(|version| version.as_str())
                .unwrap_or_default()
                .to_string(),
            cipher: conn
                .negotiated_cipher_suite()
                .and_then(|suite| suite.suite().as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

impl Display for TlsInfo {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} ({})", self.protocol, self.cipher)
    }
}

/// A peer connection, plaintext or upgraded.
///
/// Reads are line oriented and buffered; buffered plaintext is dropped when
/// the connection is upgraded so nothing sent before the handshake can be
/// mistaken for a command sent after it.
pub enum Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    Plain { stream: BufReader<Stream> },
    Tls { stream: Box<BufReader<TlsStream<Stream>>> },
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self::Plain {
            stream: BufReader::new(stream),
        }
    }

    /// Writes `line` followed by CRLF.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn send<S: Display + Send + Sync>(&mut self, line: &S) -> ConnectionResult<()> {
        let line = format!("{line}\r\n");

        match self {
            Self::Plain { stream } => {
                stream.write_all(line.as_bytes()).await?;
                stream.flush().await?;
            }
            Self::Tls { stream } => {
                stream.write_all(line.as_bytes()).await?;
                stream.flush().await?;
            }
        }

        Ok(())
    }

    /// Reads one line, terminator included, of at most `limit` bytes.
    ///
    /// A final line without a terminator is returned as is when the peer
    /// closes.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] when the peer closed before sending
    /// anything, [`ConnectionError::LineTooLong`] when no terminator was seen
    /// within `limit` bytes.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn read_line(&mut self, limit: usize) -> ConnectionResult<Vec<u8>> {
        let mut line = Vec::new();
        let limit_bytes = u64::try_from(limit).unwrap_or(u64::MAX);

        let read = match self {
            Self::Plain { stream } => {
                (&mut *stream)
                    .take(limit_bytes)
                    .read_until(b'\n', &mut line)
                    .await?
            }
            Self::Tls { stream } => {
                (&mut **stream)
                    .take(limit_bytes)
                    .read_until(b'\n', &mut line)
                    .await?
            }
        };

        if read == 0 {
            Err(ConnectionError::Closed)
        } else if read >= limit && !line.ends_with(b"\n") {
            Err(ConnectionError::LineTooLong(limit))
        } else {
            Ok(line)
        }
    }

    /// Performs the server side of the TLS handshake.
    ///
    /// # Errors
    ///
    /// Fails if the connection is already encrypted or the handshake fails;
    /// either way the connection is unusable afterwards.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> TlsResult<(Self, TlsInfo)> {
        tracing::debug!("Upgrading connection ...");

        match self {
            Self::Plain { stream } => {
                let stream = acceptor.accept(stream.into_inner()).await?;
                let info = TlsInfo::of(stream.get_ref().1);

                Ok((
                    Self::Tls {
                        stream: Box::new(BufReader::new(stream)),
                    },
                    info,
                ))
            }
            Self::Tls { .. } => Err(TlsError::AlreadyActive),
        }
    }
}
