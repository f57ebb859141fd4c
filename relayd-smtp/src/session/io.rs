use relayd_common::{
    error::SessionError, incoming, internal, status::Status, traits::fsm::FiniteStateMachine,
    tracing,
};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Event, Session};
use crate::{command::Command, error::ConnectionError, state::State};

/// Longest line accepted inside a message body.
const MAX_DATA_LINE: usize = 64 * 1024;

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// Parses one command line and advances the state machine with it.
    pub(super) fn receive_command(&mut self, line: &[u8]) {
        let command = Command::try_from(line).unwrap_or_else(|e| e);

        incoming!("{command}");

        let state = std::mem::take(&mut self.state);
        self.state = state.transition(command, &mut self.context);

        tracing::debug!("Transitioned to {}", self.state);
    }

    /// Reads the message body up to the lone `.` line, then hands the
    /// envelope to the transaction handler.
    ///
    /// Returns [`Event::ConnectionClose`] when the body was refused in a way
    /// that ends the session.
    pub(super) async fn receive_data(&mut self) -> Result<Event, SessionError> {
        let max = self.context.max_message_size;
        let mut data = Vec::new();

        loop {
            let line = match tokio::time::timeout(
                self.config.timeouts.data_block(),
                self.connection.read_line(MAX_DATA_LINE),
            )
            .await
            {
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.config.timeouts.data_block_secs,
                        "Client stalled while sending data"
                    );
                    return Err(SessionError::Timeout(self.config.timeouts.data_block_secs));
                }
                Ok(Err(ConnectionError::Closed)) => {
                    internal!(level = DEBUG, "Connection closed during DATA");
                    return Ok(Event::ConnectionClose);
                }
                Ok(Err(ConnectionError::LineTooLong(limit))) => {
                    self.send(vec![format!(
                        "{} Line exceeds {limit} bytes",
                        Status::SyntaxError
                    )])
                    .await?;
                    return Ok(Event::ConnectionClose);
                }
                Ok(Err(ConnectionError::Io(err))) => return Err(SessionError::Connection(err)),
                Ok(Ok(line)) => line,
            };

            if line == b".\r\n" || line == b".\n" {
                break;
            }

            // Undo dot-stuffing (RFC 5321 4.5.2)
            let line = line.strip_prefix(b".").unwrap_or(&line);

            if max > 0 && data.len() + line.len() > max {
                internal!(
                    level = INFO,
                    "Message exceeds maximum size of {max} bytes, closing"
                );
                self.send(vec![format!(
                    "{} Message exceeds fixed maximum message size of {max} bytes",
                    Status::ExceededStorage
                )])
                .await?;
                return Ok(Event::ConnectionClose);
            }

            data.extend_from_slice(line);
        }

        incoming!("Received {} bytes of message data", data.len());
        self.context.envelope.set_data(data);

        let reply = match self
            .handler
            .handle_message(self.peer, &self.context.envelope)
            .await
        {
            Ok(()) => format!("{} Ok: queued", Status::Ok),
            Err(err) => format!("{} Requested action aborted: {err}", Status::ActionUnavailable),
        };

        self.context.envelope.reset();
        self.state = State::ready(&self.context);
        self.send(vec![reply]).await?;

        Ok(Event::ConnectionKeepAlive)
    }
}
