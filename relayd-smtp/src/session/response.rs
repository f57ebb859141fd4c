use relayd_common::status::Status;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Event, Response, Session};
use crate::{extensions::Extension, state::State};

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// The reply to the command just processed.
    ///
    /// A reply recorded by the state machine wins; otherwise the new state
    /// decides.
    pub(super) fn response(&mut self) -> Response {
        if let Some((status, message)) = self.context.response.take() {
            return (
                Some(vec![format!("{status} {message}")]),
                Event::ConnectionKeepAlive,
            );
        }

        match &self.state {
            State::Helo { id } => (
                Some(vec![format!("{} {} greets {id}", Status::Ok, self.config.banner)]),
                Event::ConnectionKeepAlive,
            ),
            State::Ehlo { id } => (Some(self.ehlo_response(id)), Event::ConnectionKeepAlive),
            State::StartTls => (
                Some(vec![format!("{} Ready to begin TLS", Status::ServiceReady)]),
                Event::ConnectionKeepAlive,
            ),
            State::Data => (
                Some(vec![format!(
                    "{} End data with <CR><LF>.<CR><LF>",
                    Status::StartMailInput
                )]),
                Event::ConnectionKeepAlive,
            ),
            State::Quit => (
                Some(vec![format!("{} Bye", Status::GoodBye)]),
                Event::ConnectionClose,
            ),
            State::Connect | State::MailFrom | State::RcptTo => (None, Event::ConnectionKeepAlive),
        }
    }

    fn extensions(&self) -> Vec<Extension> {
        let mut extensions = vec![
            Extension::Size(self.context.max_message_size),
            Extension::EightBitMime,
        ];

        if self.context.tls_available && !self.context.tls {
            extensions.push(Extension::StartTls);
        }

        extensions
    }

    /// `250-` on every line but the last, which uses `250 `.
    fn ehlo_response(&self, id: &str) -> Vec<String> {
        let lines = std::iter::once(format!("{} greets {id}", self.config.banner))
            .chain(self.extensions().iter().map(ToString::to_string))
            .collect::<Vec<_>>();
        let last = lines.len() - 1;

        lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| {
                let separator = if i == last { ' ' } else { '-' };
                format!("{}{separator}{line}", Status::Ok)
            })
            .collect()
    }
}
