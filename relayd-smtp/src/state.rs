use core::fmt::{self, Display, Formatter};
use std::borrow::Cow;

use relayd_common::{envelope::Envelope, status::Status, traits::fsm::FiniteStateMachine};

use crate::command::{Command, HeloVariant};

/// Recipients accepted per transaction before answering 452.
pub const DEFAULT_MAX_RECIPIENTS: usize = 100;

/// Protocol state the state machine reads and writes while transitioning.
///
/// Commands that are refused leave the [`State`] untouched and record the
/// reply in `response`; the session sends whatever is recorded there in
/// preference to the state's default reply.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Client identifier from HELO/EHLO
    pub id: String,
    pub extended: bool,
    /// Whether the connection has been upgraded with STARTTLS
    pub tls: bool,
    pub tls_available: bool,
    pub force_tls: bool,
    /// Largest accepted message in bytes, 0 for unlimited
    pub max_message_size: usize,
    pub max_recipients: usize,
    pub envelope: Envelope,
    pub response: Option<(Status, Cow<'static, str>)>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            id: String::new(),
            extended: false,
            tls: false,
            tls_available: false,
            force_tls: false,
            max_message_size: 0,
            max_recipients: DEFAULT_MAX_RECIPIENTS,
            envelope: Envelope::default(),
            response: None,
        }
    }
}

impl SessionState {
    fn respond(&mut self, status: Status, message: impl Into<Cow<'static, str>>) {
        self.response = Some((status, message.into()));
    }

    /// Forgets everything the peer said before the TLS handshake (RFC 3207 4.2).
    pub fn tls_established(&mut self) {
        self.tls = true;
        self.id.clear();
        self.extended = false;
        self.envelope.reset();
        self.response = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Connect,
    Helo {
        id: String,
    },
    Ehlo {
        id: String,
    },
    MailFrom,
    RcptTo,
    Data,
    StartTls,
    Quit,
}

impl Display for State {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Connect => "Connect",
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::MailFrom => "MAIL",
            Self::RcptTo => "RCPT",
            Self::Data => "DATA",
            Self::StartTls => "STARTTLS",
            Self::Quit => "QUIT",
        })
    }
}

impl State {
    /// The state a greeted client returns to once a transaction ends.
    pub fn ready(ctx: &SessionState) -> Self {
        if ctx.id.is_empty() {
            Self::Connect
        } else if ctx.extended {
            Self::Ehlo { id: ctx.id.clone() }
        } else {
            Self::Helo { id: ctx.id.clone() }
        }
    }

    fn greeted(&self) -> bool {
        matches!(self, Self::Helo { .. } | Self::Ehlo { .. })
    }

    fn in_transaction(&self) -> bool {
        matches!(self, Self::MailFrom | Self::RcptTo)
    }

    fn mail_from(self, sender: String, size: Option<usize>, ctx: &mut SessionState) -> Self {
        if ctx.force_tls && !ctx.tls {
            ctx.respond(Status::StartTlsRequired, "Must issue a STARTTLS command first");
            return self;
        }

        if let Some(size) = size
            && ctx.max_message_size > 0
            && size > ctx.max_message_size
        {
            ctx.respond(
                Status::ExceededStorage,
                format!(
                    "Declared message size {size} exceeds maximum of {} bytes",
                    ctx.max_message_size
                ),
            );
            return self;
        }

        ctx.envelope.reset();
        ctx.envelope.set_sender(sender);
        ctx.respond(Status::Ok, "Ok");
        Self::MailFrom
    }

    fn rcpt_to(self, recipient: String, ctx: &mut SessionState) -> Self {
        if ctx.envelope.recipients().len() >= ctx.max_recipients {
            ctx.respond(Status::InsufficientStorage, "Too many recipients");
            return self;
        }

        ctx.envelope.add_recipient(recipient);
        ctx.respond(Status::Ok, "Ok");
        Self::RcptTo
    }

    fn start_tls(self, ctx: &mut SessionState) -> Self {
        if ctx.tls {
            ctx.respond(Status::InvalidCommandSequence, "TLS already active");
            self
        } else if !ctx.tls_available {
            ctx.respond(Status::NotImplemented, "STARTTLS not available");
            self
        } else if self.in_transaction() {
            ctx.respond(
                Status::InvalidCommandSequence,
                "STARTTLS not allowed during mail transaction",
            );
            self
        } else if !self.greeted() {
            ctx.respond(Status::InvalidCommandSequence, "Send EHLO first");
            self
        } else {
            Self::StartTls
        }
    }
}

impl FiniteStateMachine for State {
    type Input = Command;
    type Context = SessionState;

    fn transition(self, command: Command, ctx: &mut SessionState) -> Self {
        ctx.response = None;

        match (self, command) {
            // The body is read by the session, never parsed as commands
            (state @ Self::Data, _) => state,

            (_, Command::Quit) => Self::Quit,

            (_, Command::Helo(variant)) => {
                ctx.envelope.reset();
                ctx.id = variant.id().to_string();

                match variant {
                    HeloVariant::Ehlo(id) => {
                        ctx.extended = true;
                        Self::Ehlo { id }
                    }
                    HeloVariant::Helo(id) => {
                        ctx.extended = false;
                        Self::Helo { id }
                    }
                }
            }

            (state, Command::MailFrom(sender, params)) => {
                if state.in_transaction() {
                    ctx.respond(Status::InvalidCommandSequence, "Sender already specified");
                    state
                } else if state.greeted() {
                    state.mail_from(sender, params.size(), ctx)
                } else {
                    ctx.respond(Status::InvalidCommandSequence, "Send HELO/EHLO first");
                    state
                }
            }

            (state, Command::RcptTo(recipient)) => {
                if state.in_transaction() {
                    state.rcpt_to(recipient, ctx)
                } else {
                    ctx.respond(Status::InvalidCommandSequence, "Need MAIL before RCPT");
                    state
                }
            }

            (Self::RcptTo, Command::Data) => Self::Data,
            (state, Command::Data) => {
                let reason = if matches!(state, Self::MailFrom) {
                    "Need RCPT before DATA"
                } else {
                    "Need MAIL before DATA"
                };
                ctx.respond(Status::InvalidCommandSequence, reason);
                state
            }

            (_, Command::Rset) => {
                ctx.envelope.reset();
                ctx.respond(Status::Ok, "Ok");
                Self::ready(ctx)
            }

            (state, Command::Noop) => {
                ctx.respond(Status::Ok, "Ok");
                state
            }

            (state, Command::Help) => {
                ctx.respond(
                    Status::HelpMessage,
                    "Commands: HELO EHLO MAIL RCPT DATA RSET NOOP HELP QUIT STARTTLS",
                );
                state
            }

            (state, Command::StartTls) => state.start_tls(ctx),

            (state, Command::Invalid(reason)) => {
                ctx.respond(Status::ParameterSyntax, reason);
                state
            }

            (state, Command::Unknown(_)) => {
                ctx.respond(Status::SyntaxError, "Command not recognized");
                state
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use relayd_common::{status::Status, traits::fsm::FiniteStateMachine};

    use super::{SessionState, State};
    use crate::command::Command;

    fn drive(state: State, ctx: &mut SessionState, lines: &[&str]) -> State {
        lines.iter().fold(state, |state, line| {
            state.transition(Command::try_from(*line).unwrap_or_else(|e| e), ctx)
        })
    }

    fn status(ctx: &SessionState) -> Option<Status> {
        ctx.response.as_ref().map(|(status, _)| *status)
    }

    #[test]
    fn full_transaction() {
        let mut ctx = SessionState::default();
        let state = drive(
            State::default(),
            &mut ctx,
            &[
                "EHLO client",
                "MAIL FROM:<alice@a.com>",
                "RCPT TO:<bob@a.com>",
                "RCPT TO:<carol@a.com>",
                "DATA",
            ],
        );

        assert_eq!(state, State::Data);
        assert_eq!(ctx.envelope.sender(), "alice@a.com");
        assert_eq!(ctx.envelope.recipients(), ["bob@a.com", "carol@a.com"]);
        assert!(ctx.extended);
    }

    #[test]
    fn out_of_sequence_commands() {
        let mut ctx = SessionState::default();

        let state = drive(State::default(), &mut ctx, &["MAIL FROM:<a@a.com>"]);
        assert_eq!(state, State::Connect);
        assert_eq!(status(&ctx), Some(Status::InvalidCommandSequence));

        let state = drive(state, &mut ctx, &["HELO client", "RCPT TO:<b@a.com>"]);
        assert_eq!(state, State::Helo { id: "client".to_string() });
        assert_eq!(status(&ctx), Some(Status::InvalidCommandSequence));

        let state = drive(state, &mut ctx, &["MAIL FROM:<a@a.com>", "DATA"]);
        assert_eq!(state, State::MailFrom);
        assert_eq!(status(&ctx), Some(Status::InvalidCommandSequence));

        let state = drive(state, &mut ctx, &["MAIL FROM:<other@a.com>"]);
        assert_eq!(state, State::MailFrom);
        assert_eq!(ctx.envelope.sender(), "a@a.com");
    }

    #[test]
    fn syntax_errors_keep_state() {
        let mut ctx = SessionState::default();
        let state = drive(State::default(), &mut ctx, &["EHLO client", "VRFY bob"]);
        assert_eq!(status(&ctx), Some(Status::SyntaxError));

        let state = drive(state, &mut ctx, &["MAIL FROM:alice"]);
        assert_eq!(status(&ctx), Some(Status::ParameterSyntax));
        assert_eq!(state, State::Ehlo { id: "client".to_string() });
    }

    #[test]
    fn rset_returns_to_greeted_state() {
        let mut ctx = SessionState::default();
        let state = drive(
            State::default(),
            &mut ctx,
            &["EHLO client", "MAIL FROM:<a@a.com>", "RCPT TO:<b@a.com>", "RSET"],
        );

        assert_eq!(state, State::Ehlo { id: "client".to_string() });
        assert_eq!(status(&ctx), Some(Status::Ok));
        assert!(ctx.envelope.recipients().is_empty());
        assert!(ctx.envelope.sender().is_empty());
    }

    #[test]
    fn recipient_limit() {
        let mut ctx = SessionState {
            max_recipients: 2,
            ..SessionState::default()
        };
        let state = drive(
            State::default(),
            &mut ctx,
            &[
                "HELO client",
                "MAIL FROM:<a@a.com>",
                "RCPT TO:<1@a.com>",
                "RCPT TO:<2@a.com>",
                "RCPT TO:<3@a.com>",
            ],
        );

        assert_eq!(state, State::RcptTo);
        assert_eq!(status(&ctx), Some(Status::InsufficientStorage));
        assert_eq!(ctx.envelope.recipients().len(), 2);
    }

    #[test]
    fn declared_size_over_limit() {
        let mut ctx = SessionState {
            max_message_size: 100,
            ..SessionState::default()
        };
        let state = drive(
            State::default(),
            &mut ctx,
            &["EHLO client", "MAIL FROM:<a@a.com> SIZE=101"],
        );
        assert_eq!(status(&ctx), Some(Status::ExceededStorage));

        let state = drive(state, &mut ctx, &["MAIL FROM:<a@a.com> SIZE=100"]);
        assert_eq!(state, State::MailFrom);
    }

    #[test]
    fn force_tls_gates_mail() {
        let mut ctx = SessionState {
            tls_available: true,
            force_tls: true,
            ..SessionState::default()
        };
        let state = drive(State::default(), &mut ctx, &["EHLO client", "MAIL FROM:<a@a.com>"]);
        assert_eq!(status(&ctx), Some(Status::StartTlsRequired));

        let state = drive(state, &mut ctx, &["STARTTLS"]);
        assert_eq!(state, State::StartTls);
        assert_eq!(ctx.response, None);

        ctx.tls_established();
        let state = drive(State::default(), &mut ctx, &["EHLO client", "MAIL FROM:<a@a.com>"]);
        assert_eq!(state, State::MailFrom);
    }

    #[test]
    fn starttls_rules() {
        let mut ctx = SessionState::default();
        let state = drive(State::default(), &mut ctx, &["EHLO client", "STARTTLS"]);
        assert_eq!(status(&ctx), Some(Status::NotImplemented));

        ctx.tls_available = true;
        let state = drive(state, &mut ctx, &["MAIL FROM:<a@a.com>", "STARTTLS"]);
        assert_eq!(state, State::MailFrom);
        assert_eq!(status(&ctx), Some(Status::InvalidCommandSequence));

        ctx.tls_established();
        let state = drive(State::default(), &mut ctx, &["EHLO client", "STARTTLS"]);
        assert_eq!(state, State::Ehlo { id: "client".to_string() });
        assert_eq!(status(&ctx), Some(Status::InvalidCommandSequence));
    }

    #[test]
    fn tls_established_forgets_session() {
        let mut ctx = SessionState::default();
        drive(State::default(), &mut ctx, &["EHLO client", "MAIL FROM:<a@a.com>"]);

        ctx.tls_established();

        assert!(ctx.tls);
        assert!(ctx.id.is_empty());
        assert!(ctx.envelope.sender().is_empty());
        assert_eq!(State::ready(&ctx), State::Connect);
    }

    #[test]
    fn quit_from_anywhere() {
        let mut ctx = SessionState::default();
        let state = drive(State::default(), &mut ctx, &["HELO a", "MAIL FROM:<>", "QUIT"]);
        assert_eq!(state, State::Quit);
    }
}
