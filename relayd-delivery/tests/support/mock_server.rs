//! A scripted SMTP peer standing in for a remote mail exchange.
//!
//! Every reply can be overridden, and the server can be told to go silent
//! at a given command to exercise client timeouts. Everything the client
//! sends is recorded for later assertions.
#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    task::JoinHandle,
};

/// What the mock saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// The body as received, still dot-stuffed, without the final `.`
    MessageContent(Vec<u8>),
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![message.into()],
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let last = self.lines.len().saturating_sub(1);
        self.lines
            .iter()
            .enumerate()
            .map(|(ix, line)| {
                let separator = if ix == last { ' ' } else { '-' };
                format!("{}{separator}{line}\r\n", self.code)
            })
            .collect::<String>()
            .into_bytes()
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    ehlo: Reply,
    helo: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    quit: Reply,
    stall_on_command: Option<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.test ESMTP"),
            ehlo: Reply {
                code: 250,
                lines: vec!["mock.test".to_string(), "SIZE 10000".to_string()],
            },
            helo: Reply::new(250, "mock.test"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "OK: queued"),
            quit: Reply::new(221, "Bye"),
            stall_on_command: None,
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    accept: JoinHandle<()>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    async fn handle_client(
        stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let mut stream = BufReader::new(stream);
        stream.write_all(&script.greeting.to_bytes()).await?;

        let mut line = String::new();
        let mut seen = 0;

        loop {
            if script.stall_on_command == Some(seen) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            line.clear();
            if stream.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            seen += 1;

            let text = line.trim_end();
            let (verb, rest) = text.split_once(' ').unwrap_or((text, ""));

            let (command, reply) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (SmtpCommand::Ehlo(rest.to_string()), &script.ehlo),
                "HELO" => (SmtpCommand::Helo(rest.to_string()), &script.helo),
                "MAIL" => (SmtpCommand::MailFrom(path(rest)), &script.mail_from),
                "RCPT" => (SmtpCommand::RcptTo(path(rest)), &script.rcpt_to),
                "DATA" => (SmtpCommand::Data, &script.data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    stream.write_all(&script.quit.to_bytes()).await?;
                    return Ok(());
                }
                _ => {
                    commands.write().await.push(SmtpCommand::Other(text.to_string()));
                    stream.write_all(b"500 Unknown command\r\n").await?;
                    continue;
                }
            };

            let entering_data = command == SmtpCommand::Data && reply.code == 354;
            commands.write().await.push(command);
            stream.write_all(&reply.to_bytes()).await?;

            if entering_data {
                let mut content = Vec::new();
                loop {
                    line.clear();
                    if stream.read_line(&mut line).await? == 0 {
                        return Ok(());
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.extend_from_slice(line.as_bytes());
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                stream.write_all(&script.data_end.to_bytes()).await?;
            }
        }
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

/// `FROM:<a@b>` or `TO:<a@b>` to `a@b`.
fn path(argument: &str) -> String {
    argument
        .split_once(':')
        .map_or(argument, |(_, path)| path)
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.greeting = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.ehlo = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_helo_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.helo = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data_end = Reply::new(code, message);
        self
    }

    /// Stop answering once `index` commands (0-based) have been handled.
    #[must_use]
    pub const fn with_stall_on_command(mut self, index: usize) -> Self {
        self.script.stall_on_command = Some(index);
        self
    }

    /// Binds an ephemeral port and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));

        let recorded = Arc::clone(&commands);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = Arc::clone(&script);
                let commands = Arc::clone(&recorded);

                tokio::spawn(async move {
                    if let Err(err) = MockSmtpServer::handle_client(stream, script, commands).await {
                        tracing::debug!("Mock server client error: {err}");
                    }
                });
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands,
            accept,
        })
    }
}
