use relayd_common::{incoming, outgoing, tracing};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpStream, ToSocketAddrs},
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

/// Longest reply line accepted from a server.
const MAX_LINE: u64 = 4096;

/// Lines in one multi-line reply before giving up on the server.
const MAX_LINES: usize = 128;

/// Prepares a message body for the DATA phase (RFC 5321 4.5.2).
///
/// Bare LF line endings become CRLF, lines starting with `.` get a second
/// one, the body is CRLF terminated and the `.` end marker appended.
pub fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 64 + 5);
    let mut at_line_start = true;

    for (i, &byte) in body.iter().enumerate() {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }

        if byte == b'\n' && (i == 0 || body[i - 1] != b'\r') {
            out.push(b'\r');
        }

        out.push(byte);
        at_line_start = byte == b'\n';
    }

    if !out.is_empty() && !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b".\r\n");
    out
}

/// An SMTP client for sending commands and receiving responses.
pub struct SmtpClient {
    stream: BufReader<TcpStream>,
}

impl SmtpClient {
    /// Opens a plain TCP connection to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect<A: ToSocketAddrs + Send>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Reads the initial server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Sends a raw command and reads the response.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");

        self.stream
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        self.stream.flush().await?;

        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the message body, dot-stuffed and terminated, then reads the
    /// server's verdict.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn send_data(&mut self, body: &[u8]) -> Result<Response> {
        let payload = dot_stuff(body);
        outgoing!("<{} bytes of message data>", payload.len());

        self.stream.write_all(&payload).await?;
        self.stream.flush().await?;

        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Reads one complete, possibly multi-line, reply.
    async fn read_response(&mut self) -> Result<Response> {
        let mut code = None;
        let mut messages = Vec::new();

        loop {
            let mut raw = Vec::new();
            let read = (&mut self.stream)
                .take(MAX_LINE)
                .read_until(b'\n', &mut raw)
                .await?;

            if read == 0 {
                return Err(ClientError::ConnectionClosed);
            }

            let text = String::from_utf8_lossy(&raw);
            let text = text.trim_end_matches(['\r', '\n']);
            incoming!("{text}");

            let line = Response::parse_line(text)?;

            match code {
                Some(expected) if expected != line.code => {
                    return Err(ClientError::MalformedReply(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => code = Some(line.code),
            }

            messages.push(line.message);

            if line.is_last {
                return Ok(Response::new(line.code, messages));
            }

            if messages.len() >= MAX_LINES {
                return Err(ClientError::MalformedReply(format!(
                    "Response exceeds {MAX_LINES} lines"
                )));
            }
        }
    }
}
