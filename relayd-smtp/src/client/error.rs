use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something that is not an SMTP reply.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Server closed the connection")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
