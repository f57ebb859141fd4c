//! A minimal SMTP client for handing messages to the next hop.
//!
//! Plain TCP only; outbound STARTTLS is not attempted.
//!
//! ```no_run
//! use relayd_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), relayd_smtp::client::ClientError> {
//! let mut client = SmtpClient::connect("mx.example.com:25").await?;
//! client.read_greeting().await?;
//! client.ehlo("relay.example.com").await?;
//! client.mail_from("alice@example.com").await?;
//! client.rcpt_to("bob@example.org").await?;
//! client.data().await?;
//! client.send_data(b"Subject: Hi\r\n\r\nHello\r\n").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::{SmtpClient, dot_stuff};
