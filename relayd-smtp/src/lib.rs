//! The SMTP side of relayd: an inbound server speaking enough ESMTP to
//! accept mail, and the small client used to pass it on.

pub mod client;
pub mod command;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod listener;
pub mod session;
pub mod state;
pub mod tls;
pub mod transaction_handler;

pub use command::{Command, HeloVariant, MailParameters};
pub use listener::Listener;
pub use session::{DEFAULT_MAX_MESSAGE_SIZE, Session, SessionConfig};
pub use state::{SessionState, State};
pub use transaction_handler::{SmtpTransactionHandler, TransactionError};
