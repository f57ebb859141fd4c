//! Getting an accepted message to where the alias table says it belongs.

pub mod dns;
pub mod error;
pub mod relay;
pub mod transaction;

pub use dns::{DnsResolver, MxResolver};
pub use error::{DeliveryError, DeliveryResult, DnsError};
pub use relay::Relay;
pub use transaction::{Deliver, SmtpDelivery};
