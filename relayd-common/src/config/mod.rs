//! Configuration types shared by the inbound and outbound SMTP layers.

pub mod timeouts;

pub use timeouts::{ClientTimeouts, ServerTimeouts};
