//! Process-level plumbing for the relay: flags, configuration, startup and
//! shutdown.

pub mod config;
pub mod controller;
pub mod error;
pub mod exit;

pub use config::{Args, Config, FileConfig};
pub use controller::Controller;
pub use error::{ConfigError, StartupError};
pub use exit::ExitStatus;
