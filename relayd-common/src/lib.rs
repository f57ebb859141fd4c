pub mod config;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod status;
pub mod traits;

pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
