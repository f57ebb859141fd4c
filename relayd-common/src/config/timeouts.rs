//! Timeout configuration for SMTP operations.
//!
//! Inbound sessions follow the RFC 5321 server recommendations; the outbound
//! delivery client uses shorter limits so a stalled mail host cannot hold an
//! inbound transaction open for long.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server-side SMTP timeouts (RFC 5321 section 4.5.3.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// Timeout waiting for the next command.
    ///
    /// Default: 300 seconds
    #[serde(default = "defaults::server_command_secs")]
    pub command_secs: u64,

    /// Timeout waiting for each line of message data.
    ///
    /// Default: 180 seconds
    #[serde(default = "defaults::server_data_block_secs")]
    pub data_block_secs: u64,

    /// Maximum total connection duration.
    ///
    /// Default: 1800 seconds
    #[serde(default = "defaults::server_connection_secs")]
    pub connection_secs: u64,
}

impl ServerTimeouts {
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub const fn data_block(&self) -> Duration {
        Duration::from_secs(self.data_block_secs)
    }

    pub const fn connection(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::server_command_secs(),
            data_block_secs: defaults::server_data_block_secs(),
            connection_secs: defaults::server_connection_secs(),
        }
    }
}

/// Client-side SMTP timeouts used for outbound delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Timeout for establishing the TCP connection and reading the greeting.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_connect_secs")]
    pub connect_secs: u64,

    /// Timeout for EHLO/HELO, MAIL FROM and RCPT TO.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_command_secs")]
    pub command_secs: u64,

    /// Timeout for the DATA command and the message transfer.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::client_data_secs")]
    pub data_secs: u64,

    /// Timeout for QUIT (a timeout here does not fail the delivery).
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::client_quit_secs")]
    pub quit_secs: u64,
}

impl ClientTimeouts {
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::client_connect_secs(),
            command_secs: defaults::client_command_secs(),
            data_secs: defaults::client_data_secs(),
            quit_secs: defaults::client_quit_secs(),
        }
    }
}

mod defaults {
    pub const fn server_command_secs() -> u64 {
        300
    }
    pub const fn server_data_block_secs() -> u64 {
        180
    }
    pub const fn server_connection_secs() -> u64 {
        1800
    }

    pub const fn client_connect_secs() -> u64 {
        30
    }
    pub const fn client_command_secs() -> u64 {
        30
    }
    pub const fn client_data_secs() -> u64 {
        120
    }
    pub const fn client_quit_secs() -> u64 {
        10
    }
}
