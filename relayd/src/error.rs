use std::{io, path::PathBuf};

use relayd_aliases::FetchError;
use relayd_common::error::ListenerError;
use relayd_delivery::DnsError;
use relayd_smtp::error::TlsError;
use thiserror::Error;

use crate::exit::ExitStatus;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("An alias fetch URL is required (--url or \"Url\")")]
    MissingUrl,

    #[error("Invalid listen address {0}")]
    InvalidAddress(String),

    #[error("Unable to determine the outbound address: {0}")]
    OutboundAddress(#[source] io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Anything that stops the relay from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unable to load certificate: {0}")]
    Tls(#[from] TlsError),

    #[error("A certificate and key are required (--cert/--key or \"Cert\"/\"Key\")")]
    CertificateRequired,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error("Unable to create the alias fetcher: {0}")]
    Fetcher(#[from] FetchError),
}

impl StartupError {
    pub const fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Config(ConfigError::MissingUrl) => ExitStatus::MissingAliasUrl,
            Self::Config(ConfigError::Read { .. } | ConfigError::Parse { .. }) => {
                ExitStatus::InvalidConfig
            }
            Self::Tls(_) | Self::CertificateRequired => ExitStatus::Certificate,
            _ => ExitStatus::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{ConfigError, StartupError};
    use crate::exit::ExitStatus;

    #[test]
    fn exit_statuses() {
        assert_eq!(
            StartupError::from(ConfigError::MissingUrl).exit_status(),
            ExitStatus::MissingAliasUrl
        );
        assert_eq!(
            StartupError::from(ConfigError::Read {
                path: PathBuf::from("/etc/relayd/relayd.conf"),
                source: std::io::ErrorKind::NotFound.into(),
            })
            .exit_status(),
            ExitStatus::InvalidConfig
        );
        assert_eq!(
            StartupError::CertificateRequired.exit_status(),
            ExitStatus::Certificate
        );
        assert_eq!(
            StartupError::from(ConfigError::InvalidAddress("nope:25".to_string())).exit_status(),
            ExitStatus::Failure
        );
    }
}
