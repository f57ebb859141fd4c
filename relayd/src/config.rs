//! Command line flags, the JSON configuration file, and how the two combine.
//!
//! The file wins for the listener identity (`Host`, `Bind`, `Port`) while
//! the flags win for the certificate paths and the alias URL. See
//! [`Config::merge`] for the exact rules.

use std::{
    fs, io,
    net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{ArgAction, Parser};
use relayd_common::config::{ClientTimeouts, ServerTimeouts};
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_CONFIG: &str = "/etc/relayd/relayd.conf";

/// Never contacted; only used to pick the interface that routes outward.
const OUTBOUND_TARGET: &str = "1.2.3.4:80";

/// An SMTP relay forwarding mail through a remotely maintained alias table.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "relayd", version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file
    #[arg(short, long, env = "RELAYD_CONFIG", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Certificate chain (PEM)
    #[arg(long, visible_alias = "cf")]
    pub cert: Option<PathBuf>,

    /// Private key (PEM)
    #[arg(long, visible_alias = "ck")]
    pub key: Option<PathBuf>,

    /// Require STARTTLS before MAIL FROM
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub tls: bool,

    /// Listen port
    #[arg(short, long, default_value_t = 25)]
    pub port: u16,

    /// Listen address
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Server hostname, used in the banner and when relaying
    #[arg(short = 'n', long, default_value = "localhost.localdomain")]
    pub hostname: String,

    /// Alias refresh interval in seconds
    #[arg(short, long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh: u64,

    /// Alias listing URL
    #[arg(short, long)]
    pub url: Option<String>,
}

/// The configuration file as written. Every field is optional and empty
/// strings count as absent.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileConfig {
    #[serde(alias = "cert")]
    pub cert: Option<String>,
    #[serde(alias = "key")]
    pub key: Option<String>,
    #[serde(alias = "host")]
    pub host: Option<String>,
    #[serde(alias = "bind")]
    pub bind: Option<String>,
    #[serde(alias = "port")]
    pub port: Option<String>,
    #[serde(alias = "tls")]
    pub tls: Option<String>,
    #[serde(alias = "time")]
    pub time: Option<String>,
    #[serde(alias = "url")]
    pub url: Option<String>,
    #[serde(alias = "server_timeouts")]
    pub server_timeouts: Option<ServerTimeouts>,
    #[serde(alias = "client_timeouts")]
    pub client_timeouts: Option<ClientTimeouts>,
}

impl FileConfig {
    /// # Errors
    ///
    /// [`ConfigError::Read`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not a JSON object of the expected shape.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Everything the relay needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub hostname: String,
    pub listen: SocketAddr,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub force_tls: bool,
    pub refresh: Duration,
    pub url: String,
    pub server_timeouts: ServerTimeouts,
    pub client_timeouts: ClientTimeouts,
}

impl Config {
    /// Reads the file named by `--config` and merges it with `args`.
    ///
    /// # Errors
    ///
    /// See [`FileConfig::load`] and [`Config::merge`].
    pub fn load(args: Args) -> ConfigResult<Self> {
        let file = FileConfig::load(&args.config)?;
        Self::merge(args, file)
    }

    /// Combines flags and file:
    ///
    /// - hostname, bind address and port come from the file when set there,
    ///   otherwise from the flags. Without either, the bind address is the
    ///   one this machine uses to reach the outside world. A host name is
    ///   resolved here and its first address used.
    /// - certificate, key and URL come from the flags when given, otherwise
    ///   from the file.
    /// - `Tls` overrides `--tls` only when it is exactly `"true"` or `"false"`.
    /// - `Time` overrides `--refresh` when it is a positive integer.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingUrl`] when no alias URL is configured at all,
    /// and [`ConfigError::InvalidAddress`] for an unusable bind address.
    pub fn merge(args: Args, file: FileConfig) -> ConfigResult<Self> {
        let url = present(args.url)
            .or_else(|| present(file.url))
            .ok_or(ConfigError::MissingUrl)?;

        let hostname = present(file.host).unwrap_or(args.hostname);

        let port = present(file.port)
            .and_then(|port| port.parse().ok())
            .unwrap_or(args.port);

        let listen = match present(file.bind).or_else(|| present(args.interface)) {
            Some(bind) => resolve_bind(&bind, port)?,
            None => SocketAddr::new(outbound_ip().map_err(ConfigError::OutboundAddress)?, port),
        };

        let force_tls = match file.tls.as_deref() {
            Some("true") => true,
            Some("false") => false,
            _ => args.tls,
        };

        let refresh = file
            .time
            .and_then(|time| time.parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .unwrap_or(args.refresh);

        Ok(Self {
            hostname,
            listen,
            cert: args.cert.or_else(|| present(file.cert).map(PathBuf::from)),
            key: args.key.or_else(|| present(file.key).map(PathBuf::from)),
            force_tls,
            refresh: Duration::from_secs(refresh),
            url,
            server_timeouts: file.server_timeouts.unwrap_or_default(),
            client_timeouts: file.client_timeouts.unwrap_or_default(),
        })
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

fn resolve_bind(bind: &str, port: u16) -> ConfigResult<SocketAddr> {
    if let Ok(ip) = bind.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    (bind, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConfigError::InvalidAddress(bind.to_string()))
}

/// The local address of a UDP socket "connected" to a public address.
fn outbound_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(OUTBOUND_TARGET)?;
    Ok(socket.local_addr()?.ip())
}
