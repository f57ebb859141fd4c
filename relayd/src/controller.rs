use std::sync::{Arc, LazyLock};

use relayd_aliases::{AliasTable, HttpAliasSource, ReloadCoordinator, ReloadTrigger};
use relayd_common::{Signal, internal, tracing};
use relayd_delivery::{DnsResolver, Relay, SmtpDelivery};
use relayd_smtp::{Listener, SessionConfig, tls};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::{config::Config, error::StartupError};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
            }
            _ = terminate.recv() => {
                internal!(level = INFO, "Terminate Signal received, shutting down");
            }
        };
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
    }

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

/// Builds the STARTTLS acceptor from the configured certificate and key.
///
/// # Errors
///
/// [`StartupError::CertificateRequired`] unless both paths are set, and
/// [`StartupError::Tls`] when the pair cannot be loaded.
pub fn tls_acceptor(config: &Config) -> Result<TlsAcceptor, StartupError> {
    let (Some(cert), Some(key)) = (&config.cert, &config.key) else {
        return Err(StartupError::CertificateRequired);
    };

    internal!(
        level = INFO,
        "Loading certificate {} and key {}",
        cert.display(),
        key.display()
    );

    Ok(tls::acceptor(cert, key)?)
}

/// The running relay: a listener, the alias reload loop and the relay
/// handler tying them together.
pub struct Controller {
    listener: Listener,
    coordinator: ReloadCoordinator,
}

impl Controller {
    /// Prepares everything that can fail before any connection is accepted.
    ///
    /// The initial alias fetch happens here too, but a failure only leaves
    /// the table empty until the next refresh.
    ///
    /// # Errors
    ///
    /// Any [`StartupError`]; each maps to its own exit status.
    #[tracing::instrument(level = "debug", skip_all, err)]
    pub async fn init(config: Config) -> Result<Self, StartupError> {
        let acceptor = tls_acceptor(&config)?;

        let table = Arc::new(AliasTable::new());
        let source = Arc::new(HttpAliasSource::new(&config.url)?);
        let coordinator = ReloadCoordinator::new(source, Arc::clone(&table), config.refresh);

        if let Err(err) = coordinator.refresh(ReloadTrigger::Startup).await {
            internal!(
                level = WARN,
                "Starting with an empty alias table, {} will be retried in {}s: {err}",
                config.url,
                config.refresh.as_secs()
            );
        }

        let delivery =
            SmtpDelivery::new(config.hostname.clone()).with_timeouts(config.client_timeouts);
        let relay = Relay::new(table, Arc::new(DnsResolver::new()?), Arc::new(delivery));

        let session = SessionConfig::builder()
            .with_banner(config.hostname)
            .with_tls(Some(acceptor))
            .with_force_tls(config.force_tls)
            .with_timeouts(config.server_timeouts)
            .build();

        let listener = Listener::bind(config.listen, session, Arc::new(relay)).await?;

        Ok(Self {
            listener,
            coordinator,
        })
    }

    /// Serves until SIGINT or SIGTERM, then drains open sessions.
    ///
    /// # Errors
    ///
    /// Fails if the listener stops accepting or a signal handler cannot be
    /// installed.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        internal!(level = INFO, "Controller running");

        let reload = tokio::spawn(self.coordinator.run(SHUTDOWN_BROADCAST.subscribe()));

        let ret = tokio::select! {
            r = self.listener.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        // Covers a listener failure, where no signal was sent
        let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
        reload.await?;

        internal!(level = INFO, "Shutting down...");

        ret
    }
}
