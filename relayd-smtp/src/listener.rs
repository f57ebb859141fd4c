use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::future::join_all;
use relayd_common::{Signal, error::ListenerError, internal, tracing};
use tokio::{net::TcpListener, sync::broadcast};

use crate::{
    session::{Session, SessionConfig},
    transaction_handler::SmtpTransactionHandler,
};

/// Accepts SMTP connections and runs one [`Session`] per peer.
pub struct Listener {
    listener: TcpListener,
    config: Arc<SessionConfig>,
    handler: Arc<dyn SmtpTransactionHandler>,
}

impl Listener {
    /// Binds the socket right away so a bad address fails at startup.
    ///
    /// # Errors
    ///
    /// [`ListenerError::BindFailed`] if the address cannot be bound.
    pub async fn bind(
        address: SocketAddr,
        config: SessionConfig,
        handler: Arc<dyn SmtpTransactionHandler>,
    ) -> Result<Self, ListenerError> {
        let listener =
            TcpListener::bind(address)
                .await
                .map_err(|source| ListenerError::BindFailed {
                    address: address.to_string(),
                    source,
                })?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            handler,
        })
    }

    /// The bound address, useful when binding port 0.
    ///
    /// # Errors
    ///
    /// Propagates the OS error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until shutdown, then waits for open sessions.
    ///
    /// Sessions receive their own shutdown subscription and answer 421
    /// before closing. Temporary accept failures are retried with a growing
    /// pause.
    ///
    /// # Errors
    ///
    /// [`ListenerError::AcceptFailed`] if accepting fails for good.
    #[tracing::instrument(level = "debug", skip_all, err)]
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ListenerError> {
        let address = self.listener.local_addr()?;
        internal!(level = INFO, "Serving SMTP on {address} with {:?}", self.config);

        let mut sessions = Vec::default();
        let mut backoff = None;

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        internal!(
                            level = INFO,
                            "SMTP Listener {address} received shutdown signal, finishing {} sessions ...",
                            sessions.len()
                        );
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = self.listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(accepted) => {
                            backoff = None;
                            accepted
                        }
                        Err(err) if is_transient(&err) => {
                            let pause = next_backoff(backoff);
                            backoff = Some(pause);
                            internal!(
                                level = WARN,
                                "Accepting on {address} failed, retrying in {}ms: {err}",
                                pause.as_millis()
                            );
                            tokio::time::sleep(pause).await;
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    };
                    tracing::debug!("Connection received on {address} from {peer}");

                    let session = Session::create(
                        stream,
                        peer,
                        Arc::clone(&self.config),
                        Arc::clone(&self.handler),
                    );
                    let signal = shutdown.resubscribe();

                    sessions.retain(|handle: &tokio::task::JoinHandle<()>| !handle.is_finished());
                    sessions.push(tokio::spawn(async move {
                        match session.run(signal).await {
                            Err(err) if err.is_client_error() => {
                                internal!(level = DEBUG, "Session with {peer} ended: {err}");
                            }
                            Err(err) => internal!(level = ERROR, "Session with {peer} failed: {err}"),
                            Ok(()) => {}
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}

const MIN_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// 5ms, then doubling up to one second.
fn next_backoff(previous: Option<Duration>) -> Duration {
    previous.map_or(MIN_BACKOFF, |previous| (previous * 2).min(MAX_BACKOFF))
}

/// Accept failures that say nothing about the listening socket itself.
fn is_transient(err: &io::Error) -> bool {
    // ENFILE and EMFILE share these numbers on Linux and the BSDs
    const ENFILE: i32 = 23;
    const EMFILE: i32 = 24;

    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    ) || (cfg!(unix) && matches!(err.raw_os_error(), Some(ENFILE | EMFILE)))
}
