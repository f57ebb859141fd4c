//! Deciding when the alias table is refreshed.
//!
//! Every reason to refresh (SIGHUP, the periodic timer, an explicit request)
//! is published as a [`ReloadTrigger`] into one bounded channel. A single
//! consumer performs the refreshes, so two refreshes never overlap, and a
//! trigger arriving while one is already queued is folded into it.

use core::fmt::{self, Display, Formatter};
use std::{sync::Arc, time::Duration};

use relayd_common::{Signal, internal};
use tokio::{
    sync::{
        broadcast,
        mpsc::{self, error::TrySendError},
    },
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    error::{FetchError, FetchResult},
    source::AliasSource,
    table::AliasTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    Startup,
    Hangup,
    Interval,
    Manual,
}

impl Display for ReloadTrigger {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Startup => "startup",
            Self::Hangup => "hangup",
            Self::Interval => "interval",
            Self::Manual => "manual",
        })
    }
}

/// A cheap, cloneable way to ask for a refresh.
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    sender: mpsc::Sender<ReloadTrigger>,
}

impl ReloadHandle {
    /// Requests a refresh.
    ///
    /// Returns `false` when a refresh is already pending (the request is
    /// coalesced into it) or the coordinator has stopped.
    pub fn trigger(&self, trigger: ReloadTrigger) -> bool {
        match self.sender.try_send(trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                internal!(level = DEBUG, "Refresh already pending, ignoring {trigger} trigger");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

pub struct ReloadCoordinator {
    source: Arc<dyn AliasSource>,
    table: Arc<AliasTable>,
    period: Duration,
    sender: mpsc::Sender<ReloadTrigger>,
    receiver: mpsc::Receiver<ReloadTrigger>,
}

impl ReloadCoordinator {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(300);

    pub fn new(source: Arc<dyn AliasSource>, table: Arc<AliasTable>, period: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(1);

        Self {
            source,
            table,
            period: period.max(Duration::from_secs(1)),
            sender,
            receiver,
        }
    }

    pub fn handle(&self) -> ReloadHandle {
        ReloadHandle {
            sender: self.sender.clone(),
        }
    }

    /// Performs one refresh now.
    ///
    /// On success the table is replaced and the new version returned; on
    /// failure the table is left exactly as it was. A listing without a
    /// single usable record counts as a failure.
    ///
    /// # Errors
    ///
    /// Propagates the [`FetchError`] from the source, or
    /// [`FetchError::Empty`].
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn refresh(&self, trigger: ReloadTrigger) -> FetchResult<u64> {
        let fetched = self.source.fetch().await.and_then(|records| {
            if records.is_empty() {
                Err(FetchError::Empty)
            } else {
                Ok(records)
            }
        });

        match fetched {
            Ok(records) => {
                let count = records.len();
                let version = self.table.replace(records);
                internal!(
                    level = INFO,
                    "Alias table refreshed ({trigger}): version {version}, {count} records"
                );
                Ok(version)
            }
            Err(err) => {
                internal!(
                    level = ERROR,
                    "Alias refresh ({trigger}) failed, keeping version {}: {err}",
                    self.table.version()
                );
                Err(err)
            }
        }
    }

    /// Runs the refresh loop until shutdown is signalled.
    ///
    /// This also starts the periodic timer and, on unix, the SIGHUP listener,
    /// both of which only publish triggers.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<Signal>) {
        let mut producers = vec![tokio::spawn(periodic(self.handle(), self.period))];

        #[cfg(unix)]
        producers.push(tokio::spawn(hangup(self.handle())));

        internal!(
            level = INFO,
            "Alias reload coordinator running, refreshing every {}s",
            self.period.as_secs()
        );

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        internal!(level = INFO, "Alias reload coordinator received shutdown");
                        break;
                    }
                }

                Some(trigger) = self.receiver.recv() => {
                    let _ = self.refresh(trigger).await;
                }
            }
        }

        producers.iter().for_each(JoinHandle::abort);
    }
}

async fn periodic(handle: ReloadHandle, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        handle.trigger(ReloadTrigger::Interval);
    }
}

#[cfg(unix)]
async fn hangup(handle: ReloadHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(err) => {
            internal!(level = ERROR, "Unable to listen for SIGHUP: {err}");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        internal!(level = INFO, "SIGHUP received, refreshing aliases");
        handle.trigger(ReloadTrigger::Hangup);
    }
}
