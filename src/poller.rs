//! Background thread keeping the configuration store fresh.
use std::{
    sync::{
        mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use rand::{thread_rng, Rng};

use crate::{
    configuration_fetcher::ConfigurationFetcher, configuration_store::ConfigurationStore, Error,
    Result,
};

#[derive(Debug, Clone)]
pub(crate) struct PollerThreadConfig {
    /// Base delay between fetches.
    pub interval: Duration,
    /// Upper bound of the random delay added to `interval`, so that many instances started at
    /// once do not hit the server in lockstep.
    pub jitter: Duration,
}

/// Outcome of the first fetch. `None` until the first fetch succeeds or the poller gives up.
type Readiness = Arc<(Mutex<Option<Result<()>>>, Condvar)>;

/// Periodically fetches configuration with [`ConfigurationFetcher`] and publishes it to
/// [`ConfigurationStore`].
pub(crate) struct PollerThread {
    join_handle: Mutex<Option<JoinHandle<()>>>,
    /// Capacity 1. A full buffer means a stop is already pending.
    stop_sender: SyncSender<()>,
    readiness: Readiness,
}

impl PollerThread {
    /// Spawn the poller. The first fetch happens immediately.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread could not be spawned.
    pub fn start_with_config(
        fetcher: ConfigurationFetcher,
        store: Arc<ConfigurationStore>,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread> {
        let (stop_sender, stop_receiver) = sync_channel::<()>(1);
        let readiness: Readiness = Arc::new((Mutex::new(None), Condvar::new()));

        let report = {
            let readiness = Arc::clone(&readiness);
            move |outcome: Result<()>| {
                let (slot, ready) = &*readiness;
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                // A later failure must not hide that the client became ready.
                if !matches!(*slot, Some(Ok(()))) {
                    *slot = Some(outcome);
                }
                ready.notify_all();
            }
        };

        let join_handle = std::thread::Builder::new()
            .name("eppo-poller".to_owned())
            .spawn(move || {
                let run = std::panic::AssertUnwindSafe(|| {
                    poll(fetcher, &store, &config, &stop_receiver, &report)
                });
                if std::panic::catch_unwind(run).is_err() {
                    log::error!(target: "eppo", "configuration poller panicked");
                    report(Err(Error::ThreadPanicked));
                }
            })?;

        Ok(PollerThread {
            join_handle: Mutex::new(Some(join_handle)),
            stop_sender,
            readiness,
        })
    }

    /// Block until the first fetch concludes or `timeout` elapses, whichever comes first.
    ///
    /// `None` means the timeout elapsed. `Some(Err(..))` means the poller gave up for good.
    /// With `Duration::ZERO` this only inspects the current state. A timeout too large to
    /// represent as a deadline waits without one.
    pub fn wait_for_configuration(&self, timeout: Duration) -> Option<Result<()>> {
        let deadline = Instant::now().checked_add(timeout);
        let (slot, ready) = &*self.readiness;

        let mut slot: MutexGuard<_> = slot.lock().ok()?;
        while slot.is_none() {
            slot = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    ready.wait_timeout(slot, remaining).ok()?.0
                }
                None => ready.wait(slot).ok()?,
            };
        }
        slot.clone()
    }

    /// Ask the thread to stop without waiting for it.
    pub fn stop(&self) {
        // Fails only if the thread is gone or a stop is already queued.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the thread and join it. Later calls return immediately.
    pub fn shutdown(&self) -> Result<()> {
        self.stop();

        let handle = self
            .join_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle.join().map_err(|_| Error::ThreadPanicked),
            None => Ok(()),
        }
    }
}

/// Poller loop. Returns when stopped or on an error that retrying cannot fix.
fn poll(
    mut fetcher: ConfigurationFetcher,
    store: &ConfigurationStore,
    config: &PollerThreadConfig,
    stop: &Receiver<()>,
    report: &impl Fn(Result<()>),
) {
    loop {
        log::debug!(target: "eppo", "fetching configuration");
        match fetcher.fetch_configuration() {
            Ok(configuration) => {
                store.set_configuration(Arc::new(configuration));
                report(Ok(()));
            }
            Err(err @ (Error::Unauthorized | Error::InvalidBaseUrl(_))) => {
                log::warn!(target: "eppo", "configuration poller stopped: {err}");
                report(Err(err));
                return;
            }
            Err(err) => {
                log::warn!(target: "eppo", "configuration fetch failed, will retry: {err}");
            }
        }

        match stop.recv_timeout(jitter(config.interval, config.jitter)) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::debug!(target: "eppo", "configuration poller stopping");
                return;
            }
        }
    }
}

/// `interval` plus a uniformly random extra delay below `jitter`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        interval
    } else {
        interval + thread_rng().gen_range(Duration::ZERO..jitter)
    }
}
