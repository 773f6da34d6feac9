//! A background poller thread that periodically reloads the configuration document and publishes
//! it to a configuration store.
use std::{
    sync::{
        mpsc::{Receiver, RecvTimeoutError},
        Arc, Condvar, Mutex,
    },
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::configuration_fetcher::ConfigurationFetcher;
use crate::configuration_store::ConfigurationStore;
use crate::{Error, Result};

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Interval to wait between reloads.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between reloads. This helps to avoid multiple
    /// server instances synchronizing and producing spiky load on the configuration source.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerThreadConfig {
    /// Default value for [`PollerThreadConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`PollerThreadConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    pub fn new() -> PollerThreadConfig {
        PollerThreadConfig::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> PollerThreadConfig {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> PollerThreadConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerThreadConfig {
    fn default() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// A configuration poller thread.
///
/// Reloads run on a dedicated thread, so there is only ever one reload in flight. Each reload
/// builds a complete [`Configuration`](crate::Configuration) before it is published, and a failed
/// reload leaves the previous configuration in place.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    /// `None` until the first load finishes, then its outcome.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl PollerThread {
    /// Starts the configuration poller thread with default intervals.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread failed to start.
    pub fn start(
        fetcher: ConfigurationFetcher,
        store: Arc<ConfigurationStore>,
    ) -> std::io::Result<PollerThread> {
        PollerThread::start_with_config(fetcher, store, PollerThreadConfig::default())
    }

    /// Starts the configuration poller thread with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread failed to start.
    pub fn start_with_config(
        mut fetcher: ConfigurationFetcher,
        store: Arc<ConfigurationStore>,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread> {
        // A single slot is enough: `stop()` uses `try_send()`, so a full slot already means a
        // pending stop.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let result = Arc::new((Mutex::new(None), Condvar::new()));
        let publish = {
            let result = Arc::clone(&result);
            move |outcome: Result<()>| {
                if let Ok(mut slot) = result.0.lock() {
                    *slot = Some(outcome);
                }
                result.1.notify_all();
            }
        };

        let join_handle = std::thread::Builder::new()
            .name("p13n-config-poller".to_owned())
            .spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => poll_until_stopped(
                            &runtime,
                            &mut fetcher,
                            &store,
                            &config,
                            &stop_receiver,
                            &publish,
                        ),
                        Err(err) => publish(Err(Error::from(err))),
                    }
                }));

                if outcome.is_err() {
                    publish(Err(Error::PollerThreadPanicked));
                }
            })?;

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Block until the first configuration is published.
    ///
    /// # Errors
    ///
    /// Returns the error of the first load if it failed (an invalid URL, an unreadable file, a
    /// backend error or a malformed document), or [`Error::PollerThreadPanicked`].
    pub fn wait_for_configuration(&self) -> Result<()> {
        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => return result.clone(),
                None => {
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means the thread has already exited or a stop command is already pending.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

/// Reload loop of the poller thread.
///
/// The first load decides start-up: its outcome is published either way and a failure ends the
/// loop. Once a configuration is live, failed reloads keep it and are retried on the next tick.
fn poll_until_stopped(
    runtime: &tokio::runtime::Runtime,
    fetcher: &mut ConfigurationFetcher,
    store: &ConfigurationStore,
    config: &PollerThreadConfig,
    stop_receiver: &Receiver<()>,
    publish: &impl Fn(Result<()>),
) {
    let mut live = false;
    loop {
        log::debug!(target: "p13n", live = live; "reloading configuration");
        match runtime.block_on(fetcher.fetch_configuration()) {
            Ok(configuration) => {
                log::debug!(target: "p13n", version = configuration.version(); "configuration published");
                store.set_configuration(Arc::new(configuration));
                if !live {
                    live = true;
                    publish(Ok(()));
                }
            }
            Err(err) if !live => {
                log::error!(target: "p13n", "initial configuration load failed: {err}");
                publish(Err(err));
                return;
            }
            Err(err) => {
                log::warn!(target: "p13n", "configuration reload failed, serving previous one: {err}");
            }
        }

        if !sleep_unless_stopped(stop_receiver, jitter(config.interval, config.jitter)) {
            log::debug!(target: "p13n", "configuration poller stopped");
            return;
        }
    }
}

/// Sleeps for `timeout`. Returns `false` if a stop was requested or the handle was dropped.
fn sleep_unless_stopped(stop_receiver: &Receiver<()>, timeout: Duration) -> bool {
    matches!(
        stop_receiver.recv_timeout(timeout),
        Err(RecvTimeoutError::Timeout)
    )
}

/// Shortens `interval` by a random amount of up to `jitter`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    interval.saturating_sub(thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};

    use super::{PollerThread, PollerThreadConfig};
    use crate::configuration_fetcher::{
        ConfigurationFetcher, ConfigurationFetcherConfig, ConfigurationSource,
    };
    use crate::configuration_store::ConfigurationStore;
    use crate::Error;

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(30);
        let jitter = Duration::from_secs(30);

        let result = super::jitter(interval, jitter);

        assert!(result <= interval, "{result:?} must be <= {interval:?}");
    }

    #[test]
    fn jitter_truncates_to_zero() {
        let result = super::jitter(Duration::ZERO, Duration::from_secs(30));

        assert_eq!(result, Duration::ZERO);
    }

    #[test]
    fn publishes_first_configuration() {
        let path = std::env::temp_dir().join(format!("p13n-poller-{}.json", std::process::id()));
        std::fs::File::create(&path)
            .unwrap()
            .write_all(br#"{"version": "poll-1", "namespaces": {}}"#)
            .unwrap();

        let store = Arc::new(ConfigurationStore::new());
        let fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig::new(
            ConfigurationSource::File(path.clone()),
        ));
        let poller = PollerThread::start_with_config(
            fetcher,
            store.clone(),
            PollerThreadConfig::new().with_interval(Duration::from_secs(60)),
        )
        .unwrap();

        poller.wait_for_configuration().unwrap();
        assert_eq!(
            store.get_configuration().unwrap().version(),
            Some("poll-1")
        );

        poller.shutdown().unwrap();
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn invalid_url_is_unrecoverable() {
        let store = Arc::new(ConfigurationStore::new());
        let fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig::new(
            ConfigurationSource::Url("::::".to_owned()),
        ));
        let poller = PollerThread::start(fetcher, store.clone()).unwrap();

        let err = poller.wait_for_configuration().unwrap_err();
        assert!(matches!(err, Error::InvalidBaseUrl(_)));
        assert!(store.get_configuration().is_none());
        poller.shutdown().unwrap();
    }

    #[test]
    fn missing_file_fails_first_load() {
        let _ = env_logger::builder().is_test(true).try_init();

        let store = Arc::new(ConfigurationStore::new());
        let fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig::new(
            ConfigurationSource::File(PathBuf::from("/nonexistent/p13n.json")),
        ));
        let poller = PollerThread::start_with_config(
            fetcher,
            store.clone(),
            PollerThreadConfig::new()
                .with_interval(Duration::from_millis(100))
                .with_jitter(Duration::ZERO),
        )
        .unwrap();

        let err = poller.wait_for_configuration().unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err:?}");
        assert!(store.get_configuration().is_none());
        poller.shutdown().unwrap();
    }

    #[test]
    fn failed_reload_keeps_previous_configuration() {
        let path = std::env::temp_dir().join(format!("p13n-reload-{}.json", std::process::id()));
        std::fs::write(&path, br#"{"version": "reload-1", "namespaces": {}}"#).unwrap();

        let store = Arc::new(ConfigurationStore::new());
        let fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig::new(
            ConfigurationSource::File(path.clone()),
        ));
        let poller = PollerThread::start_with_config(
            fetcher,
            store.clone(),
            PollerThreadConfig::new()
                .with_interval(Duration::from_millis(20))
                .with_jitter(Duration::ZERO),
        )
        .unwrap();
        poller.wait_for_configuration().unwrap();

        std::fs::remove_file(&path).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        assert!(poller.wait_for_configuration().is_ok());
        assert_eq!(
            store.get_configuration().unwrap().version(),
            Some("reload-1")
        );
        poller.shutdown().unwrap();
    }
}
