//! A thread-safe in-memory storage for currently active configuration. [`ConfigurationStore`]
//! provides concurrent access for readers (request handlers) and writers (the configuration
//! poller).
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::Configuration;

/// `ConfigurationStore` provides a thread-safe (`Sync`) storage for the personalization
/// configuration.
///
/// `Configuration` itself is always immutable and can only be replaced completely. Readers never
/// take a lock: a reader gets an `Arc` snapshot and keeps using it for the whole request even if
/// a newer configuration is published meanwhile.
#[derive(Default)]
pub struct ConfigurationStore {
    configuration: ArcSwapOption<Configuration>,
}

impl ConfigurationStore {
    /// Create a new empty configuration store.
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// Get currently-active configuration. Returns None if configuration hasn't been loaded yet.
    pub fn get_configuration(&self) -> Option<Arc<Configuration>> {
        self.configuration.load_full()
    }

    /// Publish a new configuration.
    pub fn set_configuration(&self, config: Arc<Configuration>) {
        log::info!(target: "p13n", version = config.version().unwrap_or("-"); "publishing configuration");
        self.configuration.store(Some(config));
    }
}
