//! In-process item metadata loaded from JSON-Lines bulk exports.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::{ItemMetadata, ItemMetadataStore};
use crate::config::{ItemMetadataType, PersonalizationConfig};
use crate::configuration_store::ConfigurationStore;
use crate::endpoint::endpoint_url;
use crate::{Error, Result};

/// Default interval between syncs of one namespace.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Where bulk exports live. Each namespace is read from `<namespace>.jsonl`.
#[derive(Debug, Clone)]
pub enum LocalDbSource {
    Directory(PathBuf),
    Url(String),
}

#[derive(Debug)]
struct Snapshot {
    items: HashMap<String, ItemMetadata>,
    synced_at: Instant,
}

/// Per-namespace metadata snapshots.
///
/// Readers load the current snapshot map without locking. A sync builds a complete snapshot for
/// one namespace and publishes it with a single swap, so ids absent from a new export disappear
/// and a failed sync leaves the previous snapshot serving.
pub struct LocalDbStore {
    source: LocalDbSource,
    client: reqwest::Client,
    snapshots: ArcSwap<HashMap<String, Arc<Snapshot>>>,
    /// Last sync attempt per namespace, successful or not.
    attempts: std::sync::Mutex<HashMap<String, Instant>>,
}

impl LocalDbStore {
    pub fn new(source: LocalDbSource) -> LocalDbStore {
        LocalDbStore {
            source,
            client: reqwest::Client::new(),
            snapshots: ArcSwap::from_pointee(HashMap::new()),
            attempts: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Number of items in the current snapshot of `namespace`.
    pub fn item_count(&self, namespace: &str) -> Option<usize> {
        self.snapshots
            .load()
            .get(namespace)
            .map(|snapshot| snapshot.items.len())
    }

    /// Replace the snapshot of `namespace` with the contents of `bytes`.
    pub fn load(&self, namespace: &str, bytes: &[u8]) -> Result<usize> {
        let items = parse_export(bytes)?;
        let count = items.len();
        let snapshot = Arc::new(Snapshot {
            items,
            synced_at: Instant::now(),
        });

        self.snapshots.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(namespace.to_owned(), Arc::clone(&snapshot));
            next
        });

        Ok(count)
    }

    /// Fetch the export of `namespace` from the source and publish it.
    pub async fn sync(&self, namespace: &str) -> Result<usize> {
        self.record_attempt(namespace);
        let bytes = self.fetch(namespace).await?;
        let count = self.load(namespace, &bytes)?;
        log::info!(target: "p13n", namespace, items = count; "synced local item metadata");
        Ok(count)
    }

    fn record_attempt(&self, namespace: &str) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.insert(namespace.to_owned(), Instant::now());
        }
    }

    /// Whether `namespace` has not been attempted within `interval`.
    pub fn is_due(&self, namespace: &str, interval: Duration) -> bool {
        let Ok(attempts) = self.attempts.lock() else {
            return true;
        };
        attempts
            .get(namespace)
            .map_or(true, |last| last.elapsed() >= interval)
    }

    async fn fetch(&self, namespace: &str) -> Result<Vec<u8>> {
        let file_name = format!("{namespace}.jsonl");
        match &self.source {
            LocalDbSource::Directory(dir) => {
                let path = dir.join(file_name);
                tokio::task::spawn_blocking(move || std::fs::read(path))
                    .await
                    .map_err(|err| Error::MetadataStore(err.to_string()))?
                    .map_err(Error::from)
            }
            LocalDbSource::Url(base) => {
                let url = endpoint_url(base, &[&file_name])?;

                let response = self
                    .client
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            }
        }
    }

    /// Sync every namespace whose configuration uses `localdb` and is due.
    pub async fn sync_due(&self, config: &PersonalizationConfig) {
        for (namespace, interval) in local_db_namespaces(config) {
            if !self.is_due(&namespace, interval) {
                continue;
            }
            if let Err(err) = self.sync(&namespace).await {
                log::warn!(target: "p13n", namespace = namespace.as_str(); "local item metadata sync failed; keeping previous snapshot: {err}");
            }
        }
    }

    /// Start a background task that checks for due syncs every `check_interval`, using the
    /// configuration currently in `store`.
    ///
    /// Must be called within a tokio runtime.
    pub fn start_sync(
        self: &Arc<Self>,
        store: Arc<ConfigurationStore>,
        check_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            loop {
                interval.tick().await;
                if let Some(configuration) = store.get_configuration() {
                    this.sync_due(&configuration.config).await;
                }
            }
        })
    }
}

#[async_trait]
impl ItemMetadataStore for LocalDbStore {
    async fn get_items(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<HashMap<String, ItemMetadata>> {
        let snapshots = self.snapshots.load_full();
        let snapshot = snapshots.get(namespace).ok_or_else(|| {
            Error::MetadataStore(format!(
                "local item metadata for namespace {namespace} has not been synced"
            ))
        })?;

        log::debug!(target: "p13n", namespace, age_ms = snapshot.synced_at.elapsed().as_millis() as u64; "reading local item metadata");

        Ok(ids
            .iter()
            .filter_map(|id| Some((id.clone(), snapshot.items.get(id)?.clone())))
            .collect())
    }
}

/// Namespaces that use `localdb` anywhere in their hierarchy, with their sync interval.
fn local_db_namespaces(config: &PersonalizationConfig) -> Vec<(String, Duration)> {
    let mut out = Vec::new();

    for key in config.namespaces.keys() {
        let Ok(namespace) = config.namespace(key) else {
            continue;
        };

        let namespace_level = namespace.lineage().item_metadata();
        let uses_local_db = namespace_level
            .as_ref()
            .is_some_and(|m| m.store_type == Some(ItemMetadataType::LocalDb))
            || namespace
                .namespace
                .recommenders
                .values()
                .flat_map(|recommenders| recommenders.values())
                .any(|recommender| {
                    recommender
                        .inherited
                        .inference_item_metadata
                        .as_ref()
                        .is_some_and(|m| m.store_type == Some(ItemMetadataType::LocalDb))
                        || recommender.variations.values().any(|variation| {
                            variation
                                .inherited
                                .inference_item_metadata
                                .as_ref()
                                .is_some_and(|m| m.store_type == Some(ItemMetadataType::LocalDb))
                        })
                });

        if uses_local_db {
            let interval = namespace_level
                .and_then(|m| m.sync_interval)
                .map_or(DEFAULT_SYNC_INTERVAL, Duration::from_secs);
            out.push((namespace.key.to_owned(), interval));
        }
    }

    out
}

/// Parse a JSON-Lines export. Each line is an object with a string `id`; the remaining fields
/// are the item's metadata. Lines without an id are skipped.
fn parse_export(bytes: &[u8]) -> Result<HashMap<String, ItemMetadata>> {
    let mut items = HashMap::new();
    let mut skipped = 0usize;

    for line in bytes.split(|&b| b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let mut record: ItemMetadata = serde_json::from_slice(line)
            .map_err(|err| Error::MetadataStore(format!("invalid item metadata export: {err}")))?;

        match record.remove("id") {
            Some(Value::String(id)) => {
                items.insert(id, record);
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!(target: "p13n", skipped; "item metadata records without an id were skipped");
    }

    Ok(items)
}
