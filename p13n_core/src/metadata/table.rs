//! Item metadata read from a networked key-value table through an HTTP batch-get gateway.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::{ItemMetadata, ItemMetadataStore};
use crate::endpoint::endpoint_url;
use crate::{Error, Result};

/// Tables are named `<prefix><namespace>`.
pub const TABLE_NAME_PREFIX: &str = "PersonalizationApiItemMetadata_";

const MAX_BATCH_SIZE: usize = 50;
const MAX_TRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct HttpTableStoreConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub table_name_prefix: String,
}

impl HttpTableStoreConfig {
    pub fn new(base_url: impl Into<String>) -> HttpTableStoreConfig {
        HttpTableStoreConfig {
            base_url: base_url.into(),
            timeout: Duration::from_millis(1000),
            table_name_prefix: TABLE_NAME_PREFIX.to_owned(),
        }
    }
}

/// `POST {base}/tables/{table}/batch-get` with `{"keys": [...]}`, answered with
/// `{"items": [{"id", "attributes"}], "unprocessedKeys": [...]}`.
pub struct HttpTableStore {
    client: reqwest::Client,
    config: HttpTableStoreConfig,
}

#[derive(Serialize)]
struct BatchGetRequest<'a> {
    keys: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    items: Vec<TableRecord>,
    #[serde(default)]
    unprocessed_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TableRecord {
    id: String,
    #[serde(default)]
    attributes: ItemMetadata,
}

impl HttpTableStore {
    pub fn new(config: HttpTableStoreConfig) -> HttpTableStore {
        HttpTableStore {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn table_url(&self, namespace: &str) -> Result<Url> {
        let table = format!("{}{namespace}", self.config.table_name_prefix);
        endpoint_url(&self.config.base_url, &["tables", &table, "batch-get"])
    }

    async fn request(&self, url: &Url, keys: &[String]) -> Result<BatchGetResponse> {
        let response = self
            .client
            .post(url.clone())
            .timeout(self.config.timeout)
            .json(&BatchGetRequest { keys })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| Error::MetadataStore(err.without_url().to_string()))?;

        response
            .json()
            .await
            .map_err(|err| Error::MetadataStore(err.without_url().to_string()))
    }

    /// Fetch one chunk, retrying unprocessed keys with exponential backoff. Keys still
    /// unprocessed after the last try are left undecorated.
    async fn batch_get(&self, url: &Url, keys: Vec<String>) -> Result<Vec<TableRecord>> {
        let mut retrieved = Vec::with_capacity(keys.len());
        let mut pending = keys;
        let mut backoff = INITIAL_BACKOFF;
        let mut tries = 0;

        while tries < MAX_TRIES && !pending.is_empty() {
            let response = self.request(url, &pending).await?;
            retrieved.extend(response.items);
            pending = response.unprocessed_keys;
            tries += 1;

            if !pending.is_empty() && tries < MAX_TRIES {
                log::warn!(target: "p13n", unprocessed = pending.len(), backoff_ms = backoff.as_millis() as u64; "unprocessed item metadata keys; retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }

        Ok(retrieved)
    }
}

#[async_trait]
impl ItemMetadataStore for HttpTableStore {
    async fn get_items(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<HashMap<String, ItemMetadata>> {
        let url = self.table_url(namespace)?;
        let chunks = chunk_keys(ids);
        log::debug!(target: "p13n", namespace, keys = ids.len(), chunks = chunks.len(); "reading item metadata table");

        let results = futures::future::join_all(
            chunks
                .into_iter()
                .map(|chunk| self.batch_get(&url, chunk)),
        )
        .await;

        let mut found = HashMap::with_capacity(ids.len());
        for result in results {
            for record in result? {
                found.insert(record.id, record.attributes);
            }
        }
        Ok(found)
    }
}

/// Split keys into evenly sized chunks of at most [`MAX_BATCH_SIZE`].
fn chunk_keys(ids: &[String]) -> Vec<Vec<String>> {
    if ids.is_empty() {
        return Vec::new();
    }
    let chunk_count = ids.len().div_ceil(MAX_BATCH_SIZE);
    let chunk_size = ids.len().div_ceil(chunk_count);
    ids.chunks(chunk_size).map(<[String]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{chunk_keys, BatchGetResponse, HttpTableStore, HttpTableStoreConfig};

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn chunks_are_balanced_and_bounded() {
        assert!(chunk_keys(&[]).is_empty());
        assert_eq!(
            chunk_keys(&ids(50)).iter().map(Vec::len).collect::<Vec<_>>(),
            vec![50]
        );
        assert_eq!(
            chunk_keys(&ids(51)).iter().map(Vec::len).collect::<Vec<_>>(),
            vec![26, 25]
        );
        assert_eq!(
            chunk_keys(&ids(120)).iter().map(Vec::len).collect::<Vec<_>>(),
            vec![40, 40, 40]
        );
    }

    #[test]
    fn table_url_uses_prefix() {
        let store = HttpTableStore::new(HttpTableStoreConfig {
            timeout: Duration::from_millis(10),
            ..HttpTableStoreConfig::new("https://tables.internal/")
        });
        assert_eq!(
            store.table_url("my-store").unwrap().as_str(),
            "https://tables.internal/tables/PersonalizationApiItemMetadata_my-store/batch-get"
        );
    }

    #[test]
    fn parses_batch_get_response() {
        let response: BatchGetResponse = serde_json::from_str(
            r#"{"items": [{"id": "1", "attributes": {"name": "Shoes"}}], "unprocessedKeys": ["2"]}"#,
        )
        .unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].id, "1");
        assert_eq!(response.unprocessed_keys, vec!["2".to_owned()]);
    }
}
