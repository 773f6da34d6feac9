//! Item metadata decoration.
//!
//! Metadata comes from one of three places, chosen per namespace (or narrower) by
//! `inferenceItemMetadata.type`:
//! - `localdb`: an in-process snapshot of a bulk export, refreshed in the background;
//! - `dynamodb`: a networked key-value table;
//! - `personalize`: columns returned inline by the recommendation backend.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::{ItemMetadataConfig, ItemMetadataType};
use crate::response::RecommendationResponse;
use crate::Result;

mod inline;
mod local_db;
mod table;

pub use inline::{rename_inline_metadata, schema_to_response_case};
pub use local_db::{LocalDbSource, LocalDbStore, DEFAULT_SYNC_INTERVAL};
pub use table::{HttpTableStore, HttpTableStoreConfig, TABLE_NAME_PREFIX};

/// Item attributes, keyed by attribute name.
pub type ItemMetadata = Map<String, Value>;

/// Read side of an item metadata store.
#[async_trait]
pub trait ItemMetadataStore: Send + Sync {
    /// Look up metadata for `ids` in `namespace`. Ids without metadata are absent from the result.
    async fn get_items(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<HashMap<String, ItemMetadata>>;
}

/// Attaches metadata to recommended items.
#[derive(Default, Clone)]
pub struct ItemMetadataDecorator {
    local_db: Option<Arc<dyn ItemMetadataStore>>,
    table: Option<Arc<dyn ItemMetadataStore>>,
}

impl ItemMetadataDecorator {
    pub fn new() -> ItemMetadataDecorator {
        ItemMetadataDecorator::default()
    }

    pub fn with_local_db(mut self, store: Arc<dyn ItemMetadataStore>) -> ItemMetadataDecorator {
        self.local_db = Some(store);
        self
    }

    pub fn with_table(mut self, store: Arc<dyn ItemMetadataStore>) -> ItemMetadataDecorator {
        self.table = Some(store);
        self
    }

    /// Decorate `response` in place.
    ///
    /// Store failures never fail the request: the items are returned without metadata.
    pub async fn decorate(
        &self,
        namespace: &str,
        config: Option<&ItemMetadataConfig>,
        response: &mut RecommendationResponse,
    ) {
        let Some(store_type) = config.and_then(|config| config.store_type) else {
            return;
        };

        let store = match store_type {
            ItemMetadataType::Inline => {
                rename_inline_metadata(response);
                return;
            }
            ItemMetadataType::LocalDb => &self.local_db,
            ItemMetadataType::Table => &self.table,
        };

        let Some(store) = store else {
            log::warn!(target: "p13n", namespace; "item metadata store is not configured; items returned without metadata");
            return;
        };

        if let Err(err) = decorate_from(store.as_ref(), namespace, response).await {
            log::warn!(target: "p13n", namespace; "item metadata lookup failed; items returned without metadata: {err}");
        }
    }
}

async fn decorate_from(
    store: &dyn ItemMetadataStore,
    namespace: &str,
    response: &mut RecommendationResponse,
) -> Result<()> {
    let ids: Vec<String> = {
        let mut seen = HashSet::new();
        response
            .items()
            .iter()
            .filter(|item| seen.insert(item.item_id.as_str()))
            .map(|item| item.item_id.clone())
            .collect()
    };

    if ids.is_empty() {
        return Ok(());
    }

    let found = store.get_items(namespace, &ids).await?;
    log::debug!(target: "p13n", namespace, requested = ids.len(), found = found.len(); "looked up item metadata");

    // Duplicate ids are all decorated.
    for item in response.items_mut() {
        if let Some(metadata) = found.get(&item.item_id) {
            item.metadata = Some(metadata.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use super::{ItemMetadata, ItemMetadataDecorator, ItemMetadataStore};
    use crate::config::{ItemMetadataConfig, ItemMetadataType};
    use crate::response::{RecommendationResponse, RecommendedItem};
    use crate::{Error, Result};

    struct MapStore {
        items: HashMap<String, ItemMetadata>,
        requested: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl MapStore {
        fn new(fail: bool) -> Arc<MapStore> {
            let mut items = HashMap::new();
            items.insert(
                "1".to_owned(),
                json!({"name": "Shoes"}).as_object().unwrap().clone(),
            );
            Arc::new(MapStore {
                items,
                requested: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl ItemMetadataStore for MapStore {
        async fn get_items(
            &self,
            _namespace: &str,
            ids: &[String],
        ) -> Result<HashMap<String, ItemMetadata>> {
            self.requested.lock().unwrap().push(ids.to_vec());
            if self.fail {
                return Err(Error::MetadataStore("throttled".to_owned()));
            }
            Ok(ids
                .iter()
                .filter_map(|id| Some((id.clone(), self.items.get(id)?.clone())))
                .collect())
        }
    }

    fn response() -> RecommendationResponse {
        RecommendationResponse::from_items(vec![
            RecommendedItem::new("1", Some(0.9)),
            RecommendedItem::new("2", Some(0.5)),
            RecommendedItem::new("1", Some(0.1)),
        ])
    }

    fn config(store_type: ItemMetadataType) -> ItemMetadataConfig {
        ItemMetadataConfig {
            store_type: Some(store_type),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn present_items_get_metadata_absent_items_do_not() {
        let store = MapStore::new(false);
        let decorator = ItemMetadataDecorator::new().with_local_db(store.clone());
        let mut response = response();

        decorator
            .decorate("my-store", Some(&config(ItemMetadataType::LocalDb)), &mut response)
            .await;

        let items = response.items();
        assert_eq!(items[0].metadata, Some(json!({"name": "Shoes"}).as_object().unwrap().clone()));
        assert_eq!(items[1].metadata, None);
        assert_eq!(items[2].metadata, items[0].metadata);
        // Unique ids only.
        assert_eq!(
            *store.requested.lock().unwrap(),
            vec![vec!["1".to_owned(), "2".to_owned()]]
        );
    }

    #[tokio::test]
    async fn store_failure_leaves_items_undecorated() {
        let decorator = ItemMetadataDecorator::new().with_table(MapStore::new(true));
        let mut response = response();

        decorator
            .decorate("my-store", Some(&config(ItemMetadataType::Table)), &mut response)
            .await;

        assert!(response.items().iter().all(|item| item.metadata.is_none()));
    }

    #[tokio::test]
    async fn no_config_means_no_lookup() {
        let store = MapStore::new(false);
        let decorator = ItemMetadataDecorator::new().with_local_db(store.clone());
        let mut response = response();

        decorator.decorate("my-store", None, &mut response).await;

        assert!(store.requested.lock().unwrap().is_empty());
        assert!(response.items().iter().all(|item| item.metadata.is_none()));
    }
}
