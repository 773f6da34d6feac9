//! Lookups into a [`PersonalizationConfig`] and inheritance of attributes along the
//! root → namespace → recommender → variation hierarchy.
//!
//! Each logical field walks the hierarchy independently, nearest level first. A recommender may
//! define `cacheControl.userSpecified.maxAge` while `directives` still comes from its namespace.
use super::models::{
    ActionType, AutoValueField, CacheControl, CacheProfile, CacheProfileKind, FilterConfig,
    InheritedAttributes, ItemMetadataConfig, Namespace, PersonalizationConfig, Recommender,
    Variation,
};
use crate::{Error, Result};

impl PersonalizationConfig {
    /// Look up a namespace by its URL key.
    pub fn namespace<'a>(&'a self, key: &str) -> Result<ResolvedNamespace<'a>> {
        let (key, namespace) = self
            .namespaces
            .get_key_value(key)
            .and_then(|(k, ns)| Option::<&Namespace>::from(ns).map(|ns| (k, ns)))
            .ok_or_else(|| {
                Error::not_found(
                    "NamespaceNotFound",
                    "Namespace configuration not found for this namespace path",
                )
            })?;

        Ok(ResolvedNamespace {
            key,
            namespace,
            root: &self.inherited,
        })
    }

    /// Look up a recommender under `(namespace, action)`.
    pub fn recommender<'a>(
        &'a self,
        namespace: &str,
        action: ActionType,
        recommender: &str,
    ) -> Result<ResolvedRecommender<'a>> {
        let not_configured = || {
            Error::not_found(
                "RecommenderNotConfigured",
                "Recommender not configured for this namespace and recommender path",
            )
        };

        let namespace = self.namespace(namespace).map_err(|_| not_configured())?;
        namespace
            .recommender(action, recommender)
            .ok_or_else(not_configured)
    }
}

/// A namespace together with the root it inherits from.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedNamespace<'a> {
    pub key: &'a str,
    pub namespace: &'a Namespace,
    root: &'a InheritedAttributes,
}

impl<'a> ResolvedNamespace<'a> {
    pub fn recommender(&self, action: ActionType, key: &str) -> Option<ResolvedRecommender<'a>> {
        let (key, recommender) = self
            .namespace
            .recommenders
            .get(&action)?
            .get_key_value(key)?;

        Some(ResolvedRecommender {
            namespace: *self,
            action,
            key,
            recommender,
        })
    }

    /// Find a recommender by key under any action type.
    pub fn find_recommender(&self, key: &str) -> Option<ResolvedRecommender<'a>> {
        ActionType::ALL
            .iter()
            .find_map(|&action| self.recommender(action, key))
    }

    pub fn lineage(&self) -> Lineage<'a> {
        Lineage {
            levels: vec![&self.namespace.inherited, self.root],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedRecommender<'a> {
    pub namespace: ResolvedNamespace<'a>,
    pub action: ActionType,
    pub key: &'a str,
    pub recommender: &'a Recommender,
}

impl<'a> ResolvedRecommender<'a> {
    pub fn variation(&self, key: &str) -> Option<ResolvedVariation<'a>> {
        let (key, variation) = self.recommender.variations.get_key_value(key)?;
        Some(ResolvedVariation {
            recommender: *self,
            key,
            variation,
        })
    }

    /// Variation at `idx` in declaration order.
    pub fn variation_at(&self, idx: usize) -> Option<ResolvedVariation<'a>> {
        let (key, variation) = self.recommender.variations.get_index(idx)?;
        Some(ResolvedVariation {
            recommender: *self,
            key,
            variation,
        })
    }

    /// The first declared variation.
    pub fn default_variation(&self) -> Result<ResolvedVariation<'a>> {
        self.variation_at(0).ok_or_else(|| {
            Error::not_found(
                "NoVariationsConfigured",
                "Recommender does not have any variations configured",
            )
        })
    }

    pub fn lineage(&self) -> Lineage<'a> {
        let mut lineage = self.namespace.lineage();
        lineage.levels.insert(0, &self.recommender.inherited);
        lineage
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedVariation<'a> {
    pub recommender: ResolvedRecommender<'a>,
    pub key: &'a str,
    pub variation: &'a Variation,
}

impl<'a> ResolvedVariation<'a> {
    pub fn lineage(&self) -> Lineage<'a> {
        let mut lineage = self.recommender.lineage();
        lineage.levels.insert(0, &self.variation.inherited);
        lineage
    }
}

/// Ordered chain of attribute levels, nearest first.
#[derive(Debug, Clone)]
pub struct Lineage<'a> {
    levels: Vec<&'a InheritedAttributes>,
}

impl<'a> Lineage<'a> {
    fn nearest<T: ?Sized>(
        &self,
        f: impl Fn(&'a InheritedAttributes) -> Option<&'a T>,
    ) -> Option<&'a T> {
        self.levels.iter().find_map(|&level| f(level))
    }

    /// Resolve every cache profile field independently.
    pub fn cache_control(&self) -> CacheControl {
        let profile = |kind: CacheProfileKind| {
            let field = |get: fn(&CacheProfile) -> bool| {
                self.nearest(|level| {
                    let profile = level.cache_control.as_ref()?.profile(kind)?;
                    get(profile).then_some(profile)
                })
            };

            let max_age = field(|p| p.max_age.is_some()).and_then(|p| p.max_age);
            let directives = field(|p| p.directives.is_some()).and_then(|p| p.directives.clone());

            (max_age.is_some() || directives.is_some()).then_some(CacheProfile {
                max_age,
                directives,
            })
        };

        CacheControl {
            user_specified: profile(CacheProfileKind::UserSpecified),
            synthetic_user_specified: profile(CacheProfileKind::SyntheticUserSpecified),
            no_user_specified: profile(CacheProfileKind::NoUserSpecified),
        }
    }

    /// Resolve the item metadata source field by field. Returns `None` when no level names a
    /// store type.
    pub fn item_metadata(&self) -> Option<ItemMetadataConfig> {
        let store_type = self
            .levels
            .iter()
            .find_map(|level| level.inference_item_metadata.as_ref()?.store_type)?;
        let sync_interval = self
            .levels
            .iter()
            .find_map(|level| level.inference_item_metadata.as_ref()?.sync_interval);
        let item_columns = self.nearest(|level| {
            level
                .inference_item_metadata
                .as_ref()?
                .item_columns
                .as_deref()
        });

        Some(ItemMetadataConfig {
            store_type: Some(store_type),
            sync_interval,
            item_columns: item_columns.map(|columns| columns.to_vec()),
        })
    }

    /// Resolve auto-context fields by field name. Field order follows first declaration, walking
    /// from the root down.
    pub fn auto_context(&self) -> Vec<(&'a str, &'a AutoValueField)> {
        let mut fields: Vec<(&'a str, &'a AutoValueField)> = Vec::new();

        for &level in self.levels.iter().rev() {
            let Some(auto_context) = &level.auto_context else {
                continue;
            };
            for (name, field) in auto_context.iter() {
                match fields.iter_mut().find(|(existing, _)| *existing == name) {
                    Some(slot) => slot.1 = field,
                    None => fields.push((name, field)),
                }
            }
        }

        fields
    }

    /// Filters are an ordered list and are inherited as a whole.
    pub fn filters(&self) -> &'a [FilterConfig] {
        self.nearest(|level| level.filters.as_deref())
            .unwrap_or_default()
    }
}
