//! Typed configuration document and hierarchical attribute resolution.
mod models;
mod ordered_map;
mod resolve;

pub use models::*;
pub use ordered_map::OrderedMap;
pub use resolve::{Lineage, ResolvedNamespace, ResolvedRecommender, ResolvedVariation};
