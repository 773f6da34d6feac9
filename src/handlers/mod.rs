// Declare submodules
pub mod events;
pub mod health;
pub mod recommendations;

mod headers;

// Re-export items to make them more convenient to use
pub use events::handle_events;
pub use health::handle_health;
pub use headers::CONFIG_VERSION_HEADER;
pub use recommendations::{
    handle_recommend_items, handle_related_items, handle_rerank_items, handle_rerank_items_body,
};
