use serde_json::Map;

use crate::response::RecommendationResponse;

/// `GENRE_NAME` → `genreName`.
pub fn schema_to_response_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;

    for c in name.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }

    out
}

/// Rename metadata returned inline by the backend to response case.
pub fn rename_inline_metadata(response: &mut RecommendationResponse) {
    for item in response.items_mut() {
        if let Some(metadata) = item.metadata.take() {
            let renamed: Map<_, _> = metadata
                .into_iter()
                .map(|(key, value)| (schema_to_response_case(&key), value))
                .collect();
            item.metadata = Some(renamed);
        }
    }
}
