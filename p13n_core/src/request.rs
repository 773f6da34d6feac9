//! Query string and body parameters shared by the recommendation endpoints.
use std::collections::BTreeMap;

use serde_json::Value;

use crate::blend::ParamMap;
use crate::{Error, Result};

pub const DEFAULT_NUM_RESULTS: usize = 25;

/// Parsed query parameters of a recommendation request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
    pub num_results: usize,
    /// Name of a filter to apply instead of the configured ones.
    pub filter: Option<String>,
    pub filter_values: Option<ParamMap>,
    pub context: Option<ParamMap>,
    /// Whether items should carry metadata. Part of the response identity, so it must be part of
    /// any cache key.
    pub decorate_items: bool,
    pub synthetic_user: bool,
    /// Experiment feature to evaluate.
    pub feature: Option<String>,
    /// Optional user for `related-items`.
    pub user_id: Option<String>,
    /// Every query parameter as received.
    pub query: BTreeMap<String, String>,
}

impl Default for RequestParams {
    fn default() -> Self {
        RequestParams {
            num_results: DEFAULT_NUM_RESULTS,
            filter: None,
            filter_values: None,
            context: None,
            decorate_items: true,
            synthetic_user: false,
            feature: None,
            user_id: None,
            query: BTreeMap::new(),
        }
    }
}

impl RequestParams {
    /// Parse recommendation query parameters.
    ///
    /// # Errors
    ///
    /// `Validation` with code `InvalidNumResults`, `InvalidFilterParameter` or
    /// `InvalidContextParameter`.
    pub fn from_query(query: BTreeMap<String, String>) -> Result<RequestParams> {
        let num_results = match query.get("numResults") {
            None => DEFAULT_NUM_RESULTS,
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n >= 1)
                .ok_or_else(|| {
                    Error::validation(
                        "InvalidNumResults",
                        "numResults must be an integer greater than or equal to 1",
                    )
                })?,
        };

        let filter_values = json_object_param(
            &query,
            "filterValues",
            "InvalidFilterParameter",
            "filterValues must be a JSON object",
        )?;
        let context = json_object_param(
            &query,
            "context",
            "InvalidContextParameter",
            "context must be a JSON object",
        )?;

        Ok(RequestParams {
            num_results,
            filter: non_empty(&query, "filter"),
            filter_values,
            context,
            decorate_items: query.get("decorateItems").map_or(true, |v| is_truthy(v)),
            synthetic_user: query.get("syntheticUser").is_some_and(|v| is_truthy(v)),
            feature: non_empty(&query, "feature"),
            user_id: non_empty(&query, "userId"),
            query,
        })
    }
}

/// `1`, `yes` and `true`, in any case.
pub fn is_truthy(value: &str) -> bool {
    ["1", "yes", "true"]
        .iter()
        .any(|truthy| value.trim().eq_ignore_ascii_case(truthy))
}

fn non_empty(query: &BTreeMap<String, String>, key: &str) -> Option<String> {
    query
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn json_object_param(
    query: &BTreeMap<String, String>,
    key: &str,
    code: &'static str,
    message: &'static str,
) -> Result<Option<ParamMap>> {
    let Some(raw) = query.get(key).filter(|raw| !raw.trim().is_empty()) else {
        return Ok(None);
    };

    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        _ => Err(Error::validation(code, message)),
    }
}

/// Item ids from a comma-delimited path segment. Blank entries are dropped.
pub fn parse_item_ids(raw: &str) -> Result<Vec<String>> {
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect();

    if ids.is_empty() {
        return Err(Error::validation(
            "InvalidItemList",
            "At least one item id is required",
        ));
    }
    Ok(ids)
}

/// Item ids from a rerank request body, which must be a JSON array of strings.
pub fn parse_item_list_body(body: &[u8]) -> Result<Vec<String>> {
    let invalid = || {
        Error::validation(
            "InvalidRequestPayload",
            "Request body must be a JSON array of item ids",
        )
    };

    let ids: Vec<String> = serde_json::from_slice(body).map_err(|_| invalid())?;
    if ids.is_empty() {
        return Err(invalid());
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let params = RequestParams::from_query(BTreeMap::new()).unwrap();
        assert_eq!(params, RequestParams::default());
        assert_eq!(params.num_results, 25);
        assert!(params.decorate_items);
        assert!(!params.synthetic_user);
    }

    #[test]
    fn parses_every_parameter() {
        let params = RequestParams::from_query(query(&[
            ("numResults", "5"),
            ("filter", "in-stock"),
            ("filterValues", r#"{"CATEGORY": "\"shoes\""}"#),
            ("context", r#"{"DEVICE": "Phone"}"#),
            ("decorateItems", "No"),
            ("syntheticUser", "YES"),
            ("feature", "rfy-test"),
            ("userId", "u1"),
        ]))
        .unwrap();

        assert_eq!(params.num_results, 5);
        assert_eq!(params.filter.as_deref(), Some("in-stock"));
        assert_eq!(
            params.filter_values,
            Some(json!({"CATEGORY": "\"shoes\""}).as_object().unwrap().clone())
        );
        assert_eq!(
            params.context,
            Some(json!({"DEVICE": "Phone"}).as_object().unwrap().clone())
        );
        assert!(!params.decorate_items);
        assert!(params.synthetic_user);
        assert_eq!(params.feature.as_deref(), Some("rfy-test"));
        assert_eq!(params.user_id.as_deref(), Some("u1"));
        assert_eq!(params.query.len(), 8);
    }

    #[test]
    fn rejects_bad_num_results() {
        for raw in ["0", "-3", "ten", ""] {
            let err = RequestParams::from_query(query(&[("numResults", raw)])).unwrap_err();
            assert_eq!(err.code(), "InvalidNumResults", "numResults={raw}");
        }
    }

    #[test]
    fn rejects_non_object_json() {
        let err = RequestParams::from_query(query(&[("context", "[1, 2]")])).unwrap_err();
        assert_eq!(err.code(), "InvalidContextParameter");

        let err = RequestParams::from_query(query(&[("filterValues", "{oops")])).unwrap_err();
        assert_eq!(err.code(), "InvalidFilterParameter");
    }

    #[test]
    fn truthiness() {
        for value in ["1", "yes", "TRUE", " true "] {
            assert!(is_truthy(value), "{value}");
        }
        for value in ["0", "no", "false", "", "y"] {
            assert!(!is_truthy(value), "{value}");
        }
    }

    #[test]
    fn item_ids() {
        assert_eq!(parse_item_ids("a, b,,c").unwrap(), vec!["a", "b", "c"]);
        assert!(parse_item_ids(" , ").is_err());

        assert_eq!(
            parse_item_list_body(br#"["a", "b"]"#).unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(
            parse_item_list_body(br#"{"items": ["a"]}"#).unwrap_err().code(),
            "InvalidRequestPayload"
        );
        assert!(parse_item_list_body(b"[]").is_err());
    }
}
