//! Merging of caller-supplied context and filter parameters with derived auto-values.
//!
//! Everything here is pure: identical inputs produce identical maps, which keeps backend
//! requests (and the responses cached for them) stable.
use serde_json::{Map, Value};

use crate::config::{FilterCondition, FilterConfig};
use crate::context::AutoContext;
use crate::{Error, Result};

/// JSON object of string keys, as sent to recommendation backends.
pub type ParamMap = Map<String, Value>;

/// Merge `configured` values into `requested`. Caller-supplied keys win.
pub fn blend(
    configured: impl IntoIterator<Item = (String, Value)>,
    requested: Option<ParamMap>,
) -> ParamMap {
    let mut blended = requested.unwrap_or_default();
    for (key, value) in configured {
        blended.entry(key).or_insert(value);
    }
    blended
}

/// Backend context: caller `context` plus auto-context, one value per field. Returns `None` when
/// there is nothing to send.
pub fn blend_context(requested: Option<ParamMap>, auto: &AutoContext) -> Option<ParamMap> {
    let blended = blend(
        auto.iter()
            .map(|(field, resolved)| (field.clone(), Value::from(resolved.context_value()))),
        requested,
    );
    (!blended.is_empty()).then_some(blended)
}

/// Filter to apply to a backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSelection {
    pub arn: String,
    pub values: Option<ParamMap>,
}

/// Pick the filter ARN for a request.
///
/// A caller-named filter is resolved in the same partition, region and account as the variation
/// ARN. Otherwise the first configured filter whose condition holds is used.
pub fn select_filter_arn(
    filters: &[FilterConfig],
    requested: Option<&str>,
    variation_arn: Option<&str>,
    has_user: bool,
) -> Result<Option<String>> {
    if let Some(name) = requested {
        let prefix = variation_arn.and_then(filter_arn_prefix).ok_or_else(|| {
            Error::invalid_configuration(
                "FilterArnNotResolvable",
                "Named filters require a variation ARN to derive the filter ARN from",
            )
        })?;
        return Ok(Some(format!("{prefix}{name}")));
    }

    Ok(filters
        .iter()
        .find(|filter| match filter.condition {
            None => true,
            Some(FilterCondition::UserRequired) => has_user,
        })
        .map(|filter| filter.arn.clone()))
}

/// `arn:aws:personalize:us-east-1:123:campaign/x` → `arn:aws:personalize:us-east-1:123:filter/`
fn filter_arn_prefix(arn: &str) -> Option<String> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        return None;
    }
    Some(format!(
        "arn:{}:{}:{}:{}:filter/",
        parts[1], parts[2], parts[3], parts[4]
    ))
}

/// Combine the chosen filter with caller `filterValues` and derived dynamic filter values.
///
/// Without a filter, caller filter values are dropped.
pub fn blend_filter(
    arn: Option<String>,
    requested_values: Option<ParamMap>,
    auto: &AutoContext,
) -> Option<FilterSelection> {
    let arn = arn?;
    let values = blend(
        auto.iter()
            .map(|(parameter, resolved)| (parameter.clone(), Value::from(resolved.filter_value()))),
        requested_values,
    );

    Some(FilterSelection {
        arn,
        values: (!values.is_empty()).then_some(values),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{blend_context, blend_filter, select_filter_arn, FilterSelection, ParamMap};
    use crate::config::{FilterCondition, FilterConfig};
    use crate::context::{AutoContext, ResolvedField};

    fn auto(entries: &[(&str, &[&str], Option<&str>)]) -> AutoContext {
        entries
            .iter()
            .map(|(name, values, value_type)| {
                (
                    name.to_string(),
                    ResolvedField {
                        values: values.iter().map(|v| v.to_string()).collect(),
                        value_type: value_type.map(str::to_owned),
                    },
                )
            })
            .collect()
    }

    fn map(value: serde_json::Value) -> ParamMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn caller_context_wins_per_key() {
        let auto = auto(&[
            ("deviceType", &["Phone"], None),
            ("timeOfDay", &["Night"], None),
        ]);

        let blended = blend_context(Some(map(json!({"deviceType": "TV"}))), &auto).unwrap();
        assert_eq!(
            blended,
            map(json!({"deviceType": "TV", "timeOfDay": "Night"}))
        );
    }

    #[test]
    fn empty_context_is_none() {
        assert_eq!(blend_context(None, &AutoContext::new()), None);
    }

    #[test]
    fn blending_is_deterministic() {
        let auto = auto(&[("b", &["2"], None), ("a", &["1"], None)]);

        let first = serde_json::to_string(&blend_context(None, &auto)).unwrap();
        let second = serde_json::to_string(&blend_context(None, &auto)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, r#"{"a":"1","b":"2"}"#);
    }

    #[test]
    fn first_applicable_filter_is_selected() {
        let filters = vec![
            FilterConfig {
                arn: "arn:user-filter".to_owned(),
                condition: Some(FilterCondition::UserRequired),
            },
            FilterConfig {
                arn: "arn:any-filter".to_owned(),
                condition: None,
            },
        ];

        assert_eq!(
            select_filter_arn(&filters, None, None, true).unwrap(),
            Some("arn:user-filter".to_owned())
        );
        assert_eq!(
            select_filter_arn(&filters, None, None, false).unwrap(),
            Some("arn:any-filter".to_owned())
        );
        assert_eq!(select_filter_arn(&[], None, None, true).unwrap(), None);
    }

    #[test]
    fn named_filter_derives_arn_from_variation() {
        let arn = select_filter_arn(
            &[],
            Some("exclude-purchased"),
            Some("arn:aws:personalize:us-east-1:123456789012:campaign/rfy"),
            true,
        )
        .unwrap();

        assert_eq!(
            arn,
            Some("arn:aws:personalize:us-east-1:123456789012:filter/exclude-purchased".to_owned())
        );
    }

    #[test]
    fn named_filter_without_variation_arn_fails() {
        let err = select_filter_arn(&[], Some("f"), None, true).unwrap_err();
        assert_eq!(err.code(), "FilterArnNotResolvable");
    }

    #[test]
    fn dynamic_filter_values_quote_strings() {
        let auto = auto(&[
            ("GENRES", &["Comedy", "Drama"], Some("string")),
            ("MAX_PRICE", &["20"], None),
        ]);

        let selection = blend_filter(
            Some("arn:filter".to_owned()),
            Some(map(json!({"MAX_PRICE": "10"}))),
            &auto,
        );

        assert_eq!(
            selection,
            Some(FilterSelection {
                arn: "arn:filter".to_owned(),
                values: Some(map(json!({
                    "GENRES": "\"Comedy\",\"Drama\"",
                    "MAX_PRICE": "10"
                }))),
            })
        );
    }

    #[test]
    fn no_filter_drops_values() {
        let selection = blend_filter(None, Some(map(json!({"A": "1"}))), &AutoContext::new());
        assert_eq!(selection, None);
    }
}
