use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use super::rules::{json_to_string, SignalValue};
use crate::config::{AutoValueField, AutoValueRule, RuleSignal};

/// Header naming the viewer's IANA time zone.
pub const VIEWER_TIME_ZONE_HEADER: &str = "cloudfront-viewer-time-zone";
/// Header carrying the viewer's latitude. Negative latitude flips the season.
pub const VIEWER_LATITUDE_HEADER: &str = "cloudfront-viewer-latitude";

/// Inputs available to auto-context rules: request headers and the request time.
#[derive(Debug, Clone)]
pub struct RequestSignals {
    /// Keyed by lower-cased header name.
    headers: HashMap<String, String>,
    now: DateTime<Utc>,
}

impl RequestSignals {
    pub fn new(now: DateTime<Utc>) -> RequestSignals {
        RequestSignals {
            headers: HashMap::new(),
            now,
        }
    }

    pub fn from_headers<K, V>(headers: impl IntoIterator<Item = (K, V)>, now: DateTime<Utc>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        RequestSignals {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
            now,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Request time in the viewer's time zone. Unknown or absent time zones fall back to UTC.
    fn local_time(&self) -> DateTime<Tz> {
        let tz = self
            .header(VIEWER_TIME_ZONE_HEADER)
            .and_then(|name| match name.parse::<Tz>() {
                Ok(tz) => Some(tz),
                Err(_) => {
                    log::debug!(target: "p13n", time_zone = name; "unknown viewer time zone, using UTC");
                    None
                }
            })
            .unwrap_or(Tz::UTC);
        tz.from_utc_datetime(&self.now.naive_utc())
    }

    fn latitude(&self) -> Option<f64> {
        self.header(VIEWER_LATITUDE_HEADER)?.parse().ok()
    }

    fn read(&self, signal: &RuleSignal) -> Option<SignalValue> {
        match signal {
            RuleSignal::HeaderValue { header } => {
                Some(self.header(header)?.to_owned().into())
            }
            RuleSignal::HourOfDay => Some(f64::from(self.local_time().hour()).into()),
            RuleSignal::DayOfWeek => Some(
                f64::from(self.local_time().weekday().num_days_from_monday()).into(),
            ),
            RuleSignal::SeasonOfYear => {
                let now = self.local_time();
                Some(f64::from(season(now.month(), now.day(), self.latitude()).index()).into())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Spring = 0,
    Summer = 1,
    Fall = 2,
    Winter = 3,
}

impl Season {
    pub fn index(&self) -> u8 {
        *self as u8
    }

    fn opposite(&self) -> Season {
        match self {
            Season::Spring => Season::Fall,
            Season::Summer => Season::Winter,
            Season::Fall => Season::Spring,
            Season::Winter => Season::Summer,
        }
    }
}

/// Season for a calendar day. Southern hemisphere (negative latitude) gets the opposite season.
pub fn season(month: u32, day: u32, latitude: Option<f64>) -> Season {
    let md = month * 100 + day;

    let season = if md > 320 && md < 621 {
        Season::Spring
    } else if md > 620 && md < 923 {
        Season::Summer
    } else if md > 922 && md < 1223 {
        Season::Fall
    } else {
        Season::Winter
    };

    match latitude {
        Some(latitude) if latitude < 0.0 => season.opposite(),
        _ => season,
    }
}

/// Values derived for one auto-context field.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    /// Matched values in evaluation order. A value matched twice appears once, at the position of
    /// its last match.
    pub values: Vec<String>,
    /// Declared type of the field.
    pub value_type: Option<String>,
}

impl ResolvedField {
    fn is_string(&self) -> bool {
        self.value_type.as_deref() == Some("string")
    }

    /// Single value injected into a context map. The last match wins.
    pub fn context_value(&self) -> &str {
        self.values.last().map(String::as_str).unwrap_or_default()
    }

    /// Value injected into dynamic filter parameters. String fields render every value quoted and
    /// comma-separated.
    pub fn filter_value(&self) -> String {
        if self.is_string() {
            self.values
                .iter()
                .map(|value| format!("\"{value}\""))
                .collect::<Vec<_>>()
                .join(",")
        } else {
            self.context_value().to_owned()
        }
    }

    /// Value merged into event properties. String fields join every value with `|`.
    pub fn event_property(&self) -> String {
        if self.is_string() {
            self.values.join("|")
        } else {
            self.context_value().to_owned()
        }
    }
}

/// Field name to derived values. Ordered so the output is deterministic.
pub type AutoContext = BTreeMap<String, ResolvedField>;

/// Derive every declared field from request signals.
///
/// A field that matches no rule and has no default is absent from the output.
pub fn derive_context<'a>(
    fields: impl IntoIterator<Item = (&'a str, &'a AutoValueField)>,
    signals: &RequestSignals,
) -> AutoContext {
    fields
        .into_iter()
        .filter_map(|(name, field)| {
            let resolved = derive_field(field, signals)?;
            log::debug!(target: "p13n", field = name, value = resolved.context_value(); "derived auto-context field");
            Some((name.to_owned(), resolved))
        })
        .collect()
}

fn derive_field(field: &AutoValueField, signals: &RequestSignals) -> Option<ResolvedField> {
    let mut values: Vec<String> = Vec::new();

    for rule in &field.rules {
        let Some(value) = rule.resolve(signals) else {
            continue;
        };

        values.retain(|existing| *existing != value);
        values.push(value);

        if !field.evaluate_all {
            break;
        }
    }

    if values.is_empty() {
        values.push(json_to_string(field.default.as_ref()?));
    }

    Some(ResolvedField {
        values,
        value_type: field.value_type.clone(),
    })
}

impl AutoValueRule {
    /// First matching mapping wins. A rule without mappings passes the signal through.
    fn resolve(&self, signals: &RequestSignals) -> Option<String> {
        let signal = signals.read(&self.signal)?;

        let value = if self.value_mappings.is_empty() {
            signal.to_string()
        } else {
            self.value_mappings
                .iter()
                .find_map(|mapping| mapping.apply(&signal))?
        };

        (!value.is_empty()).then_some(value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{derive_context, season, RequestSignals, Season};
    use crate::config::{AutoValueField, OrderedMap};

    fn fields(json: &str) -> OrderedMap<AutoValueField> {
        serde_json::from_str(json).unwrap()
    }

    fn device_type() -> OrderedMap<AutoValueField> {
        fields(
            r#"{"deviceType": {
                "type": "string",
                "default": "Desktop",
                "evaluateAll": true,
                "rules": [
                    {"type": "header-value", "header": "cloudfront-is-desktop-viewer",
                     "valueMappings": [{"operator": "equals", "value": "true", "mapTo": "Desktop"}]},
                    {"type": "header-value", "header": "cloudfront-is-mobile-viewer",
                     "valueMappings": [{"operator": "equals", "value": "true", "mapTo": "Phone"}]},
                    {"type": "header-value", "header": "cloudfront-is-smarttv-viewer",
                     "valueMappings": [{"operator": "equals", "value": "true", "mapTo": "TV"}]},
                    {"type": "header-value", "header": "cloudfront-is-tablet-viewer",
                     "valueMappings": [{"operator": "equals", "value": "true", "mapTo": "Tablet"}]}
                ]
            }}"#,
        )
    }

    fn time_of_day() -> OrderedMap<AutoValueField> {
        fields(
            r#"{"timeOfDay": {
                "type": "string",
                "evaluateAll": false,
                "rules": [{"type": "hour-of-day", "valueMappings": [
                    {"operator": "less-than", "value": 4, "mapTo": "Night"},
                    {"operator": "less-than", "value": 11, "mapTo": "Morning"},
                    {"operator": "less-than", "value": 18, "mapTo": "Afternoon"},
                    {"operator": "less-than", "value": 22, "mapTo": "Evening"},
                    {"operator": "greater-than", "value": 21, "mapTo": "Night"}
                ]}]
            }}"#,
        )
    }

    fn at(hour: u32) -> RequestSignals {
        RequestSignals::new(Utc.with_ymd_and_hms(2024, 5, 14, hour, 30, 0).unwrap())
    }

    #[test]
    fn desktop_only() {
        let signals = at(12)
            .with_header("cloudfront-is-desktop-viewer", "true")
            .with_header("cloudfront-is-mobile-viewer", "false")
            .with_header("cloudfront-is-smarttv-viewer", "false")
            .with_header("cloudfront-is-tablet-viewer", "false");

        let context = derive_context(device_type().iter(), &signals);
        assert_eq!(context["deviceType"].values, vec!["Desktop"]);
    }

    #[test]
    fn evaluate_all_collects_matches_last_wins() {
        let signals = at(12)
            .with_header("cloudfront-is-desktop-viewer", "false")
            .with_header("cloudfront-is-mobile-viewer", "true")
            .with_header("cloudfront-is-smarttv-viewer", "false")
            .with_header("cloudfront-is-tablet-viewer", "true");

        let context = derive_context(device_type().iter(), &signals);
        let field = &context["deviceType"];
        assert_eq!(field.values, vec!["Phone", "Tablet"]);
        assert_eq!(field.context_value(), "Tablet");
        assert_eq!(field.filter_value(), r#""Phone","Tablet""#);
        assert_eq!(field.event_property(), "Phone|Tablet");
    }

    #[test]
    fn evaluate_all_without_matches_uses_default() {
        let signals = at(12)
            .with_header("cloudfront-is-desktop-viewer", "false")
            .with_header("cloudfront-is-mobile-viewer", "false")
            .with_header("cloudfront-is-smarttv-viewer", "false")
            .with_header("cloudfront-is-tablet-viewer", "false");

        let context = derive_context(device_type().iter(), &signals);
        assert_eq!(context["deviceType"].values, vec!["Desktop"]);
    }

    #[test]
    fn first_matching_mapping_wins() {
        let context = derive_context(time_of_day().iter(), &at(2));
        assert_eq!(context["timeOfDay"].values, vec!["Night"]);

        let context = derive_context(time_of_day().iter(), &at(9));
        assert_eq!(context["timeOfDay"].values, vec!["Morning"]);

        let context = derive_context(time_of_day().iter(), &at(23));
        assert_eq!(context["timeOfDay"].values, vec!["Night"]);
    }

    #[test]
    fn hour_uses_viewer_time_zone() {
        // 02:30 UTC is 19:30 the previous day in Los Angeles (PDT).
        let signals = at(2).with_header("cloudfront-viewer-time-zone", "America/Los_Angeles");

        let context = derive_context(time_of_day().iter(), &signals);
        assert_eq!(context["timeOfDay"].values, vec!["Evening"]);
    }

    #[test]
    fn unknown_time_zone_falls_back_to_utc() {
        let signals = at(2).with_header("cloudfront-viewer-time-zone", "Mars/Olympus_Mons");

        let context = derive_context(time_of_day().iter(), &signals);
        assert_eq!(context["timeOfDay"].values, vec!["Night"]);
    }

    #[test]
    fn evaluate_all_false_stops_at_first_resolving_rule() {
        let fields = fields(
            r#"{"channel": {"rules": [
                {"type": "header-value", "header": "x-missing"},
                {"type": "header-value", "header": "x-first"},
                {"type": "header-value", "header": "x-second"}
            ]}}"#,
        );
        let signals = at(12)
            .with_header("x-first", "one")
            .with_header("x-second", "two");

        let context = derive_context(fields.iter(), &signals);
        assert_eq!(context["channel"].values, vec!["one"]);
    }

    #[test]
    fn passthrough_keeps_header_case() {
        let fields = fields(
            r#"{"city": {"type": "string", "rules": [
                {"type": "header-value", "header": "cloudfront-viewer-city"}
            ]}}"#,
        );
        let signals = at(12).with_header("CloudFront-Viewer-City", " San Francisco ");

        let context = derive_context(fields.iter(), &signals);
        assert_eq!(context["city"].values, vec!["San Francisco"]);
    }

    #[test]
    fn missing_signal_without_default_is_absent() {
        let fields = fields(
            r#"{"metroCode": {"rules": [
                {"type": "header-value", "header": "cloudfront-viewer-metro-code"}
            ]}}"#,
        );

        let context = derive_context(fields.iter(), &at(12));
        assert!(context.is_empty());
    }

    #[test]
    fn day_of_week_starts_monday() {
        let fields = fields(
            r#"{"dayOfWeek": {"rules": [{"type": "day-of-week", "valueMappings": [
                {"operator": "equals", "value": 0, "mapTo": "Monday"},
                {"operator": "equals", "value": 1, "mapTo": "Tuesday"}
            ]}]}}"#,
        );

        // 2024-05-14 is a Tuesday.
        let context = derive_context(fields.iter(), &at(12));
        assert_eq!(context["dayOfWeek"].values, vec!["Tuesday"]);
    }

    #[test]
    fn seasons() {
        assert_eq!(season(3, 20, None), Season::Winter);
        assert_eq!(season(3, 21, None), Season::Spring);
        assert_eq!(season(6, 21, None), Season::Summer);
        assert_eq!(season(9, 23, None), Season::Fall);
        assert_eq!(season(12, 23, None), Season::Winter);
        assert_eq!(season(1, 15, None), Season::Winter);
    }

    #[test]
    fn southern_hemisphere_flips_season() {
        assert_eq!(season(1, 15, Some(-33.9)), Season::Summer);
        assert_eq!(season(7, 4, Some(-33.9)), Season::Winter);
        assert_eq!(season(4, 1, Some(-33.9)), Season::Fall);
        assert_eq!(season(10, 1, Some(-33.9)), Season::Spring);
        assert_eq!(season(7, 4, Some(38.4)), Season::Summer);
    }

    #[test]
    fn season_rule_reads_latitude_header() {
        let fields = fields(r#"{"season": {"rules": [{"type": "season-of-year"}]}}"#);
        let signals = RequestSignals::new(Utc.with_ymd_and_hms(2024, 7, 4, 12, 0, 0).unwrap())
            .with_header("cloudfront-viewer-latitude", "-33.86");

        let context = derive_context(fields.iter(), &signals);
        assert_eq!(context["season"].values, vec!["3"]);
    }
}
