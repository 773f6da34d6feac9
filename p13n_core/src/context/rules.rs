use std::fmt;

use derive_more::From;

use crate::config::{Operator, ValueMapping};

/// A request signal value as seen by value-mapping operators.
#[derive(Debug, Clone, PartialEq, From)]
pub enum SignalValue {
    Number(f64),
    /// Header values, already trimmed.
    Text(String),
}

impl SignalValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            SignalValue::Number(n) => Some(*n),
            SignalValue::Text(s) => s.parse().ok(),
        }
    }

    /// Form used for comparisons: header values are lower-cased.
    fn normalized(&self) -> String {
        match self {
            SignalValue::Number(_) => self.to_string(),
            SignalValue::Text(s) => s.to_lowercase(),
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Number(n) if n.fract() == 0.0 && n.is_finite() => {
                write!(f, "{}", *n as i64)
            }
            SignalValue::Number(n) => write!(f, "{n}"),
            SignalValue::Text(s) => f.write_str(s),
        }
    }
}

/// Render a configured JSON scalar the way it is injected into context maps.
pub(crate) fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ValueMapping {
    /// Returns `mapTo` if the mapping matches `signal`.
    pub(crate) fn apply(&self, signal: &SignalValue) -> Option<String> {
        self.operator
            .eval(signal, &self.value)
            .then(|| json_to_string(&self.map_to))
    }
}

impl Operator {
    /// Applying `Operator` to the values. Returns `false` if the operator cannot be applied or
    /// there's a misconfiguration.
    pub(crate) fn eval(&self, signal: &SignalValue, value: &serde_json::Value) -> bool {
        self.try_eval(signal, value).unwrap_or(false)
    }

    /// Try applying `Operator` to the values, returning `None` if the operator cannot be applied.
    fn try_eval(&self, signal: &SignalValue, value: &serde_json::Value) -> Option<bool> {
        match self {
            Self::Equals => match value {
                serde_json::Value::Number(n) => Some(signal.as_number()? == n.as_f64()?),
                serde_json::Value::String(s) => {
                    Some(signal.normalized() == s.trim().to_lowercase())
                }
                serde_json::Value::Bool(b) => Some(signal.normalized() == b.to_string()),
                _ => None,
            },

            Self::LessThan | Self::GreaterThan => {
                let condition_value = match value {
                    serde_json::Value::Number(n) => n.as_f64()?,
                    serde_json::Value::String(s) => s.parse().ok()?,
                    _ => return None,
                };
                let signal_value = signal.as_number()?;

                Some(if *self == Self::LessThan {
                    signal_value < condition_value
                } else {
                    signal_value > condition_value
                })
            }

            Self::Contains | Self::StartWith | Self::EndsWith => {
                let needle = json_to_string(value).to_lowercase();
                let haystack = signal.normalized();
                Some(match self {
                    Self::Contains => haystack.contains(&needle),
                    Self::StartWith => haystack.starts_with(&needle),
                    Self::EndsWith => haystack.ends_with(&needle),
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }
        }
    }
}
