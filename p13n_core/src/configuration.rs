use chrono::{DateTime, Utc};

use crate::config::{PersonalizationConfig, TryParse};
use crate::Result;

/// Active personalization configuration. Immutable; a reload produces a new `Configuration`.
#[derive(Debug)]
pub struct Configuration {
    /// Timestamp when configuration was loaded.
    pub fetched_at: DateTime<Utc>,
    pub config: PersonalizationConfig,
}

impl Configuration {
    /// Wrap a parsed configuration document.
    pub fn from_config(config: PersonalizationConfig) -> Configuration {
        for (namespace, parsed) in &config.namespaces {
            if let TryParse::ParseFailed(_) = parsed {
                log::warn!(target: "p13n", namespace = namespace.as_str(); "failed to parse namespace configuration; namespace will not be served");
            }
        }

        Configuration {
            fetched_at: Utc::now(),
            config,
        }
    }

    /// Parse a configuration document from raw JSON bytes.
    ///
    /// Parsing goes straight from bytes so that key order inside variations and experiments is
    /// preserved.
    pub fn from_json(bytes: &[u8]) -> Result<Configuration> {
        let config: PersonalizationConfig = serde_json::from_slice(bytes)?;
        Ok(Configuration::from_config(config))
    }

    pub fn version(&self) -> Option<&str> {
        self.config.version.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::Configuration;
    use crate::error::Error;

    #[test]
    fn parses_version() {
        let configuration =
            Configuration::from_json(br#"{"version": "42", "namespaces": {}}"#).unwrap();
        assert_eq!(configuration.version(), Some("42"));
    }

    #[test]
    fn version_is_optional() {
        let configuration = Configuration::from_json(br#"{"namespaces": {}}"#).unwrap();
        assert_eq!(configuration.version(), None);
    }

    #[test]
    fn rejects_malformed_document() {
        let err = Configuration::from_json(b"{not json").unwrap_err();
        assert!(matches!(err, Error::ConfigurationParse(_)));
    }
}
