//! A client that loads the configuration document from its source.
use std::{path::PathBuf, time::Duration};

use reqwest::Url;

use crate::{Configuration, Error, Result};

/// Where the configuration document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationSource {
    /// Fetched with `GET` from an HTTP(S) URL.
    Url(String),
    /// Read from the local filesystem.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ConfigurationFetcherConfig {
    pub source: ConfigurationSource,
    /// Timeout for a single HTTP fetch.
    pub timeout: Duration,
}

impl ConfigurationFetcherConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(source: ConfigurationSource) -> ConfigurationFetcherConfig {
        ConfigurationFetcherConfig {
            source,
            timeout: ConfigurationFetcherConfig::DEFAULT_TIMEOUT,
        }
    }
}

/// Loads [`Configuration`] from a [`ConfigurationSource`].
pub struct ConfigurationFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    config: ConfigurationFetcherConfig,
}

impl ConfigurationFetcher {
    pub fn new(config: ConfigurationFetcherConfig) -> ConfigurationFetcher {
        let client = reqwest::Client::new();

        ConfigurationFetcher { client, config }
    }

    pub async fn fetch_configuration(&mut self) -> Result<Configuration> {
        let bytes = match &self.config.source {
            ConfigurationSource::Url(url) => self.fetch_url(url).await?,
            ConfigurationSource::File(path) => {
                log::debug!(target: "p13n", "reading configuration file {}", path.display());
                std::fs::read(path)?
            }
        };

        let configuration = Configuration::from_json(&bytes)?;

        log::debug!(target: "p13n", version = configuration.version().unwrap_or("-"); "successfully loaded configuration");

        Ok(configuration)
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        let url = Url::parse(url).map_err(Error::InvalidBaseUrl)?;

        log::debug!(target: "p13n", "fetching configuration");
        let response = self
            .client
            .get(url)
            .timeout(self.config.timeout)
            .send()
            .await?;

        let response = response.error_for_status().map_err(|err| {
            log::warn!(target: "p13n", "received non-200 response while fetching new configuration: {:?}", err);
            Error::from(err)
        })?;

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{ConfigurationFetcher, ConfigurationFetcherConfig, ConfigurationSource};
    use crate::Error;

    #[tokio::test]
    async fn loads_configuration_from_file() {
        let path = std::env::temp_dir().join(format!("p13n-fetcher-{}.json", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(br#"{"version": "file-1", "namespaces": {}}"#)
                .unwrap();
        }

        let mut fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig::new(
            ConfigurationSource::File(path.clone()),
        ));
        let configuration = fetcher.fetch_configuration().await.unwrap();

        assert_eq!(configuration.version(), Some("file-1"));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let mut fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig::new(
            ConfigurationSource::File("/nonexistent/p13n/config.json".into()),
        ));

        let err = fetcher.fetch_configuration().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_request() {
        let mut fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig::new(
            ConfigurationSource::Url("not a url".to_owned()),
        ));

        let err = fetcher.fetch_configuration().await.unwrap_err();
        assert!(matches!(err, Error::InvalidBaseUrl(_)));
    }
}
