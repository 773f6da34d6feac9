//! Process settings read from the command line and `P13N_*` environment variables.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use p13n_core::configuration_fetcher::ConfigurationSource;
use p13n_core::metadata::LocalDbSource;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Command-line and environment surface of the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "personalization-api")]
#[command(about = "Configuration-driven personalization API", version)]
#[command(group(
    ArgGroup::new("configuration")
        .required(true)
        .multiple(true)
        .args(["config_url", "config_file"])
))]
pub struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "P13N_BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
    pub bind_addr: SocketAddr,

    /// URL of the configuration document (takes precedence over --config-file)
    #[arg(long, env = "P13N_CONFIG_URL")]
    pub config_url: Option<String>,

    /// Path of the configuration document
    #[arg(long, env = "P13N_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Seconds between configuration reloads
    #[arg(long, env = "P13N_CONFIG_POLL_INTERVAL_SECS", default_value = "30")]
    pub config_poll_interval_secs: u64,

    /// Gateway in front of managed recommenders, functions and model endpoints
    #[arg(long, env = "P13N_BACKEND_BASE_URL")]
    pub backend_base_url: Option<String>,

    #[arg(long, env = "P13N_BACKEND_TIMEOUT_MS", default_value = "3000")]
    pub backend_timeout_ms: u64,

    /// Experiment assignment service
    #[arg(long, env = "P13N_EXPERIMENT_SERVICE_URL")]
    pub experiment_service_url: Option<String>,

    #[arg(long, env = "P13N_EXPERIMENT_TIMEOUT_MS", default_value = "500")]
    pub experiment_timeout_ms: u64,

    /// Item metadata table endpoint
    #[arg(long, env = "P13N_METADATA_TABLE_URL")]
    pub metadata_table_url: Option<String>,

    /// Local item database: an http(s) URL or a directory
    #[arg(long, env = "P13N_LOCALDB_SOURCE", value_parser = parse_localdb_source)]
    pub localdb_source: Option<LocalDbSource>,

    /// Event sink receiving ingested events
    #[arg(long, env = "P13N_EVENT_SINK_URL")]
    pub event_sink_url: Option<String>,
}

fn parse_localdb_source(source: &str) -> Result<LocalDbSource, std::convert::Infallible> {
    Ok(
        if source.starts_with("http://") || source.starts_with("https://") {
            LocalDbSource::Url(source.to_owned())
        } else {
            LocalDbSource::Directory(PathBuf::from(source))
        },
    )
}

/// Settings of one server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub configuration_source: ConfigurationSource,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    /// Variations served by the gateway answer `BackendUnavailable` when unset.
    pub backend_base_url: Option<String>,
    pub backend_timeout: Duration,
    /// Without an experiment service every request uses the first declared variation.
    pub experiment_service_url: Option<String>,
    pub experiment_timeout: Duration,
    pub metadata_table_url: Option<String>,
    pub localdb_source: Option<LocalDbSource>,
    pub event_sink_url: Option<String>,
}

impl ServerConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);
    pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(3000);
    pub const DEFAULT_EXPERIMENT_TIMEOUT: Duration = Duration::from_millis(500);

    /// Settings with defaults for everything but the configuration source.
    pub fn new(configuration_source: ConfigurationSource) -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            configuration_source,
            poll_interval: ServerConfig::DEFAULT_POLL_INTERVAL,
            poll_jitter: ServerConfig::DEFAULT_POLL_JITTER,
            backend_base_url: None,
            backend_timeout: ServerConfig::DEFAULT_BACKEND_TIMEOUT,
            experiment_service_url: None,
            experiment_timeout: ServerConfig::DEFAULT_EXPERIMENT_TIMEOUT,
            metadata_table_url: None,
            localdb_source: None,
            event_sink_url: None,
        }
    }

    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> ServerConfig {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> ServerConfig {
        self.poll_interval = interval;
        self
    }

    pub fn with_backend_base_url(mut self, base_url: impl Into<String>) -> ServerConfig {
        self.backend_base_url = Some(base_url.into());
        self
    }

    pub fn with_experiment_service_url(mut self, base_url: impl Into<String>) -> ServerConfig {
        self.experiment_service_url = Some(base_url.into());
        self
    }

    pub fn with_metadata_table_url(mut self, base_url: impl Into<String>) -> ServerConfig {
        self.metadata_table_url = Some(base_url.into());
        self
    }

    pub fn with_localdb_source(mut self, source: LocalDbSource) -> ServerConfig {
        self.localdb_source = Some(source);
        self
    }

    pub fn with_event_sink_url(mut self, base_url: impl Into<String>) -> ServerConfig {
        self.event_sink_url = Some(base_url.into());
        self
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> ServerConfig {
        // The argument group guarantees at least one of the two.
        let configuration_source = match (args.config_url, args.config_file) {
            (Some(url), _) => ConfigurationSource::Url(url),
            (None, Some(path)) => ConfigurationSource::File(path),
            (None, None) => ConfigurationSource::File(PathBuf::new()),
        };

        ServerConfig {
            bind_addr: args.bind_addr,
            configuration_source,
            poll_interval: Duration::from_secs(args.config_poll_interval_secs),
            poll_jitter: ServerConfig::DEFAULT_POLL_JITTER,
            backend_base_url: args.backend_base_url,
            backend_timeout: Duration::from_millis(args.backend_timeout_ms),
            experiment_service_url: args.experiment_service_url,
            experiment_timeout: Duration::from_millis(args.experiment_timeout_ms),
            metadata_table_url: args.metadata_table_url,
            localdb_source: args.localdb_source,
            event_sink_url: args.event_sink_url,
        }
    }
}
