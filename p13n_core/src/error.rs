use std::sync::Arc;

/// Represents a result type for operations in the personalization pipeline.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// pipeline-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur while resolving and serving a request.
///
/// Errors that affect the returned recommendation set are surfaced to the caller. Errors in
/// auxiliary enrichment ([`Error::ExperimentService`], [`Error::MetadataStore`],
/// [`Error::EventSink`]) are logged and swallowed by the dispatcher.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Namespace, action type, or recommender combination is absent from the configuration.
    #[error("{message}")]
    ConfigNotFound {
        /// Machine-readable error code.
        code: &'static str,
        /// Human-readable description.
        message: String,
    },

    /// Malformed query or body parameters.
    #[error("{message}")]
    Validation {
        /// Machine-readable error code.
        code: &'static str,
        /// Human-readable description.
        message: String,
    },

    /// Configuration is present but cannot be served (e.g., a variation without a backend
    /// identifier).
    #[error("{message}")]
    InvalidConfiguration {
        /// Machine-readable error code.
        code: &'static str,
        /// Human-readable description.
        message: String,
    },

    /// Recommendation backend call failed or timed out.
    #[error("recommendation backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Experiment service call failed. Never surfaced to clients.
    #[error("experiment service error: {0}")]
    ExperimentService(String),

    /// Item metadata store read failed. Never surfaced to clients.
    #[error("item metadata store error: {0}")]
    MetadataStore(String),

    /// Event fan-out destination rejected or failed a batch. Never surfaced to clients.
    #[error("event sink error: {0}")]
    EventSink(String),

    /// No configuration snapshot has been loaded yet.
    #[error("configuration missing")]
    ConfigurationMissing,

    /// The configuration document could not be parsed.
    #[error("error parsing configuration: {0}")]
    ConfigurationParse(Arc<serde_json::Error>),

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Indicates that a poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

/// Coarse classification used to decide how an error is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller's fault. Retrying the same request will not help.
    Client,
    /// Serving failed. The caller may retry.
    Server,
    /// Enrichment failed. The primary response is still served.
    Degraded,
}

impl Error {
    pub(crate) fn not_found(code: &'static str, message: impl Into<String>) -> Error {
        Error::ConfigNotFound {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn validation(code: &'static str, message: impl Into<String>) -> Error {
        Error::Validation {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_configuration(code: &'static str, message: impl Into<String>) -> Error {
        Error::InvalidConfiguration {
            code,
            message: message.into(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigNotFound { .. } | Error::Validation { .. } => ErrorKind::Client,

            Error::ExperimentService(_) | Error::MetadataStore(_) | Error::EventSink(_) => {
                ErrorKind::Degraded
            }

            Error::InvalidConfiguration { .. }
            | Error::BackendUnavailable(_)
            | Error::ConfigurationMissing
            | Error::ConfigurationParse(_)
            | Error::InvalidBaseUrl(_)
            | Error::PollerThreadPanicked
            | Error::Io(_)
            | Error::Network(_) => ErrorKind::Server,
        }
    }

    /// Short category name reported to clients in the `type` field of error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::ConfigNotFound { .. } | Error::InvalidConfiguration { .. } => "Configuration",
            Error::Validation { .. } => "Validation",
            Error::BackendUnavailable(_) => "Backend",
            _ => "Unhandled",
        }
    }

    /// Machine-readable error code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConfigNotFound { code, .. }
            | Error::Validation { code, .. }
            | Error::InvalidConfiguration { code, .. } => code,
            Error::BackendUnavailable(_) => "BackendUnavailable",
            Error::ConfigurationMissing => "ConfigurationMissing",
            _ => "InternalError",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParse(Arc::new(value))
    }
}
