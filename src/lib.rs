//! HTTP service for the personalization API.
//!
//! The service answers recommendation requests by running them through
//! [`p13n_core`]'s [`RequestDispatcher`](p13n_core::dispatcher::RequestDispatcher):
//!
//! - `GET /recommend-items/{namespace}/{recommender}/{user_id}`
//! - `GET /related-items/{namespace}/{recommender}/{item_id}`
//! - `GET /rerank-items/{namespace}/{recommender}/{user_id}/{item_ids}`
//! - `POST /rerank-items/{namespace}/{recommender}/{user_id}`
//! - `POST /events/{namespace}`
//! - `GET /health`
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use personalization_api::{PersonalizationServer, ServerArgs, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::from(ServerArgs::parse());
//!     let server = PersonalizationServer::start(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod handlers;
pub mod settings;

mod error;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::ETAG;
use axum::http::{HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use p13n_core::configuration_fetcher::{ConfigurationFetcher, ConfigurationFetcherConfig};
use p13n_core::configuration_store::ConfigurationStore;
use p13n_core::metadata::LocalDbStore;
use p13n_core::poller_thread::{PollerThread, PollerThreadConfig};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use error::ApiError;
pub use settings::{ServerArgs, ServerConfig};
pub use state::AppState;

/// How often the local item metadata store checks namespaces for a due sync.
const LOCAL_DB_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([
            ETAG,
            HeaderName::from_static(handlers::CONFIG_VERSION_HEADER),
        ])
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/health", get(handlers::handle_health))
        .route(
            "/recommend-items/:namespace/:recommender/:user_id",
            get(handlers::handle_recommend_items),
        )
        .route(
            "/related-items/:namespace/:recommender/:item_id",
            get(handlers::handle_related_items),
        )
        .route(
            "/rerank-items/:namespace/:recommender/:user_id",
            post(handlers::handle_rerank_items_body),
        )
        .route(
            "/rerank-items/:namespace/:recommender/:user_id/:item_ids",
            get(handlers::handle_rerank_items),
        )
        .route("/events/:namespace", post(handlers::handle_events))
        .layer(cors)
        .with_state(state)
}

/// Errors that stop the server from starting or serving.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Pipeline(#[from] p13n_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A running configuration poller plus the router serving from its store.
pub struct PersonalizationServer {
    config: ServerConfig,
    poller: PollerThread,
    local_db_sync: Option<tokio::task::JoinHandle<()>>,
    router: Router,
}

impl PersonalizationServer {
    /// Start the configuration poller, wait for the first configuration and wire the dispatcher.
    ///
    /// Must be called within a multi-threaded tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when the poller thread cannot be spawned or cannot publish a first configuration.
    pub async fn start(config: ServerConfig) -> Result<PersonalizationServer, ServerError> {
        let store = Arc::new(ConfigurationStore::new());

        let fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig::new(
            config.configuration_source.clone(),
        ));
        let poller = PollerThread::start_with_config(
            fetcher,
            store.clone(),
            PollerThreadConfig::new()
                .with_interval(config.poll_interval)
                .with_jitter(config.poll_jitter),
        )?;
        tokio::task::block_in_place(|| poller.wait_for_configuration())?;

        let local_db = config
            .localdb_source
            .clone()
            .map(|source| Arc::new(LocalDbStore::new(source)));
        let local_db_sync = local_db
            .as_ref()
            .map(|local_db| local_db.start_sync(store.clone(), LOCAL_DB_CHECK_INTERVAL));

        let dispatcher = state::build_dispatcher(&config, store, local_db);
        let router = build_router(AppState::new(dispatcher));

        Ok(PersonalizationServer {
            config,
            poller,
            local_db_sync,
            router,
        })
    }

    /// The router, for driving the service without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until SIGINT or SIGTERM, then stop background work.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        log::info!(target: "p13n", addr = self.config.bind_addr.to_string().as_str(); "personalization API listening");

        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(task) = self.local_db_sync {
            task.abort();
        }
        let poller = self.poller;
        tokio::task::block_in_place(|| poller.shutdown())?;

        log::info!(target: "p13n", "personalization API stopped");
        result.map_err(Into::into)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!(target: "p13n", "failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                log::error!(target: "p13n", "failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
