//! `p13n_core` is the request resolution and response decoration pipeline of the personalization
//! API. It sits between client applications and recommendation backends and has no HTTP server
//! dependency of its own.
//!
//! # Overview
//!
//! [`Configuration`] is an immutable snapshot of the personalization configuration: namespaces,
//! their recommenders per action type, and each recommender's variations. Attributes such as
//! cache policy, item metadata source and auto-context rules are declared at any level and
//! resolved field by field along the hierarchy (see [`config`]).
//!
//! [`ConfigurationStore`](configuration_store::ConfigurationStore) holds the active snapshot.
//! Whenever configuration changes, it is replaced completely. A request takes one snapshot and
//! uses it until it is answered.
//!
//! [`ConfigurationFetcher`](configuration_fetcher::ConfigurationFetcher) loads the document from a
//! URL or a file, and [`PollerThread`](poller_thread::PollerThread) keeps the store up to date in
//! the background.
//!
//! [`RequestDispatcher`](dispatcher::RequestDispatcher) serves one request: it resolves the
//! recommender, lets the [`ExperimentSelector`](experiments::ExperimentSelector) pick a
//! variation, derives [auto-context](context) from request signals and [blends](blend) it with
//! caller parameters, invokes the variation's [backend](backends), decorates items with
//! [metadata](metadata) and computes [cache headers](cache).
//!
//! Experiment exposures and conversions are queued on an
//! [`EventDispatcher`](events::EventDispatcher) and delivered in the background. Interaction
//! events are fanned out to a namespace's event targets by [`EventIngest`](events::EventIngest).
//!
//! Every external collaborator (recommendation backends, experiment service, metadata stores,
//! event sinks) sits behind a trait with an HTTP implementation.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod blend;
pub mod cache;
pub mod config;
pub mod configuration_fetcher;
pub mod configuration_store;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod experiments;
pub mod metadata;
pub mod poller_thread;
pub mod request;
pub mod response;

mod configuration;
mod endpoint;
mod error;

pub use configuration::Configuration;
pub use error::{Error, ErrorKind, Result};
