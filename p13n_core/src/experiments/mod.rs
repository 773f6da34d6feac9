//! Experiment evaluation, exposure and conversion events.
mod events;
mod selector;
mod service;

pub use events::{ExperimentEvent, DEFAULT_CONVERSION_VALUE, EXPOSURE_VALUE};
pub use selector::{ExperimentSelector, Selection};
pub use service::{
    EvaluatedValue, ExperimentService, FeatureEvaluation, HttpExperimentService,
    HttpExperimentServiceConfig, EXPERIMENT_RULE_MATCH,
};
