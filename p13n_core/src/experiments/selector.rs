use std::sync::Arc;

use super::events::ExperimentEvent;
use super::service::{ExperimentService, FeatureEvaluation, EXPERIMENT_RULE_MATCH};
use crate::config::{Experiment, ExperimentMethod, ResolvedRecommender, ResolvedVariation};
use crate::events::EventDispatcher;
use crate::response::MatchedExperiment;
use crate::{Error, Result};

/// Variation chosen for a request and the experiment that chose it, if any.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub variation: ResolvedVariation<'a>,
    pub matched_experiment: Option<MatchedExperiment>,
}

impl<'a> Selection<'a> {
    fn default_variation(variation: ResolvedVariation<'a>) -> Selection<'a> {
        Selection {
            variation,
            matched_experiment: None,
        }
    }
}

/// Picks the variation that serves a request.
///
/// Experiments never fail a request: when the experiment service cannot be reached or returns
/// something that does not map to a configured variation, the first declared variation serves.
pub struct ExperimentSelector {
    service: Option<Arc<dyn ExperimentService>>,
    exposures: Option<Arc<EventDispatcher>>,
}

impl ExperimentSelector {
    pub fn new(service: Arc<dyn ExperimentService>, exposures: Arc<EventDispatcher>) -> Self {
        ExperimentSelector {
            service: Some(service),
            exposures: Some(exposures),
        }
    }

    /// Selector that always serves the first declared variation.
    pub fn disabled() -> Self {
        ExperimentSelector {
            service: None,
            exposures: None,
        }
    }

    /// Select the variation for `user_id`.
    ///
    /// Experiments apply only to recommenders with more than one variation, and only when a user
    /// is known. `feature` names the experiment to evaluate; without it the first declared
    /// experiment is used.
    ///
    /// # Errors
    ///
    /// - `ConfigNotFound` (`NoVariationsConfigured`) when the recommender has no variations.
    /// - `Validation` (`InvalidExperimentFeature`) when `feature` is not configured.
    pub async fn select_variation<'a>(
        &self,
        recommender: &ResolvedRecommender<'a>,
        feature: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Selection<'a>> {
        let default = recommender.default_variation()?;

        let experiments = match &recommender.recommender.experiments {
            Some(experiments) if !experiments.is_empty() => experiments,
            _ => return Ok(Selection::default_variation(default)),
        };
        let Some(user_id) = user_id.filter(|_| recommender.recommender.variations.len() > 1)
        else {
            return Ok(Selection::default_variation(default));
        };

        let (feature, experiment) = match feature {
            Some(feature) => experiments.get_key_value(feature).ok_or_else(|| {
                Error::validation(
                    "InvalidExperimentFeature",
                    format!("Experiment for feature {feature} is referencing an experiment that is not in configuration"),
                )
            })?,
            None => match experiments.first() {
                Some(first) => first,
                None => return Ok(Selection::default_variation(default)),
            },
        };

        let Some(service) = &self.service else {
            log::debug!(target: "p13n", feature; "no experiment service configured; serving default variation");
            return Ok(Selection::default_variation(default));
        };

        let evaluation = match experiment.method {
            ExperimentMethod::ExperimentService => {
                service
                    .evaluate_feature(&experiment.project, feature, user_id)
                    .await
            }
        };

        let evaluation = match evaluation {
            Ok(evaluation) => evaluation,
            Err(err) => {
                log::warn!(target: "p13n", project = experiment.project.as_str(), feature; "experiment evaluation failed; serving default variation: {err}");
                return Ok(Selection::default_variation(default));
            }
        };

        let Some(variation) = map_variation(recommender, &evaluation) else {
            log::warn!(target: "p13n", project = experiment.project.as_str(), feature; "evaluated variation does not match a configured variation; serving default variation");
            return Ok(Selection::default_variation(default));
        };

        log::info!(
            target: "p13n",
            feature,
            variation = variation.key,
            service_variation = evaluation.variation.as_deref().unwrap_or("-");
            "feature mapped to variation"
        );

        let matched_experiment = if evaluation.reason.as_deref() == Some(EXPERIMENT_RULE_MATCH) {
            self.record_exposures(experiment, user_id);
            Some(MatchedExperiment {
                method: experiment.method,
                feature: feature.to_owned(),
                details: evaluation
                    .details
                    .as_deref()
                    .and_then(|details| serde_json::from_str(details).ok())
                    .unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(Selection {
            variation,
            matched_experiment,
        })
    }

    fn record_exposures(&self, experiment: &Experiment, user_id: &str) {
        let Some(exposures) = &self.exposures else {
            return;
        };

        if experiment.metrics.is_empty() {
            log::warn!(target: "p13n", project = experiment.project.as_str(); "experiment has no metrics configured; unable to record exposure");
            return;
        }

        for (metric_name, metric) in experiment.metrics.iter() {
            if !metric.track_exposures {
                log::debug!(target: "p13n", metric = metric_name; "exposure tracking disabled for metric");
                continue;
            }
            exposures.dispatch(&experiment.project, ExperimentEvent::exposure(metric, user_id));
        }
    }
}

/// A string value names a variation key, or its position when numeric. A long value is a
/// position in declaration order.
fn map_variation<'a>(
    recommender: &ResolvedRecommender<'a>,
    evaluation: &FeatureEvaluation,
) -> Option<ResolvedVariation<'a>> {
    if let Some(value) = evaluation.value.string_value.as_deref().filter(|v| !v.is_empty()) {
        return recommender.variation(value).or_else(|| {
            value
                .parse::<usize>()
                .ok()
                .and_then(|idx| recommender.variation_at(idx))
        });
    }

    let idx = usize::try_from(evaluation.value.long_value?).ok()?;
    recommender.variation_at(idx)
}
