//! Experiment engine — creation, metric ingestion, evaluation and lifecycle
//! of A/B/n experiments held in an injected registry.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use orchestrator_core::config::ExperimentConfig;
use orchestrator_core::{generate_id, OrchestratorError, OrchestratorResult, Registry};
use tracing::{debug, info, warn};

use crate::analysis::analyze;
use crate::stats::{SignificanceTest, TwoProportionZTest};
use crate::types::{
    Experiment, ExperimentRequest, ExperimentResult, ExperimentStatus, ExperimentType,
    VariantMetrics,
};

/// Registry entry: the experiment plus an append-only snapshot log per variant.
#[derive(Debug, Clone)]
pub struct ExperimentState {
    pub experiment: Experiment,
    pub snapshots: BTreeMap<String, Vec<VariantMetrics>>,
}

impl ExperimentState {
    fn new(experiment: Experiment) -> Self {
        Self {
            experiment,
            snapshots: BTreeMap::new(),
        }
    }

    /// Latest snapshot per declared variant, in declaration order.
    pub fn latest(&self) -> Vec<VariantMetrics> {
        self.experiment
            .variant_ids
            .iter()
            .map(|id| {
                self.snapshots
                    .get(id)
                    .and_then(|log| log.last())
                    .cloned()
                    .unwrap_or_else(|| VariantMetrics::empty(id.clone()))
            })
            .collect()
    }

    fn expire(&mut self) {
        let observed = self.experiment.effective_status(Utc::now());
        if observed != self.experiment.status {
            debug!(experiment_id = %self.experiment.experiment_id, "Experiment reached ends_at");
            self.experiment.status = observed;
        }
    }
}

pub type ExperimentRegistry = Registry<ExperimentState>;

pub struct ExperimentEngine {
    config: ExperimentConfig,
    registry: Arc<ExperimentRegistry>,
    significance: Arc<dyn SignificanceTest>,
}

impl ExperimentEngine {
    pub fn new(config: ExperimentConfig, registry: Arc<ExperimentRegistry>) -> Self {
        info!(
            significance_threshold = config.significance_threshold,
            "Experiments engine initialized"
        );
        Self {
            config,
            registry,
            significance: Arc::new(TwoProportionZTest),
        }
    }

    /// Swap the statistical routine used by [`evaluate`](Self::evaluate).
    pub fn with_significance_test(mut self, test: Arc<dyn SignificanceTest>) -> Self {
        self.significance = test;
        self
    }

    pub fn registry(&self) -> &Arc<ExperimentRegistry> {
        &self.registry
    }

    /// Register a new running experiment that ends `duration_days` from now.
    pub fn create(
        &self,
        name: &str,
        variant_ids: Vec<String>,
        duration_days: u32,
    ) -> OrchestratorResult<Experiment> {
        let experiment_type = if variant_ids.len() == 2 {
            ExperimentType::Ab
        } else {
            ExperimentType::Abn
        };
        self.create_from_request(ExperimentRequest {
            name: name.to_string(),
            description: String::new(),
            experiment_type: Some(experiment_type),
            variants: variant_ids,
            segment_ids: Vec::new(),
            metrics: Vec::new(),
            duration_days: Some(duration_days),
        })
    }

    pub fn create_from_request(
        &self,
        request: ExperimentRequest,
    ) -> OrchestratorResult<Experiment> {
        let result = self.try_create(request);
        if let Err(e) = &result {
            warn!(error = %e, "Experiment creation rejected");
        }
        result
    }

    fn try_create(&self, request: ExperimentRequest) -> OrchestratorResult<Experiment> {
        if request.variants.is_empty() {
            return Err(OrchestratorError::InvalidParameter(
                "variant_ids must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for variant in &request.variants {
            if !seen.insert(variant.as_str()) {
                return Err(OrchestratorError::InvalidParameter(format!(
                    "duplicate variant_id '{}'",
                    variant
                )));
            }
        }

        let experiment_type = request.experiment_type.unwrap_or(if request.variants.len() == 2 {
            ExperimentType::Ab
        } else {
            ExperimentType::Abn
        });
        if experiment_type == ExperimentType::Ab && request.variants.len() != 2 {
            return Err(OrchestratorError::InvalidParameter(format!(
                "an A/B experiment needs exactly 2 variants, got {}",
                request.variants.len()
            )));
        }

        let duration_days = request
            .duration_days
            .unwrap_or(self.config.default_duration_days);
        if duration_days == 0 {
            return Err(OrchestratorError::InvalidParameter(
                "duration must be at least one day".to_string(),
            ));
        }

        let started_at = Utc::now();
        let ends_at = started_at
            .checked_add_signed(Duration::days(i64::from(duration_days)))
            .ok_or_else(|| {
                OrchestratorError::InvalidParameter(format!(
                    "duration of {} days is out of range",
                    duration_days
                ))
            })?;
        let mut experiment = Experiment {
            experiment_id: String::new(),
            name: request.name,
            description: request.description,
            experiment_type,
            variant_ids: request.variants,
            segment_ids: request.segment_ids,
            metrics: request.metrics,
            started_at,
            ends_at,
            status: ExperimentStatus::Running,
        };

        loop {
            let id = generate_id(&self.config.id_prefix);
            experiment.experiment_id = id.clone();
            if self
                .registry
                .insert_new(id, ExperimentState::new(experiment.clone()))
            {
                break;
            }
        }

        metrics::counter!("experiments.created").increment(1);
        info!(
            experiment_id = %experiment.experiment_id,
            name = %experiment.name,
            variants = experiment.variant_ids.len(),
            experiment_type = ?experiment.experiment_type,
            "Experiment created"
        );
        Ok(experiment)
    }

    /// Store the latest cumulative counters for one variant. Rejected calls
    /// leave the registry untouched.
    pub fn record_metrics(
        &self,
        experiment_id: &str,
        variant_id: &str,
        impressions: u64,
        clicks: u64,
        conversions: u64,
        revenue: f64,
    ) -> OrchestratorResult<()> {
        let outcome = self
            .registry
            .write(experiment_id, |state| {
                if !state.experiment.has_variant(variant_id) {
                    return Err(OrchestratorError::NotFound(format!(
                        "variant '{}' in experiment '{}'",
                        variant_id, experiment_id
                    )));
                }
                if clicks > impressions {
                    return Err(OrchestratorError::InvalidParameter(format!(
                        "clicks ({}) exceed impressions ({})",
                        clicks, impressions
                    )));
                }
                if conversions > clicks {
                    return Err(OrchestratorError::InvalidParameter(format!(
                        "conversions ({}) exceed clicks ({})",
                        conversions, clicks
                    )));
                }
                if !revenue.is_finite() || revenue < 0.0 {
                    return Err(OrchestratorError::InvalidParameter(format!(
                        "revenue must be a non-negative number, got {}",
                        revenue
                    )));
                }

                state.expire();
                let snapshot =
                    VariantMetrics::new(variant_id, impressions, clicks, conversions, revenue);
                state
                    .snapshots
                    .entry(variant_id.to_string())
                    .or_default()
                    .push(snapshot);
                Ok(())
            })
            .unwrap_or_else(|| Err(experiment_not_found(experiment_id)));

        match &outcome {
            Ok(()) => {
                metrics::counter!("experiments.metrics_recorded").increment(1);
                debug!(
                    experiment_id,
                    variant_id,
                    impressions,
                    clicks,
                    conversions,
                    revenue,
                    "Metrics recorded"
                );
            }
            Err(e) => {
                metrics::counter!("experiments.metrics_rejected").increment(1);
                warn!(experiment_id, variant_id, error = %e, "Metrics rejected");
            }
        }
        outcome
    }

    /// Pick the winner from the latest snapshots. Read-only; works in any status.
    pub fn evaluate(&self, experiment_id: &str) -> OrchestratorResult<ExperimentResult> {
        let (experiment, latest) = self
            .registry
            .read(experiment_id, |state| (state.experiment.clone(), state.latest()))
            .ok_or_else(|| experiment_not_found(experiment_id))?;

        let result = analyze(
            &experiment,
            latest,
            self.significance.as_ref(),
            self.config.significance_threshold,
            Utc::now(),
        );

        metrics::counter!("experiments.evaluations").increment(1);
        info!(
            experiment_id,
            winner = ?result.winner,
            confidence_level = ?result.confidence_level,
            verdict = %result.insights.statistical_significance,
            "Experiment evaluated"
        );
        Ok(result)
    }

    /// Move a running experiment to `completed` or `cancelled`.
    pub fn set_status(
        &self,
        experiment_id: &str,
        status: ExperimentStatus,
    ) -> OrchestratorResult<()> {
        self.registry
            .write(experiment_id, |state| {
                state.expire();
                let current = state.experiment.status;
                if !current.can_transition_to(status) {
                    return Err(OrchestratorError::InvalidState(format!(
                        "experiment '{}' cannot move from {:?} to {:?}",
                        experiment_id, current, status
                    )));
                }
                state.experiment.status = status;
                info!(experiment_id, from = ?current, to = ?status, "Experiment status changed");
                Ok(())
            })
            .unwrap_or_else(|| Err(experiment_not_found(experiment_id)))
    }

    pub fn get(&self, experiment_id: &str) -> OrchestratorResult<Experiment> {
        let now = Utc::now();
        self.registry
            .read(experiment_id, |state| {
                let mut experiment = state.experiment.clone();
                experiment.status = experiment.effective_status(now);
                experiment
            })
            .ok_or_else(|| experiment_not_found(experiment_id))
    }

    /// All experiments, oldest first.
    pub fn list(&self) -> Vec<Experiment> {
        let mut experiments: Vec<Experiment> = self
            .registry
            .keys()
            .iter()
            .filter_map(|id| self.get(id).ok())
            .collect();
        experiments.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.experiment_id.cmp(&b.experiment_id))
        });
        experiments
    }

    pub fn remove(&self, experiment_id: &str) -> OrchestratorResult<()> {
        if self.registry.remove(experiment_id) {
            info!(experiment_id, "Experiment removed");
            Ok(())
        } else {
            Err(experiment_not_found(experiment_id))
        }
    }

    /// Every snapshot recorded for a variant, oldest first.
    pub fn history(
        &self,
        experiment_id: &str,
        variant_id: &str,
    ) -> OrchestratorResult<Vec<VariantMetrics>> {
        self.registry
            .read(experiment_id, |state| {
                if !state.experiment.has_variant(variant_id) {
                    return Err(OrchestratorError::NotFound(format!(
                        "variant '{}' in experiment '{}'",
                        variant_id, experiment_id
                    )));
                }
                Ok(state.snapshots.get(variant_id).cloned().unwrap_or_default())
            })
            .unwrap_or_else(|| Err(experiment_not_found(experiment_id)))
    }
}

impl Default for ExperimentEngine {
    fn default() -> Self {
        Self::new(ExperimentConfig::default(), Arc::new(Registry::new()))
    }
}

fn experiment_not_found(experiment_id: &str) -> OrchestratorError {
    OrchestratorError::NotFound(format!("experiment '{}'", experiment_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignificanceVerdict;

    fn headline_test(engine: &ExperimentEngine) -> Experiment {
        engine
            .create("headline test", vec!["A".to_string(), "B".to_string()], 14)
            .unwrap()
    }

    #[test]
    fn test_create_registers_running_experiment() {
        let engine = ExperimentEngine::default();
        let exp = headline_test(&engine);

        assert!(exp.experiment_id.starts_with("exp_"));
        assert_eq!(exp.status, ExperimentStatus::Running);
        assert_eq!(exp.variant_ids, vec!["A", "B"]);
        assert_eq!(exp.experiment_type, ExperimentType::Ab);
        assert_eq!((exp.ends_at - exp.started_at).num_days(), 14);
        assert_eq!(engine.get(&exp.experiment_id).unwrap(), exp);
    }

    #[test]
    fn test_create_rejects_bad_variants() {
        let engine = ExperimentEngine::default();
        assert!(matches!(
            engine.create("empty", vec![], 14),
            Err(OrchestratorError::InvalidParameter(_))
        ));
        assert!(matches!(
            engine.create("dup", vec!["A".to_string(), "A".to_string()], 14),
            Err(OrchestratorError::InvalidParameter(_))
        ));
        assert!(matches!(
            engine.create("zero", vec!["A".to_string()], 0),
            Err(OrchestratorError::InvalidParameter(_))
        ));
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn test_create_from_request_checks_ab_arity() {
        let engine = ExperimentEngine::default();
        let request = ExperimentRequest {
            name: "three arms".to_string(),
            description: "subject lines".to_string(),
            experiment_type: Some(ExperimentType::Ab),
            variants: vec!["A".into(), "B".into(), "C".into()],
            segment_ids: vec!["seg_0".into()],
            metrics: vec!["conversion_rate".into()],
            duration_days: None,
        };
        assert!(matches!(
            engine.create_from_request(request.clone()),
            Err(OrchestratorError::InvalidParameter(_))
        ));

        let exp = engine
            .create_from_request(ExperimentRequest {
                experiment_type: Some(ExperimentType::Multivariate),
                ..request
            })
            .unwrap();
        assert_eq!(exp.segment_ids, vec!["seg_0"]);
        assert_eq!((exp.ends_at - exp.started_at).num_days(), 14);
    }

    #[test]
    fn test_headline_scenario() {
        let engine = ExperimentEngine::default();
        let exp = headline_test(&engine);
        let id = &exp.experiment_id;

        engine.record_metrics(id, "A", 10_000, 500, 100, 5_000.0).unwrap();
        engine.record_metrics(id, "B", 10_000, 600, 150, 7_500.0).unwrap();

        let result = engine.evaluate(id).unwrap();
        assert_eq!(result.winner.as_deref(), Some("B"));
        assert_eq!(result.insights.best_performing_variant.as_deref(), Some("B"));
        let confidence = result.confidence_level.unwrap();
        assert!((confidence - 0.9756).abs() < 1e-3, "confidence = {confidence}");
        assert_eq!(
            result.insights.statistical_significance,
            SignificanceVerdict::Significant
        );
        assert!((result.insights.improvement_over_others_pct - 25.0).abs() < 1e-9);
        assert_eq!(result.variants_performance[0].variant_id, "A");
        assert!((result.variants_performance[1].conversion_rate - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_funnel_violation_leaves_state_unchanged() {
        let engine = ExperimentEngine::default();
        let exp = headline_test(&engine);
        let id = &exp.experiment_id;
        engine.record_metrics(id, "A", 100, 10, 1, 10.0).unwrap();

        assert!(matches!(
            engine.record_metrics(id, "A", 40, 50, 0, 0.0),
            Err(OrchestratorError::InvalidParameter(_))
        ));
        assert!(matches!(
            engine.record_metrics(id, "A", 100, 10, 11, 0.0),
            Err(OrchestratorError::InvalidParameter(_))
        ));
        assert!(matches!(
            engine.record_metrics(id, "A", 100, 10, 1, -5.0),
            Err(OrchestratorError::InvalidParameter(_))
        ));

        let history = engine.history(id, "A").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].impressions, 100);
        assert_eq!(history[0].clicks, 10);
    }

    #[test]
    fn test_unknown_references_are_not_found() {
        let engine = ExperimentEngine::default();
        let exp = headline_test(&engine);

        assert!(matches!(
            engine.record_metrics("exp_missing0", "A", 1, 1, 1, 0.0),
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            engine.record_metrics(&exp.experiment_id, "Z", 1, 1, 1, 0.0),
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            engine.evaluate("exp_missing0"),
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            engine.set_status("exp_missing0", ExperimentStatus::Completed),
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            engine.history(&exp.experiment_id, "Z"),
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[test]
    fn test_latest_snapshot_wins_and_history_is_kept() {
        let engine = ExperimentEngine::default();
        let exp = headline_test(&engine);
        let id = &exp.experiment_id;

        engine.record_metrics(id, "A", 100, 10, 5, 0.0).unwrap();
        engine.record_metrics(id, "A", 1_000, 100, 10, 0.0).unwrap();
        engine.record_metrics(id, "B", 1_000, 100, 20, 0.0).unwrap();

        let result = engine.evaluate(id).unwrap();
        assert_eq!(result.winner.as_deref(), Some("B"));
        assert_eq!(result.variants_performance[0].clicks, 100);
        assert_eq!(engine.history(id, "A").unwrap().len(), 2);
        assert!(engine.history(id, "B").unwrap().len() == 1);
    }

    #[test]
    fn test_status_transitions() {
        let engine = ExperimentEngine::default();
        let exp = headline_test(&engine);
        let id = &exp.experiment_id;

        assert!(matches!(
            engine.set_status(id, ExperimentStatus::Running),
            Err(OrchestratorError::InvalidState(_))
        ));
        engine.set_status(id, ExperimentStatus::Cancelled).unwrap();
        assert_eq!(engine.get(id).unwrap().status, ExperimentStatus::Cancelled);
        assert!(matches!(
            engine.set_status(id, ExperimentStatus::Completed),
            Err(OrchestratorError::InvalidState(_))
        ));

        // Evaluation stays available after the experiment stops.
        let result = engine.evaluate(id).unwrap();
        assert_eq!(result.status, ExperimentStatus::Cancelled);
        assert!(result.winner.is_none());
    }

    #[test]
    fn test_list_and_remove() {
        let engine = ExperimentEngine::default();
        let first = headline_test(&engine);
        let second = engine
            .create("cta colour", vec!["red".into(), "green".into(), "blue".into()], 7)
            .unwrap();
        assert_eq!(second.experiment_type, ExperimentType::Abn);

        let ids: Vec<String> = engine.list().into_iter().map(|e| e.experiment_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.experiment_id));

        engine.remove(&first.experiment_id).unwrap();
        assert!(matches!(
            engine.get(&first.experiment_id),
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            engine.remove(&first.experiment_id),
            Err(OrchestratorError::NotFound(_))
        ));
        assert_eq!(engine.list().len(), 1);
    }

    #[test]
    fn test_past_end_date_reads_as_completed_and_persists_on_write() {
        let engine = ExperimentEngine::default();
        let exp = headline_test(&engine);
        let id = &exp.experiment_id;
        engine.record_metrics(id, "A", 1_000, 100, 10, 0.0).unwrap();

        engine
            .registry()
            .write(id, |state| {
                state.experiment.ends_at = Utc::now() - Duration::hours(1);
            })
            .unwrap();

        // Stored status is untouched until the next write.
        let stored = engine
            .registry()
            .read(id, |state| state.experiment.status)
            .unwrap();
        assert_eq!(stored, ExperimentStatus::Running);

        assert_eq!(engine.get(id).unwrap().status, ExperimentStatus::Completed);
        assert_eq!(engine.list()[0].status, ExperimentStatus::Completed);
        assert_eq!(engine.evaluate(id).unwrap().status, ExperimentStatus::Completed);

        engine.record_metrics(id, "B", 1_000, 100, 20, 0.0).unwrap();
        let stored = engine
            .registry()
            .read(id, |state| state.experiment.status)
            .unwrap();
        assert_eq!(stored, ExperimentStatus::Completed);
        assert_eq!(engine.history(id, "B").unwrap().len(), 1);

        assert!(matches!(
            engine.set_status(id, ExperimentStatus::Cancelled),
            Err(OrchestratorError::InvalidState(_))
        ));
        assert_eq!(engine.get(id).unwrap().status, ExperimentStatus::Completed);
    }

    #[test]
    fn test_evaluate_with_counters_near_u64_max() {
        let engine = ExperimentEngine::default();
        let exp = headline_test(&engine);
        let id = &exp.experiment_id;
        let half = u64::MAX / 2 + 10;
        engine.record_metrics(id, "A", half, half, half, 0.0).unwrap();
        engine.record_metrics(id, "B", half, half, half / 2, 0.0).unwrap();

        let result = engine.evaluate(id).unwrap();
        assert_eq!(result.winner.as_deref(), Some("A"));
        let confidence = result.confidence_level.unwrap();
        assert!((0.0..=1.0).contains(&confidence));
    }

    struct AlwaysCertain;

    impl SignificanceTest for AlwaysCertain {
        fn name(&self) -> &str {
            "always_certain"
        }

        fn confidence(&self, _: &VariantMetrics, _: &VariantMetrics) -> f64 {
            1.0
        }
    }

    #[test]
    fn test_injected_significance_test() {
        let engine = ExperimentEngine::default().with_significance_test(Arc::new(AlwaysCertain));
        let exp = headline_test(&engine);
        let id = &exp.experiment_id;
        engine.record_metrics(id, "A", 10, 2, 1, 0.0).unwrap();
        engine.record_metrics(id, "B", 10, 2, 0, 0.0).unwrap();

        let result = engine.evaluate(id).unwrap();
        assert_eq!(result.winner.as_deref(), Some("A"));
        assert_eq!(result.confidence_level, Some(1.0));
    }

    #[test]
    fn test_engines_sharing_a_registry_see_the_same_experiments() {
        let registry = Arc::new(ExperimentRegistry::new());
        let writer = ExperimentEngine::new(ExperimentConfig::default(), Arc::clone(&registry));
        let reader = ExperimentEngine::new(ExperimentConfig::default(), registry);

        let exp = headline_test(&writer);
        writer.record_metrics(&exp.experiment_id, "A", 10, 5, 1, 0.0).unwrap();
        assert_eq!(reader.history(&exp.experiment_id, "A").unwrap().len(), 1);
    }
}
