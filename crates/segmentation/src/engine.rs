//! Segmentation engine — feature extraction, normalization, clustering and
//! segment construction for one self-contained run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use ndarray::{Array2, Axis};
use orchestrator_core::config::SegmentationConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use tracing::{info, warn};

use crate::clustering::{Clusterer, KMeans};
use crate::features::{normalize, FeatureSchema, NormalizedVectors};
use crate::quality::silhouette_score;
use crate::types::{CustomerFeatures, Segment, SegmentationResult};

/// Stateless between calls: every run fits its own normalization and
/// clustering from the submitted customers only.
pub struct SegmentationEngine {
    config: SegmentationConfig,
    schema: FeatureSchema,
    clusterers: HashMap<String, Arc<dyn Clusterer>>,
}

impl SegmentationEngine {
    pub fn new(config: SegmentationConfig) -> Self {
        let kmeans: Arc<dyn Clusterer> = Arc::new(KMeans::from_config(&config));
        let mut clusterers = HashMap::new();
        clusterers.insert(kmeans.name().to_string(), kmeans);

        info!(
            max_segments = config.max_segments,
            seed = config.random_seed,
            "Segmentation engine initialized"
        );
        Self {
            config,
            schema: FeatureSchema::reference(),
            clusterers,
        }
    }

    /// Make an additional algorithm selectable by its name.
    pub fn register_clusterer(&mut self, clusterer: Arc<dyn Clusterer>) {
        self.clusterers.insert(clusterer.name().to_string(), clusterer);
    }

    pub fn algorithms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusterers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    pub fn extract_features(
        &self,
        customers: &[CustomerFeatures],
    ) -> OrchestratorResult<Array2<f64>> {
        self.schema.extract(customers)
    }

    pub fn cluster(
        &self,
        normalized: &NormalizedVectors,
        num_segments: usize,
        algorithm: &str,
    ) -> OrchestratorResult<Vec<usize>> {
        self.validate_num_segments(num_segments, normalized.data.nrows())?;
        let clusterer = self.clusterer(algorithm)?;
        let labels = clusterer.fit_predict(normalized.data.view(), num_segments)?;

        if labels.len() != normalized.data.nrows() || labels.iter().any(|&l| l >= num_segments) {
            return Err(OrchestratorError::Internal(anyhow::anyhow!(
                "clusterer '{}' returned labels outside 0..{}",
                algorithm,
                num_segments
            )));
        }
        Ok(labels)
    }

    /// Segment customers with the configured default count and algorithm.
    pub fn segment_with_defaults(
        &self,
        customers: &[CustomerFeatures],
    ) -> OrchestratorResult<SegmentationResult> {
        let num_segments = self.config.default_num_segments.min(customers.len()).max(1);
        let algorithm = self.config.default_algorithm.clone();
        self.segment(customers, num_segments, &algorithm)
    }

    /// Run the full pipeline. Either returns a validated result or fails
    /// without partial output.
    pub fn segment(
        &self,
        customers: &[CustomerFeatures],
        num_segments: usize,
        algorithm: &str,
    ) -> OrchestratorResult<SegmentationResult> {
        info!(
            customers = customers.len(),
            num_segments,
            algorithm,
            "Starting segmentation"
        );

        let result = self.run(customers, num_segments, algorithm);
        match &result {
            Ok(r) => {
                metrics::counter!("segmentation.runs").increment(1);
                metrics::counter!("segmentation.customers").increment(customers.len() as u64);
                info!(
                    segments = r.segments.len(),
                    quality_score = r.quality_score,
                    "Segmentation complete"
                );
            }
            Err(e) => warn!(error = %e, kind = e.kind(), "Segmentation failed"),
        }
        result
    }

    fn run(
        &self,
        customers: &[CustomerFeatures],
        num_segments: usize,
        algorithm: &str,
    ) -> OrchestratorResult<SegmentationResult> {
        self.validate_num_segments(num_segments, customers.len())?;
        self.clusterer(algorithm)?;

        let features = self.extract_features(customers)?;
        let normalized = normalize(&features);
        let labels = self.cluster(&normalized, num_segments, algorithm)?;

        self.build_segments(
            customers,
            &features,
            &normalized,
            &labels,
            num_segments,
            algorithm,
        )
    }

    /// Group customers by label, describe each group by its raw feature
    /// means, and score separation on the normalized vectors. Every input
    /// must have one row per customer and every label must be below
    /// `num_segments`.
    pub fn build_segments(
        &self,
        customers: &[CustomerFeatures],
        features: &Array2<f64>,
        normalized: &NormalizedVectors,
        labels: &[usize],
        num_segments: usize,
        algorithm: &str,
    ) -> OrchestratorResult<SegmentationResult> {
        let rows = customers.len();
        if labels.len() != rows || features.nrows() != rows || normalized.data.nrows() != rows {
            return Err(OrchestratorError::InvalidParameter(format!(
                "expected {} rows, got {} labels, {} raw rows, {} normalized rows",
                rows,
                labels.len(),
                features.nrows(),
                normalized.data.nrows()
            )));
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= num_segments) {
            return Err(OrchestratorError::InvalidParameter(format!(
                "label {} is outside 0..{}",
                label, num_segments
            )));
        }

        let names = self.schema.column_names();
        let mut segments = Vec::with_capacity(num_segments);
        let mut assignments = BTreeMap::new();

        for i in 0..num_segments {
            let segment_id = format!("seg_{}", i);
            let members: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|(_, l)| **l == i)
                .map(|(row, _)| row)
                .collect();

            let characteristics = if members.is_empty() {
                None
            } else {
                let subset = features.select(Axis(0), &members);
                subset.mean_axis(Axis(0)).map(|means| {
                    names
                        .iter()
                        .zip(means.iter())
                        .map(|(name, mean)| (format!("avg_{}", name), *mean))
                        .collect::<BTreeMap<_, _>>()
                })
            };

            for &row in &members {
                assignments.insert(customers[row].customer_id.clone(), segment_id.clone());
            }

            segments.push(Segment {
                name: format!("Segment {}", i),
                description: format!("Customer segment {} with {} members", i, members.len()),
                size: members.len(),
                characteristics,
                segment_id,
            });
        }

        let quality_score = silhouette_score(normalized.data.view(), labels, num_segments);

        Ok(SegmentationResult {
            segments,
            assignments,
            quality_score,
            algorithm: algorithm.to_string(),
            schema_version: self.schema.version,
            created_at: Utc::now(),
        })
    }

    fn validate_num_segments(
        &self,
        num_segments: usize,
        input_count: usize,
    ) -> OrchestratorResult<()> {
        if num_segments == 0 || num_segments > input_count {
            return Err(OrchestratorError::InvalidParameter(format!(
                "num_segments must satisfy 1 <= num_segments <= {} (customer count), got {}",
                input_count, num_segments
            )));
        }
        if num_segments > self.config.max_segments {
            return Err(OrchestratorError::InvalidParameter(format!(
                "num_segments {} exceeds the configured maximum of {}",
                num_segments, self.config.max_segments
            )));
        }
        Ok(())
    }

    fn clusterer(&self, algorithm: &str) -> OrchestratorResult<&Arc<dyn Clusterer>> {
        self.clusterers
            .get(algorithm)
            .ok_or_else(|| OrchestratorError::UnsupportedAlgorithm(algorithm.to_string()))
    }
}

impl Default for SegmentationEngine {
    fn default() -> Self {
        Self::new(SegmentationConfig::default())
    }
}
