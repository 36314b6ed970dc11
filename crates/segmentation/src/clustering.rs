//! Clustering capability and the built-in k-means implementation.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use orchestrator_core::config::SegmentationConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// A clustering algorithm that labels each row of a matrix with a cluster
/// index in `0..num_clusters`.
pub trait Clusterer: Send + Sync {
    /// Identifier used to select this algorithm in a segmentation request.
    fn name(&self) -> &str;

    fn fit_predict(&self, data: ArrayView2<f64>, num_clusters: usize)
        -> OrchestratorResult<Vec<usize>>;
}

pub(crate) fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Lloyd's k-means with k-means++ seeding. Deterministic for a given seed.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub seed: u64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl KMeans {
    pub const NAME: &'static str = "kmeans";

    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }

    pub fn from_config(config: &SegmentationConfig) -> Self {
        Self {
            seed: config.random_seed,
            max_iterations: config.max_iterations.max(1),
            tolerance: config.tolerance,
        }
    }

    fn init_centroids(&self, data: ArrayView2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
        let (n, dim) = data.dim();
        let mut centroids = Array2::<f64>::zeros((k, dim));

        let first = rng.gen_range(0..n);
        centroids.row_mut(0).assign(&data.row(first));

        let mut closest: Vec<f64> = data
            .axis_iter(Axis(0))
            .map(|row| squared_distance(row, centroids.row(0)))
            .collect();

        for c in 1..k {
            let total: f64 = closest.iter().sum();
            let pick = if total > 0.0 {
                let target = rng.gen::<f64>() * total;
                let mut cumulative = 0.0;
                let mut chosen = n - 1;
                for (i, d) in closest.iter().enumerate() {
                    cumulative += d;
                    if cumulative > target {
                        chosen = i;
                        break;
                    }
                }
                chosen
            } else {
                // Every point already coincides with a centroid.
                rng.gen_range(0..n)
            };

            centroids.row_mut(c).assign(&data.row(pick));
            for (i, row) in data.axis_iter(Axis(0)).enumerate() {
                let d = squared_distance(row, centroids.row(c));
                if d < closest[i] {
                    closest[i] = d;
                }
            }
        }

        centroids
    }
}

/// Index of the nearest centroid; ties go to the lowest index.
fn nearest(row: ArrayView1<f64>, centroids: &Array2<f64>) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let d = squared_distance(row, centroid);
        if d < best_dist {
            best_dist = d;
            best = c;
        }
    }
    best
}

impl Clusterer for KMeans {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fit_predict(
        &self,
        data: ArrayView2<f64>,
        num_clusters: usize,
    ) -> OrchestratorResult<Vec<usize>> {
        let (n, dim) = data.dim();
        if num_clusters == 0 || num_clusters > n {
            return Err(OrchestratorError::InvalidParameter(format!(
                "num_segments must be between 1 and {}, got {}",
                n, num_clusters
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = self.init_centroids(data, num_clusters, &mut rng);
        let mut labels = vec![0usize; n];

        for iteration in 0..self.max_iterations {
            for (i, row) in data.axis_iter(Axis(0)).enumerate() {
                labels[i] = nearest(row, &centroids);
            }

            let mut sums = Array2::<f64>::zeros((num_clusters, dim));
            let mut counts = vec![0usize; num_clusters];
            for (i, row) in data.axis_iter(Axis(0)).enumerate() {
                let mut sum = sums.row_mut(labels[i]);
                sum += &row;
                counts[labels[i]] += 1;
            }

            let mut shift = 0.0;
            for c in 0..num_clusters {
                // Empty clusters keep their previous centroid.
                if counts[c] == 0 {
                    continue;
                }
                let updated = sums.row(c).mapv(|v| v / counts[c] as f64);
                shift += squared_distance(updated.view(), centroids.row(c));
                centroids.row_mut(c).assign(&updated);
            }

            if shift <= self.tolerance {
                debug!(iteration, shift, "k-means converged");
                break;
            }
        }

        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            labels[i] = nearest(row, &centroids);
        }

        Ok(labels)
    }
}
