//! Silhouette-style cluster quality.

use ndarray::{ArrayView2, Axis};

use crate::clustering::squared_distance;

/// Mean over all points of `(b - a) / max(a, b)`, where `a` is the mean
/// distance to the other members of the point's own cluster and `b` the mean
/// distance to the members of the nearest other non-empty cluster.
///
/// Points in a singleton cluster, points with no other non-empty cluster to
/// compare against, and points with `max(a, b) == 0` contribute 0.
pub fn silhouette_score(data: ArrayView2<f64>, labels: &[usize], num_clusters: usize) -> f64 {
    let n = data.nrows();
    if n == 0 || labels.len() != n || labels.iter().any(|&l| l >= num_clusters) {
        return 0.0;
    }

    let mut sizes = vec![0usize; num_clusters];
    for &label in labels {
        sizes[label] += 1;
    }

    let rows: Vec<_> = data.axis_iter(Axis(0)).collect();
    let mut total = 0.0;

    for i in 0..n {
        let own = labels[i];
        if sizes[own] <= 1 {
            continue;
        }

        let mut dist_sums = vec![0.0f64; num_clusters];
        for j in 0..n {
            if i != j {
                dist_sums[labels[j]] += squared_distance(rows[i], rows[j]).sqrt();
            }
        }

        let a = dist_sums[own] / (sizes[own] - 1) as f64;
        let b = (0..num_clusters)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| dist_sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);

        if !b.is_finite() {
            continue;
        }
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    (total / n as f64).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_well_separated_clusters_score_near_one() {
        let data = array![[0.0, 0.0], [0.0, 0.1], [100.0, 100.0], [100.0, 100.1]];
        let score = silhouette_score(data.view(), &[0, 0, 1, 1], 2);
        assert!(score > 0.99, "score = {score}");
    }

    #[test]
    fn test_bad_assignment_scores_negative() {
        let data = array![[0.0, 0.0], [0.0, 0.1], [100.0, 100.0], [100.0, 100.1]];
        let score = silhouette_score(data.view(), &[0, 1, 0, 1], 2);
        assert!(score < 0.0, "score = {score}");
    }

    #[test]
    fn test_identical_points_score_zero() {
        let data = Array2::<f64>::zeros((4, 12));
        assert_eq!(silhouette_score(data.view(), &[0, 0, 0, 0], 2), 0.0);
        assert_eq!(silhouette_score(data.view(), &[0, 0, 1, 1], 2), 0.0);
    }

    #[test]
    fn test_singleton_contributes_zero() {
        // Point 2 sits alone; only points 0 and 1 contribute.
        let data = array![[0.0], [1.0], [10.0]];
        let score = silhouette_score(data.view(), &[0, 0, 1], 2);
        // a = 1, b = 10 for point 0 and a = 1, b = 9 for point 1.
        let expected = ((10.0 - 1.0) / 10.0 + (9.0 - 1.0) / 9.0) / 3.0;
        assert!((score - expected).abs() < 1e-12);
    }
}
