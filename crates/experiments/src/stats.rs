//! Significance testing for variant comparisons.

use crate::types::VariantMetrics;

/// Confidence that `winner` truly converts better than `runner_up`.
pub trait SignificanceTest: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a value in [0, 1].
    fn confidence(&self, winner: &VariantMetrics, runner_up: &VariantMetrics) -> f64;
}

/// Pooled two-proportion z-test on conversion rates (conversions out of clicks).
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoProportionZTest;

impl TwoProportionZTest {
    /// z statistic for `x1/n1` vs `x2/n2`, or `None` when either sample is
    /// empty or the pooled standard error is zero.
    pub fn z_score(x1: u64, n1: u64, x2: u64, n2: u64) -> Option<f64> {
        if n1 == 0 || n2 == 0 {
            return None;
        }
        let p1 = x1 as f64 / n1 as f64;
        let p2 = x2 as f64 / n2 as f64;
        let p = (x1 as f64 + x2 as f64) / (n1 as f64 + n2 as f64);
        let se = (p * (1.0 - p) * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
        if se == 0.0 {
            return None;
        }
        Some((p1 - p2) / se)
    }
}

impl SignificanceTest for TwoProportionZTest {
    fn name(&self) -> &str {
        "two_proportion_z_test"
    }

    fn confidence(&self, winner: &VariantMetrics, runner_up: &VariantMetrics) -> f64 {
        match Self::z_score(
            winner.conversions,
            winner.clicks,
            runner_up.conversions,
            runner_up.clicks,
        ) {
            Some(z) => normal_cdf(z).clamp(0.0, 1.0),
            None => 0.5,
        }
    }
}

/// Standard normal CDF (Abramowitz & Stegun 26.2.17, |error| < 1e-6 with
/// these seven-digit coefficients).
pub fn normal_cdf(z: f64) -> f64 {
    if z < 0.0 {
        return 1.0 - normal_cdf(-z);
    }
    let t = 1.0 / (1.0 + 0.2316419 * z);
    let d = 0.3989422804014327 * (-z * z / 2.0).exp();
    let tail = d
        * t
        * (0.3193815 + t * (-0.3565638 + t * (1.781478 + t * (-1.821256 + t * 1.330274))));
    1.0 - tail
}
