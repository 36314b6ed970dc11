//! Winner selection and insight generation over one consistent snapshot.

use chrono::{DateTime, Utc};

use crate::stats::SignificanceTest;
use crate::types::{
    Experiment, ExperimentInsights, ExperimentResult, SignificanceVerdict, VariantMetrics,
};

/// Evaluate `latest` (one entry per declared variant, in declaration order).
pub fn analyze(
    experiment: &Experiment,
    latest: Vec<VariantMetrics>,
    test: &dyn SignificanceTest,
    significance_threshold: f64,
    now: DateTime<Utc>,
) -> ExperimentResult {
    // Stable sort keeps declaration order among equal conversion rates.
    let mut ranked: Vec<&VariantMetrics> = latest.iter().filter(|m| m.clicks > 0).collect();
    ranked.sort_by(|a, b| {
        b.conversion_rate
            .partial_cmp(&a.conversion_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let winner = ranked.first().copied();
    let confidence_level = match (ranked.first(), ranked.get(1)) {
        (Some(best), Some(second)) => Some(test.confidence(best, second).clamp(0.0, 1.0)),
        _ => None,
    };

    let verdict = match confidence_level {
        Some(c) if c >= significance_threshold => SignificanceVerdict::Significant,
        Some(_) => SignificanceVerdict::NotSignificant,
        None => SignificanceVerdict::Inconclusive,
    };

    let improvement = winner
        .map(|w| relative_improvement(w, &latest))
        .unwrap_or(0.0);

    let recommendation = match (winner, verdict) {
        (Some(w), SignificanceVerdict::Significant) => {
            format!("Roll out {} to all segments", w.variant_id)
        }
        _ => "Keep collecting data".to_string(),
    };

    let summary = match (winner, confidence_level) {
        (None, _) => "Evaluation inconclusive: no variant has recorded clicks yet".to_string(),
        (Some(w), None) => format!(
            "Evaluation inconclusive: only {} has traffic, at least two variants with clicks are required",
            w.variant_id
        ),
        (Some(w), Some(c)) => format!(
            "{} leads with a {:.2}% conversion rate ({:+.1}% vs. the other variants), {} at {:.1}% confidence",
            w.variant_id,
            w.conversion_rate * 100.0,
            improvement,
            verdict,
            c * 100.0
        ),
    };

    ExperimentResult {
        experiment_id: experiment.experiment_id.clone(),
        status: experiment.effective_status(now),
        winner: winner.map(|w| w.variant_id.clone()),
        confidence_level,
        insights: ExperimentInsights {
            best_performing_variant: winner.map(|w| w.variant_id.clone()),
            improvement_over_others_pct: improvement,
            statistical_significance: verdict,
            recommendation,
            summary,
        },
        variants_performance: latest.clone(),
        evaluated_at: now,
    }
}

/// Percent lift of `winner` over the mean conversion rate of every other variant.
fn relative_improvement(winner: &VariantMetrics, all: &[VariantMetrics]) -> f64 {
    let others: Vec<f64> = all
        .iter()
        .filter(|m| m.variant_id != winner.variant_id)
        .map(|m| m.conversion_rate)
        .collect();
    if others.is_empty() {
        return 0.0;
    }
    let mean = others.iter().sum::<f64>() / others.len() as f64;
    if mean > 0.0 {
        (winner.conversion_rate - mean) / mean * 100.0
    } else {
        0.0
    }
}
