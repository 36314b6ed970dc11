use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Experiment definition ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentType {
    Ab,
    Abn,
    Multivariate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Running,
    Completed,
    Cancelled,
}

impl ExperimentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Cancelled)
    }

    /// Only `running -> completed` and `running -> cancelled` are allowed.
    pub fn can_transition_to(&self, to: ExperimentStatus) -> bool {
        *self == ExperimentStatus::Running && to.is_terminal()
    }
}

/// Creation request in its full form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub experiment_type: Option<ExperimentType>,
    pub variants: Vec<String>,
    #[serde(default)]
    pub segment_ids: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    pub duration_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub description: String,
    pub experiment_type: ExperimentType,
    pub variant_ids: Vec<String>,
    pub segment_ids: Vec<String>,
    pub metrics: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: ExperimentStatus,
}

impl Experiment {
    /// Status as observed at `now`: a running experiment past `ends_at` is completed.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ExperimentStatus {
        if self.status == ExperimentStatus::Running && now >= self.ends_at {
            ExperimentStatus::Completed
        } else {
            self.status
        }
    }

    pub fn has_variant(&self, variant_id: &str) -> bool {
        self.variant_ids.iter().any(|v| v == variant_id)
    }
}

// ─── Metrics ────────────────────────────────────────────────────────────

/// Cumulative counters for one variant at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub variant_id: String,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    /// clicks / impressions, 0 when there are no impressions.
    pub ctr: f64,
    /// conversions / clicks, 0 when there are no clicks.
    pub conversion_rate: f64,
    pub revenue: f64,
    pub recorded_at: DateTime<Utc>,
}

impl VariantMetrics {
    pub fn new(
        variant_id: impl Into<String>,
        impressions: u64,
        clicks: u64,
        conversions: u64,
        revenue: f64,
    ) -> Self {
        let ctr = if impressions > 0 {
            clicks as f64 / impressions as f64
        } else {
            0.0
        };
        let conversion_rate = if clicks > 0 {
            conversions as f64 / clicks as f64
        } else {
            0.0
        };
        Self {
            variant_id: variant_id.into(),
            impressions,
            clicks,
            conversions,
            ctr,
            conversion_rate,
            revenue,
            recorded_at: Utc::now(),
        }
    }

    /// A variant with no counters yet.
    pub fn empty(variant_id: impl Into<String>) -> Self {
        Self::new(variant_id, 0, 0, 0, 0.0)
    }
}

// ─── Evaluation output ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignificanceVerdict {
    #[serde(rename = "significant")]
    Significant,
    #[serde(rename = "not significant")]
    NotSignificant,
    #[serde(rename = "inconclusive")]
    Inconclusive,
}

impl std::fmt::Display for SignificanceVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SignificanceVerdict::Significant => "significant",
            SignificanceVerdict::NotSignificant => "not significant",
            SignificanceVerdict::Inconclusive => "inconclusive",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInsights {
    pub best_performing_variant: Option<String>,
    /// Winner's conversion rate over the mean of the other variants, in percent.
    pub improvement_over_others_pct: f64,
    pub statistical_significance: SignificanceVerdict,
    pub recommendation: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub experiment_id: String,
    pub status: ExperimentStatus,
    pub winner: Option<String>,
    pub confidence_level: Option<f64>,
    pub variants_performance: Vec<VariantMetrics>,
    pub insights: ExperimentInsights,
    pub evaluated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_derived_rates() {
        let m = VariantMetrics::new("A", 10_000, 500, 100, 5_000.0);
        assert!((m.ctr - 0.05).abs() < 1e-12);
        assert!((m.conversion_rate - 0.2).abs() < 1e-12);

        let empty = VariantMetrics::empty("B");
        assert_eq!(empty.ctr, 0.0);
        assert_eq!(empty.conversion_rate, 0.0);
    }

    #[test]
    fn test_status_transitions() {
        use ExperimentStatus::*;
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Completed));
    }

    #[test]
    fn test_effective_status_expires_running_only() {
        let now = Utc::now();
        let mut exp = Experiment {
            experiment_id: "exp_00000000".to_string(),
            name: "expiry".to_string(),
            description: String::new(),
            experiment_type: ExperimentType::Ab,
            variant_ids: vec!["A".to_string(), "B".to_string()],
            segment_ids: vec![],
            metrics: vec![],
            started_at: now - Duration::days(15),
            ends_at: now - Duration::days(1),
            status: ExperimentStatus::Running,
        };
        assert_eq!(exp.effective_status(now), ExperimentStatus::Completed);
        assert_eq!(
            exp.effective_status(now - Duration::days(2)),
            ExperimentStatus::Running
        );

        exp.status = ExperimentStatus::Cancelled;
        assert_eq!(exp.effective_status(now), ExperimentStatus::Cancelled);
    }

    #[test]
    fn test_verdict_serialization() {
        assert_eq!(
            serde_json::to_string(&SignificanceVerdict::NotSignificant).unwrap(),
            "\"not significant\""
        );
        assert_eq!(SignificanceVerdict::Significant.to_string(), "significant");
    }

    #[test]
    fn test_request_defaults() {
        let req: ExperimentRequest =
            serde_json::from_str(r#"{"name": "subject line", "variants": ["A", "B"]}"#).unwrap();
        assert!(req.experiment_type.is_none());
        assert!(req.duration_days.is_none());
        assert!(req.segment_ids.is_empty());
    }
}
