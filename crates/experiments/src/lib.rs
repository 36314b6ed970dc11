//! A/B/n experimentation — experiment registry, funnel-checked metric
//! ingestion, and winner selection with a two-proportion significance test.

pub mod analysis;
pub mod engine;
pub mod stats;
pub mod types;

pub use engine::{ExperimentEngine, ExperimentRegistry, ExperimentState};
pub use stats::{normal_cdf, SignificanceTest, TwoProportionZTest};
pub use types::{
    Experiment, ExperimentInsights, ExperimentRequest, ExperimentResult, ExperimentStatus,
    ExperimentType, SignificanceVerdict, VariantMetrics,
};
