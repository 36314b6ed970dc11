use std::path::Path;

use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `ORCHESTRATOR__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub experiments: ExperimentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default = "default_num_segments")]
    pub default_num_segments: usize,
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
    #[serde(default = "default_algorithm")]
    pub default_algorithm: String,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_duration_days")]
    pub default_duration_days: u32,
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

// Default functions
fn default_num_segments() -> usize {
    5
}
fn default_max_segments() -> usize {
    10
}
fn default_algorithm() -> String {
    "kmeans".to_string()
}
fn default_random_seed() -> u64 {
    42
}
fn default_max_iterations() -> usize {
    300
}
fn default_tolerance() -> f64 {
    1e-4
}
fn default_duration_days() -> u32 {
    14
}
fn default_significance_threshold() -> f64 {
    0.95
}
fn default_id_prefix() -> String {
    "exp".to_string()
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            default_num_segments: default_num_segments(),
            max_segments: default_max_segments(),
            default_algorithm: default_algorithm(),
            random_seed: default_random_seed(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            default_duration_days: default_duration_days(),
            significance_threshold: default_significance_threshold(),
            id_prefix: default_id_prefix(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            experiments: ExperimentConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    /// Environment values win over file values.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("ORCHESTRATOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }
}
