//! Customer segmentation — feature extraction over a versioned schema,
//! per-run standardization, pluggable clustering and silhouette scoring.

pub mod clustering;
pub mod engine;
pub mod features;
pub mod quality;
pub mod types;

pub use clustering::{Clusterer, KMeans};
pub use engine::SegmentationEngine;
pub use features::{normalize, FeatureSchema, NormalizedVectors};
pub use quality::silhouette_score;
pub use types::{AttributeGroup, CustomerFeatures, Segment, SegmentationResult};
