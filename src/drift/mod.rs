//! Statistical drift detection.
//!
//! Numeric features are compared with the two-sample Kolmogorov–Smirnov
//! statistic, categorical features with the Jensen–Shannon distance. A
//! feature drifts when its statistic is strictly above its threshold.

pub mod detector;
pub mod error;
pub mod stats;

pub use detector::{
    AggregationPolicy, DriftDetector, DriftMethod, DriftReport, FeatureDrift, SkippedFeature,
    ThresholdPolicy, DEFAULT_THRESHOLD,
};
pub use error::DriftError;
pub use stats::{jensen_shannon_distance, ks_statistic};
