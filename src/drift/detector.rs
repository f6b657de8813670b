//! Per-feature drift detection between a reference and a current dataset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::domain::{Column, ColumnKind, ColumnValues, Dataset};

use super::error::DriftError;
use super::stats::{jensen_shannon_distance, ks_statistic};

/// Threshold applied to features without an override
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// How per-feature results combine into the dataset-level flag
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Any drifted feature flags the dataset
    #[default]
    AnyFeature,

    /// At least this many drifted features (minimum 1)
    MinCount(usize),

    /// At least this share of the compared features, in `[0, 1]`
    Share(f64),
}

impl AggregationPolicy {
    pub fn is_drifted(&self, drifted: usize, total: usize) -> bool {
        if drifted == 0 {
            return false;
        }
        match *self {
            Self::AnyFeature => true,
            Self::MinCount(n) => drifted >= n.max(1),
            Self::Share(share) => drifted as f64 / total as f64 >= share,
        }
    }

    fn validate(&self) -> Result<(), DriftError> {
        match *self {
            Self::Share(share) if !(0.0..=1.0).contains(&share) => Err(DriftError::InvalidPolicy(
                format!("drifted share must be within [0, 1], got {}", share),
            )),
            _ => Ok(()),
        }
    }
}

/// Thresholds and aggregation for a drift check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,

    /// Overrides by feature name
    #[serde(default)]
    pub per_feature: BTreeMap<String, f64>,

    #[serde(default)]
    pub aggregation: AggregationPolicy,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_THRESHOLD,
            per_feature: BTreeMap::new(),
            aggregation: AggregationPolicy::default(),
        }
    }
}

impl ThresholdPolicy {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    pub fn with_feature_threshold(mut self, feature: impl Into<String>, threshold: f64) -> Self {
        self.per_feature.insert(feature.into(), threshold);
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationPolicy) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Threshold for a feature
    pub fn threshold(&self, feature: &str) -> f64 {
        self.per_feature
            .get(feature)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    fn validate(&self) -> Result<(), DriftError> {
        let thresholds = std::iter::once(("default", self.default_threshold))
            .chain(self.per_feature.iter().map(|(f, t)| (f.as_str(), *t)));
        for (feature, threshold) in thresholds {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(DriftError::InvalidPolicy(format!(
                    "threshold for '{}' must be within [0, 1], got {}",
                    feature, threshold
                )));
            }
        }
        self.aggregation.validate()
    }
}

/// Distance used for a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMethod {
    /// Two-sample Kolmogorov–Smirnov statistic, numeric features
    KolmogorovSmirnov,

    /// Jensen–Shannon distance, categorical features
    JensenShannon,
}

/// Result for one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub kind: ColumnKind,
    pub method: DriftMethod,
    pub statistic: f64,
    pub threshold: f64,
    pub drifted: bool,
}

/// A requested feature that could not be compared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFeature {
    pub feature: String,
    pub reason: String,
}

/// Structured drift report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Per-feature results, in comparison order
    pub features: Vec<FeatureDrift>,

    /// Features without usable values on either side; not part of the aggregate
    #[serde(default)]
    pub skipped: Vec<SkippedFeature>,

    pub drifted_count: usize,
    pub aggregation: AggregationPolicy,
    pub dataset_drifted: bool,
}

impl DriftReport {
    pub fn feature(&self, name: &str) -> Option<&FeatureDrift> {
        self.features.iter().find(|f| f.feature == name)
    }

    pub fn drifted_features(&self) -> impl Iterator<Item = &str> {
        self.features
            .iter()
            .filter(|f| f.drifted)
            .map(|f| f.feature.as_str())
    }
}

/// Compares datasets feature by feature
#[derive(Debug, Clone, Default)]
pub struct DriftDetector {
    policy: ThresholdPolicy,
}

impl DriftDetector {
    pub fn new(policy: ThresholdPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    /// Compare `current` against `reference`.
    ///
    /// An empty `features` list compares every column present in both
    /// datasets, in reference column order. A feature with no usable values
    /// (all missing, or zero rows) in either dataset is skipped and listed in
    /// [`DriftReport::skipped`].
    #[instrument(skip_all, fields(features = features.len()))]
    pub fn detect(
        &self,
        reference: &Dataset,
        current: &Dataset,
        features: &[String],
    ) -> Result<DriftReport, DriftError> {
        self.policy.validate()?;

        let features: Vec<String> = if features.is_empty() {
            reference
                .column_names()
                .filter(|name| current.column(name).is_some())
                .map(str::to_string)
                .collect()
        } else {
            features.to_vec()
        };

        let mut results = Vec::with_capacity(features.len());
        let mut skipped = Vec::new();
        for feature in &features {
            let reference_column = find_column(reference, feature, "reference")?;
            let current_column = find_column(current, feature, "current")?;
            let (method, statistic) = match compare(feature, reference_column, current_column)? {
                Comparison::Measured(method, statistic) => (method, statistic),
                Comparison::Unusable(side) => {
                    warn!(%feature, dataset = side, "Feature has no usable values, skipped");
                    skipped.push(SkippedFeature {
                        feature: feature.clone(),
                        reason: format!("no usable values in the {} dataset", side),
                    });
                    continue;
                }
            };

            let threshold = self.policy.threshold(feature);
            let drifted = statistic > threshold;
            debug!(%feature, statistic, threshold, drifted, "Feature compared");

            results.push(FeatureDrift {
                feature: feature.clone(),
                kind: reference_column.kind(),
                method,
                statistic,
                threshold,
                drifted,
            });
        }

        let drifted_count = results.iter().filter(|f| f.drifted).count();
        let dataset_drifted = self
            .policy
            .aggregation
            .is_drifted(drifted_count, results.len());

        Ok(DriftReport {
            features: results,
            skipped,
            drifted_count,
            aggregation: self.policy.aggregation,
            dataset_drifted,
        })
    }
}

fn find_column<'a>(
    dataset: &'a Dataset,
    feature: &str,
    side: &str,
) -> Result<&'a Column, DriftError> {
    dataset
        .column(feature)
        .ok_or_else(|| DriftError::SchemaMismatch {
            feature: feature.to_string(),
            reason: format!("missing from the {} dataset", side),
        })
}

enum Comparison {
    Measured(DriftMethod, f64),

    /// Side without a single usable value
    Unusable(&'static str),
}

fn compare(feature: &str, reference: &Column, current: &Column) -> Result<Comparison, DriftError> {
    match (&reference.values, &current.values) {
        (ColumnValues::Numeric(a), ColumnValues::Numeric(b)) => Ok(match ks_statistic(a, b) {
            Some(statistic) => Comparison::Measured(DriftMethod::KolmogorovSmirnov, statistic),
            None => Comparison::Unusable(unusable_side(a.iter().any(|v| v.is_finite()))),
        }),
        (ColumnValues::Categorical(a), ColumnValues::Categorical(b)) => {
            Ok(match jensen_shannon_distance(a, b) {
                Some(statistic) => Comparison::Measured(DriftMethod::JensenShannon, statistic),
                None => Comparison::Unusable(unusable_side(!a.is_empty())),
            })
        }
        _ => Err(DriftError::SchemaMismatch {
            feature: feature.to_string(),
            reason: format!(
                "{} in the reference dataset but {} in the current dataset",
                reference.kind().as_str(),
                current.kind().as_str()
            ),
        }),
    }
}

fn unusable_side(reference_usable: bool) -> &'static str {
    if reference_usable {
        "current"
    } else {
        "reference"
    }
}
