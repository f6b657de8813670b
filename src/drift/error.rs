use thiserror::Error;

/// Errors raised by the drift detector
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriftError {
    /// A requested feature is missing, or its kind differs between datasets
    #[error("Schema mismatch for feature '{feature}': {reason}")]
    SchemaMismatch { feature: String, reason: String },

    #[error("Invalid drift policy: {0}")]
    InvalidPolicy(String),
}
