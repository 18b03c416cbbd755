//! Error and outcome types for the feature stages.
//!
//! Fatal failures are reported through [`FeatureError`]. Algorithmic steps that
//! are allowed to fall back to a pass-through (pruning, density scoring,
//! percentile clamping) report that fallback through [`Outcome`] and are
//! recorded on the stage as a [`Degradation`] instead of failing the call.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

use crate::config::ConfigValidationError;

/// The main error type for feature stages.
#[derive(Error, Debug)]
pub enum FeatureError {
    /// Column was not found in the dataset.
    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigValidationError),

    /// `transform` was called before `fit`.
    #[error("Stage '{0}' has not been fitted")]
    NotFitted(&'static str),

    /// A stage needs the target but none was supplied.
    #[error("Stage '{0}' requires a target column")]
    MissingTarget(&'static str),

    /// The shared accumulation target could not be written or read back.
    #[error("Accumulation target '{path}' failed: {reason}")]
    Accumulation { path: String, reason: String },

    /// An external collaborator (windowing, importance model) failed.
    #[error("Collaborator '{name}' failed: {reason}")]
    Collaborator { name: &'static str, reason: String },

    /// Internal error (e.g., worker pool construction failure).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FeatureError>,
    },
}

impl FeatureError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FeatureError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code, independent of the message text.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::NotFitted(_) => "NOT_FITTED",
            Self::MissingTarget(_) => "MISSING_TARGET",
            Self::Accumulation { .. } => "ACCUMULATION_FAILED",
            Self::Collaborator { .. } => "COLLABORATOR_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Whether the caller can fix this by changing inputs or configuration.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ColumnNotFound(_)
            | Self::InvalidConfig(_)
            | Self::NotFitted(_)
            | Self::MissingTarget(_) => true,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for FeatureError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("FeatureError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for stage operations.
pub type Result<T> = std::result::Result<T, FeatureError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FeatureError::Polars(e).with_context(context))
    }
}

// =============================================================================
// Degradable outcomes
// =============================================================================

/// Result of an algorithmic step that may fall back to a weaker behaviour.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The step ran as configured.
    Applied(T),
    /// The step fell back; `value` is what the stage continues with.
    Degraded { value: T, reason: String },
}

impl<T> Outcome<T> {
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Outcome::Degraded {
            value,
            reason: reason.into(),
        }
    }

    /// Unwrap the value, recording the fallback reason in `sink` if any.
    pub fn record(
        self,
        stage: &'static str,
        column: Option<&str>,
        sink: &mut Vec<Degradation>,
    ) -> T {
        match self {
            Outcome::Applied(value) => value,
            Outcome::Degraded { value, reason } => {
                sink.push(Degradation {
                    stage,
                    column: column.map(str::to_string),
                    reason,
                });
                value
            }
        }
    }
}

/// A recorded fallback, visible to callers after `fit` or `transform`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Degradation {
    pub stage: &'static str,
    pub column: Option<String>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(FeatureError::NotFitted("scaling").error_code(), "NOT_FITTED");
        assert_eq!(
            FeatureError::ColumnNotFound("test".to_string()).error_code(),
            "COLUMN_NOT_FOUND"
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(FeatureError::MissingTarget("chi_square").is_recoverable());
        assert!(!FeatureError::Internal("pool".to_string()).is_recoverable());
        assert!(
            FeatureError::ColumnNotFound("a".to_string())
                .with_context("importance")
                .is_recoverable()
        );
    }

    #[test]
    fn test_error_serialization() {
        let error = FeatureError::ColumnNotFound("Age".to_string());
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("COLUMN_NOT_FOUND"));
        assert!(json.contains("Age"));
    }

    #[test]
    fn test_with_context() {
        let error =
            FeatureError::ColumnNotFound("test".to_string()).with_context("During windowing");
        assert!(error.to_string().contains("During windowing"));
        assert_eq!(error.error_code(), "COLUMN_NOT_FOUND");
    }

    #[test]
    fn test_outcome_record() {
        let mut sink = Vec::new();
        let kept = Outcome::Applied(3).record("outliers", Some("x"), &mut sink);
        assert_eq!(kept, 3);
        assert!(sink.is_empty());

        let fallback = Outcome::degraded(0, "no oracle").record("outliers", Some("x"), &mut sink);
        assert_eq!(fallback, 0);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].column.as_deref(), Some("x"));
        assert_eq!(sink[0].reason, "no oracle");
    }
}
