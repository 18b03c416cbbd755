//! Configuration types for the feature stages.
//!
//! Every stage has one explicit configuration struct listing all of its
//! options with their defaults. Configs deserialize with `#[serde(default)]`
//! so a JSON pipeline spec only needs to name the options it changes, and
//! unknown keys are ignored. Each config is validated when its stage is built.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::roles::RoleRegistry;

/// Sentinel written into numeric cells by [`ImputeStrategy::Negative`].
pub const NEGATIVE_SENTINEL: f64 = -9_999_999_999_999.0;

/// Label given to categories folded together by the frequency-tail merge.
pub const JOINED_CATEGORY: &str = "joined_category";

// =============================================================================
// Missing values
// =============================================================================

/// Strategy for filling missing numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    /// Fill with 0
    Zero,
    /// Fill with [`NEGATIVE_SENTINEL`]
    #[default]
    Negative,
    /// Fill with the fit-time mean
    Mean,
    /// Fill with the fit-time median
    Median,
    /// Fill with the fit-time most frequent value
    MostFrequent,
    /// Forward/backward fill inside each entity, ordered by timestamp
    TimeSeries,
}

impl ImputeStrategy {
    /// Whether `fit` learns a per-column statistic for this strategy.
    pub fn learns_statistic(self) -> bool {
        matches!(self, Self::Mean | Self::Median | Self::MostFrequent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputeConfig {
    pub strategy: ImputeStrategy,
    /// Entity key column (time-series strategy only).
    pub key_column: Option<String>,
    /// Timestamp column (time-series strategy only).
    pub date_column: Option<String>,
    /// Constant used for cells still empty after forward and backward fill.
    /// Default: -1
    pub fill_end: f64,
    /// Fill entities on a worker pool instead of sequentially.
    /// Default: true
    pub parallel: bool,
    /// Directory holding the transient accumulation file.
    pub resource_dir: PathBuf,
}

impl Default for ImputeConfig {
    fn default() -> Self {
        Self {
            strategy: ImputeStrategy::default(),
            key_column: None,
            date_column: None,
            fill_end: -1.0,
            parallel: true,
            resource_dir: std::env::temp_dir().join("lex-features"),
        }
    }
}

impl ImputeConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.strategy == ImputeStrategy::TimeSeries {
            if self.key_column.is_none() {
                return Err(ConfigValidationError::MissingField("key_column"));
            }
            if self.date_column.is_none() {
                return Err(ConfigValidationError::MissingField("date_column"));
            }
        }
        if !self.fill_end.is_finite() {
            return Err(ConfigValidationError::NotFinite {
                field: "fill_end",
                value: self.fill_end,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Outliers
// =============================================================================

/// How outliers are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Median ± magnitude·IQR borders
    #[default]
    Iqr,
    /// Per-column density scoring oracle
    Density,
}

/// What the density method does with flagged values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutlierTreatment {
    /// Clamp the column to its percentile borders
    #[default]
    Clamp,
    /// Replace flagged values with 0
    Zero,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub method: OutlierMethod,
    pub treatment: OutlierTreatment,
    /// IQR multiplier. Default: 3.5
    pub magnitude: f64,
    /// Oracle cluster size; 1% of the fit rows when unset.
    pub min_cluster_size: Option<usize>,
    /// Oracle neighbourhood radius; `max(1, median + std)` when unset.
    pub radius: Option<f64>,
    /// Score quantile above which a value is flagged. Default: 0.99
    pub score_quantile: f64,
    /// Upper clamp percentile. Default: 0.999
    pub upper_q: f64,
    /// Lower clamp percentile. Default: 0.001
    pub lower_q: f64,
    /// Step used to pull infinite clamp borders inwards. Default: 0.001
    pub increment: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            method: OutlierMethod::default(),
            treatment: OutlierTreatment::default(),
            magnitude: 3.5,
            min_cluster_size: None,
            radius: None,
            score_quantile: 0.99,
            upper_q: 0.999,
            lower_q: 0.001,
            increment: 0.001,
        }
    }
}

impl OutlierConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(self.magnitude.is_finite() && self.magnitude > 0.0) {
            return Err(ConfigValidationError::NotPositive {
                field: "magnitude",
                value: self.magnitude,
            });
        }
        for (field, value) in [
            ("score_quantile", self.score_quantile),
            ("upper_q", self.upper_q),
            ("lower_q", self.lower_q),
        ] {
            check_fraction(field, value)?;
        }
        if self.lower_q >= self.upper_q {
            return Err(ConfigValidationError::InvalidRange {
                low: "lower_q",
                high: "upper_q",
            });
        }
        if !(self.increment > 0.0 && self.increment < 1.0) {
            return Err(ConfigValidationError::NotPositive {
                field: "increment",
                value: self.increment,
            });
        }
        if let Some(radius) = self.radius
            && !(radius.is_finite() && radius > 0.0)
        {
            return Err(ConfigValidationError::NotPositive {
                field: "radius",
                value: radius,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Category merging
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyMergeConfig {
    /// Cumulative share after which categories are folded. Default: 0.8
    pub threshold: f64,
    pub label: String,
}

impl Default for FrequencyMergeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            label: JOINED_CATEGORY.to_string(),
        }
    }
}

impl FrequencyMergeConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        check_fraction("threshold", self.threshold)?;
        if self.label.is_empty() {
            return Err(ConfigValidationError::MissingField("label"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetMergeConfig {
    /// Minimum category count before a column is considered. Default: 10
    pub uniques: usize,
    /// Maximum positive-rate difference for an edge. Default: 0.02
    pub threshold: f64,
}

impl Default for TargetMergeConfig {
    fn default() -> Self {
        Self {
            uniques: 10,
            threshold: 0.02,
        }
    }
}

impl TargetMergeConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        check_fraction("threshold", self.threshold)
    }
}

// =============================================================================
// Feature selection
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Rank correlation at or above which a pair is pruned. Default: 0.7
    pub threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self { threshold: 0.7 }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        check_fraction("threshold", self.threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChiSquareConfig {
    /// Skip the test when the target has more distinct values. Default: 10
    pub y_threshold: usize,
    /// Keep this fraction of categorical columns, ranked by statistic.
    /// When unset, columns are kept by p-value instead.
    pub threshold: Option<f64>,
    /// Significance level used when `threshold` is unset. Default: 0.05
    pub alpha: f64,
}

impl Default for ChiSquareConfig {
    fn default() -> Self {
        Self {
            y_threshold: 10,
            threshold: None,
            alpha: 0.05,
        }
    }
}

impl ChiSquareConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if let Some(threshold) = self.threshold {
            check_fraction("threshold", threshold)?;
        }
        check_fraction("alpha", self.alpha)
    }
}

/// Kind of supervised problem the importance model is trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    #[default]
    Classification,
    Regression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceConfig {
    /// Number of features kept. Default: 100
    pub top_n: usize,
    pub problem_type: ProblemType,
    /// Trees in the built-in stump forest. Default: 100
    pub n_estimators: usize,
    /// Bootstrap seed for the built-in stump forest.
    pub seed: u64,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            top_n: 100,
            problem_type: ProblemType::default(),
            n_estimators: 100,
            seed: 42,
        }
    }
}

impl ImportanceConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.top_n == 0 {
            return Err(ConfigValidationError::Zero("top_n"));
        }
        if self.n_estimators == 0 {
            return Err(ConfigValidationError::Zero("n_estimators"));
        }
        Ok(())
    }
}

// =============================================================================
// Encoding and scaling
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OneHotConfig {
    /// Drop the first (sorted) category of each column. Default: true
    pub drop_first: bool,
}

impl Default for OneHotConfig {
    fn default() -> Self {
        Self { drop_first: true }
    }
}

// =============================================================================
// Time-series windowing
// =============================================================================

/// Windowing method. Only sliding windows exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowMethod {
    #[default]
    Window,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesConfig {
    pub method: WindowMethod,
    pub key_column: Option<String>,
    pub date_column: Option<String>,
    /// Target column name; taken from the target series when unset.
    pub target: Option<String>,
    /// Columns copied through without lagging.
    pub static_columns: Vec<String>,
    /// Number of lagged steps. Default: 5
    pub window: usize,
    /// Number of future target steps. Default: 1
    pub horizon: usize,
    /// Drop rows whose window is incomplete. Default: false
    pub drop_incomplete: bool,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            method: WindowMethod::default(),
            key_column: None,
            date_column: None,
            target: None,
            static_columns: Vec::new(),
            window: 5,
            horizon: 1,
            drop_incomplete: false,
        }
    }
}

impl TimeSeriesConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.key_column.is_none() {
            return Err(ConfigValidationError::MissingField("key_column"));
        }
        if self.date_column.is_none() {
            return Err(ConfigValidationError::MissingField("date_column"));
        }
        if self.window == 0 {
            return Err(ConfigValidationError::Zero("window"));
        }
        if self.horizon == 0 {
            return Err(ConfigValidationError::Zero("horizon"));
        }
        Ok(())
    }
}

// =============================================================================
// Pipeline spec
// =============================================================================

/// One entry of a pipeline spec, tagged by stage name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageConfig {
    Impute(ImputeConfig),
    Outliers(OutlierConfig),
    FrequencyMerge(FrequencyMergeConfig),
    TargetMerge(TargetMergeConfig),
    ConstantColumns,
    Correlation(CorrelationConfig),
    ChiSquare(ChiSquareConfig),
    Importance(ImportanceConfig),
    LabelEncoding,
    OneHot(OneHotConfig),
    Scaling,
    TimeSeries(TimeSeriesConfig),
}

/// Column roles plus an ordered list of stages, usually loaded from JSON.
///
/// # Example
///
/// ```rust,ignore
/// let spec: PipelineSpec = serde_json::from_str(r#"{
///     "numeric": ["age", "fare"],
///     "categorical": ["city"],
///     "stages": [
///         {"stage": "impute", "strategy": "median"},
///         {"stage": "frequency_merge", "threshold": 0.9},
///         {"stage": "label_encoding"}
///     ]
/// }"#)?;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSpec {
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
    pub target: Option<String>,
    pub stages: Vec<StageConfig>,
}

impl PipelineSpec {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Role registry described by this spec.
    pub fn roles(&self) -> RoleRegistry {
        RoleRegistry::new(&self.numeric, &self.categorical, self.target.as_deref())
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for stage in &self.stages {
            match stage {
                StageConfig::Impute(c) => c.validate()?,
                StageConfig::Outliers(c) => c.validate()?,
                StageConfig::FrequencyMerge(c) => c.validate()?,
                StageConfig::TargetMerge(c) => c.validate()?,
                StageConfig::Correlation(c) => c.validate()?,
                StageConfig::ChiSquare(c) => c.validate()?,
                StageConfig::Importance(c) => c.validate()?,
                StageConfig::TimeSeries(c) => c.validate()?,
                StageConfig::ConstantColumns
                | StageConfig::LabelEncoding
                | StageConfig::OneHot(_)
                | StageConfig::Scaling => {}
            }
        }
        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid fraction for '{field}': {value} (must be between 0.0 and 1.0)")]
    InvalidFraction { field: &'static str, value: f64 },

    #[error("'{field}' must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("'{field}' must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("'{low}' must be smaller than '{high}'")]
    InvalidRange {
        low: &'static str,
        high: &'static str,
    },

    #[error("'{0}' must be at least 1")]
    Zero(&'static str),

    #[error("Missing required option '{0}'")]
    MissingField(&'static str),
}

fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigValidationError::InvalidFraction { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let impute = ImputeConfig::default();
        assert_eq!(impute.strategy, ImputeStrategy::Negative);
        assert_eq!(impute.fill_end, -1.0);

        let outliers = OutlierConfig::default();
        assert_eq!(outliers.magnitude, 3.5);
        assert_eq!(outliers.upper_q, 0.999);
        assert_eq!(outliers.lower_q, 0.001);

        assert_eq!(FrequencyMergeConfig::default().label, "joined_category");
        assert_eq!(TargetMergeConfig::default().uniques, 10);
        assert_eq!(CorrelationConfig::default().threshold, 0.7);
        assert_eq!(ChiSquareConfig::default().alpha, 0.05);
        assert_eq!(ImportanceConfig::default().top_n, 100);
        assert_eq!(TimeSeriesConfig::default().window, 5);
        assert_eq!(TimeSeriesConfig::default().horizon, 1);
        assert!(!TimeSeriesConfig::default().drop_incomplete);
    }

    #[test]
    fn test_time_series_impute_requires_key_and_date() {
        let config = ImputeConfig {
            strategy: ImputeStrategy::TimeSeries,
            key_column: Some("id".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField("date_column"))
        ));
    }

    #[test]
    fn test_outlier_quantile_order() {
        let config = OutlierConfig {
            lower_q: 0.9,
            upper_q: 0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(OutlierConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_fraction() {
        let config = CorrelationConfig { threshold: 1.5 };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn test_spec_from_json_ignores_unknown_keys() {
        let spec = PipelineSpec::from_json(
            r#"{
                "numeric": ["age"],
                "categorical": ["city"],
                "stages": [
                    {"stage": "impute", "strategy": "median", "unused": 1},
                    {"stage": "frequency_merge", "threshold": 0.9},
                    {"stage": "label_encoding"},
                    {"stage": "time_series", "key_column": "id", "date_column": "day"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(spec.stages.len(), 4);
        assert!(matches!(
            &spec.stages[0],
            StageConfig::Impute(c) if c.strategy == ImputeStrategy::Median
        ));
        assert!(matches!(
            &spec.stages[1],
            StageConfig::FrequencyMerge(c) if c.threshold == 0.9 && c.label == "joined_category"
        ));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_unknown_window_method_is_rejected() {
        let parsed = PipelineSpec::from_json(
            r#"{"stages": [{"stage": "time_series", "method": "expanding"}]}"#,
        );
        assert!(parsed.is_err());
    }
}
