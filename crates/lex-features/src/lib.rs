//! Tabular Feature-Engineering Stages
//!
//! Stateful fit/transform stages for preparing tabular data for machine
//! learning, built on Polars.
//!
//! # Overview
//!
//! Every stage learns its parameters from a training table in `fit` and
//! applies them to any table with the same schema in `transform`:
//!
//! - **Imputation**: constant, statistic, or per-entity time-series fill with
//!   `<col>_was_missing` indicators
//! - **Outliers**: IQR clamping or density scoring with `<col>_has_outliers`
//!   indicators
//! - **Category merging**: frequency-tail folding and target-rate merging
//! - **Feature selection**: constant columns, rank correlation, chi-square,
//!   model importance
//! - **Encoding and scaling**: label codes, one-hot columns, min-max scaling
//!   with a fixed output layout
//! - **Time-series windowing**: lagged and future-target columns per entity
//!
//! Column roles are not inferred. They are declared once in a
//! [`RoleRegistry`] and handed from stage to stage; stages register the
//! indicator columns they create so later stages treat them as categorical.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lex_features::{Pipeline, PipelineSpec};
//! use polars::prelude::*;
//!
//! let spec = PipelineSpec::from_json(r#"{
//!     "numeric": ["age", "fare"],
//!     "categorical": ["city"],
//!     "stages": [
//!         {"stage": "impute", "strategy": "median"},
//!         {"stage": "outliers", "method": "iqr"},
//!         {"stage": "frequency_merge"},
//!         {"stage": "one_hot"},
//!         {"stage": "scaling"}
//!     ]
//! }"#)?;
//!
//! let mut pipeline = Pipeline::from_spec(&spec)?;
//! let train = pipeline.fit_transform(train_df, Some(&y))?;
//! let test = pipeline.transform(test_df, None)?;
//!
//! for d in pipeline.degradations() {
//!     println!("{} fell back on {:?}: {}", d.stage, d.column, d.reason);
//! }
//! ```
//!
//! # Collaborators
//!
//! Density scoring, windowing and importance ranking go through the traits in
//! [`oracles`]. Each has a built-in implementation; pass your own with the
//! `with_*` constructors of the corresponding stage.

pub mod config;
pub mod error;
pub mod frame;
pub mod oracles;
pub mod pipeline;
pub mod roles;
pub mod stages;
pub mod stats;

// Re-exports for convenient access
pub use config::{
    ChiSquareConfig, ConfigValidationError, CorrelationConfig, FrequencyMergeConfig,
    ImportanceConfig, ImputeConfig, ImputeStrategy, OneHotConfig, OutlierConfig, OutlierMethod,
    OutlierTreatment, PipelineSpec, ProblemType, StageConfig, TargetMergeConfig, TimeSeriesConfig,
    WindowMethod,
};
pub use error::{Degradation, FeatureError, Outcome, Result, ResultExt};
pub use oracles::{
    DensityScorer, DensityScorerFactory, ImportanceModel, LagWindower, OutlierScorer,
    ScorerFactory, StumpForest, Windower,
};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use roles::{ColumnRole, RoleRegistry};
pub use stages::{
    ChiSquareStage, ConstantColumnStage, CorrelationStage, FrequencyMergeStage, ImportanceStage,
    ImputeStage, LabelEncodingStage, OneHotStage, OutlierStage, ScalingStage, Stage,
    TargetMergeStage, TimeSeriesStage,
};
