//! External collaborators consumed by the stages.
//!
//! Stages depend on these traits only. Each trait ships with a default
//! implementation so the crate works standalone, and callers can plug in
//! their own (for example a gradient-boosting importance model).
//!
//! Implementations report failures via `anyhow::Result`; the stages decide
//! whether a failure degrades the step or fails the call.

mod density;
mod importance;
mod window;

pub use density::{DensityScorer, DensityScorerFactory};
pub use importance::StumpForest;
pub use window::LagWindower;

use anyhow::Result;
use polars::prelude::*;

use crate::config::ProblemType;

/// Scores one numeric column; larger scores mean more outlying values.
pub trait OutlierScorer: Send + Sync {
    /// One score per input value, in input order.
    fn score(&self, values: &[f64]) -> Result<Vec<f64>>;
}

/// Builds a scorer for one column from `(min_cluster_size, radius)`.
pub trait ScorerFactory: Send + Sync {
    fn build(&self, min_cluster_size: usize, radius: f64) -> Result<Box<dyn OutlierScorer>>;
}

/// Turns one time-ordered entity table into lagged / future-window rows.
pub trait Windower: Send + Sync {
    /// Returns a wider table. With `drop_incomplete == false` the row count
    /// must match `table`.
    fn window(
        &self,
        table: &DataFrame,
        target: &str,
        static_columns: &[String],
        window: usize,
        horizon: usize,
        drop_incomplete: bool,
    ) -> Result<DataFrame>;
}

/// Trains a model on `(x, y)` and reports one importance per column of `x`.
pub trait ImportanceModel: Send + Sync {
    fn importances(&self, x: &DataFrame, y: &Series, problem: ProblemType) -> Result<Vec<f64>>;
}
