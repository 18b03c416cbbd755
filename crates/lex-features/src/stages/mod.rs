//! Fit/transform stages.
//!
//! Every stage learns its parameters in [`Stage::fit`] and applies them in
//! [`Stage::transform`]. Column roles are passed in explicitly through a
//! [`RoleRegistry`]; stages read the roles they need at fit time and keep their
//! own narrowed copy, and register any indicator columns they synthesize.

mod accumulator;
mod categories;
mod encoding;
mod impute;
mod outliers;
mod scaling;
mod selection;
mod windowing;

pub use accumulator::{ACCUMULATION_FILE, Accumulator};
pub use categories::{FrequencyMergeStage, TargetMergeStage};
pub use encoding::{LabelEncodingStage, OneHotStage};
pub use impute::ImputeStage;
pub use outliers::OutlierStage;
pub use scaling::ScalingStage;
pub use selection::{ChiSquareStage, ConstantColumnStage, CorrelationStage, ImportanceStage};
pub use windowing::TimeSeriesStage;

use polars::prelude::*;
use rayon::ThreadPool;

use crate::error::{Degradation, FeatureError, Result};
use crate::roles::RoleRegistry;

/// A stateful table transformation.
pub trait Stage: Send {
    /// Short identifier used in logs and degradation records.
    fn name(&self) -> &'static str;

    /// Learn parameters from the training table.
    fn fit(&mut self, x: &DataFrame, y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()>;

    /// Apply the learned parameters.
    fn transform(
        &mut self,
        x: DataFrame,
        y: Option<&Series>,
        roles: &mut RoleRegistry,
    ) -> Result<DataFrame>;

    fn fit_transform(
        &mut self,
        x: DataFrame,
        y: Option<&Series>,
        roles: &mut RoleRegistry,
    ) -> Result<DataFrame> {
        self.fit(&x, y, roles)?;
        self.transform(x, y, roles)
    }

    /// Fallbacks taken during the last `fit` or `transform` call.
    fn degradations(&self) -> &[Degradation] {
        &[]
    }
}

// Stages are boxed into pipelines that may move between threads.
static_assertions::assert_impl_all!(ImputeStage: Send);
static_assertions::assert_impl_all!(OutlierStage: Send);
static_assertions::assert_impl_all!(FrequencyMergeStage: Send);
static_assertions::assert_impl_all!(TargetMergeStage: Send);
static_assertions::assert_impl_all!(ConstantColumnStage: Send);
static_assertions::assert_impl_all!(CorrelationStage: Send);
static_assertions::assert_impl_all!(ChiSquareStage: Send);
static_assertions::assert_impl_all!(ImportanceStage: Send);
static_assertions::assert_impl_all!(LabelEncodingStage: Send);
static_assertions::assert_impl_all!(OneHotStage: Send);
static_assertions::assert_impl_all!(ScalingStage: Send);
static_assertions::assert_impl_all!(TimeSeriesStage: Send);

/// Local worker pool sized to the host's available parallelism.
pub(crate) fn worker_pool() -> Result<ThreadPool> {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| FeatureError::Internal(format!("Failed to create thread pool: {}", e)))
}
