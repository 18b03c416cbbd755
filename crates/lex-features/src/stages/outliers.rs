//! Outlier stage.
//!
//! Two methods share the stage:
//!
//! - **IQR**: fit stores `median ± magnitude·IQR` per column; transform clamps
//!   values beyond those borders to the extreme in-border values of the
//!   current table.
//! - **Density**: fit builds one scoring oracle per column; transform scores
//!   every value, flags scores above the configured quantile, emits a
//!   `<col>_has_outliers` indicator, and zeroes or percentile-clamps the column.
//!
//! Both first replace `±inf` by the largest/smallest finite value pushed out by
//! one standard deviation.

use polars::prelude::*;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{Stage, worker_pool};
use crate::config::{OutlierConfig, OutlierMethod, OutlierTreatment};
use crate::error::{Degradation, FeatureError, Outcome, Result};
use crate::frame::{f64_values, series};
use crate::oracles::{DensityScorerFactory, OutlierScorer, ScorerFactory};
use crate::roles::{ColumnRole, RoleRegistry};
use crate::stats;

/// Fit-time IQR borders of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Borders {
    pub min: f64,
    pub max: f64,
}

/// Result of scoring one column.
struct DensityFix {
    column: String,
    flagged: Vec<bool>,
    values: Option<Vec<Option<f64>>>,
}

pub struct OutlierStage {
    config: OutlierConfig,
    factory: Arc<dyn ScorerFactory>,
    numeric: Vec<String>,
    borders: Vec<(String, Borders)>,
    scorers: Vec<(String, Box<dyn OutlierScorer>)>,
    fitted: bool,
    degradations: Vec<Degradation>,
    fit_degradations: usize,
}

impl OutlierStage {
    pub fn new(config: OutlierConfig) -> Result<Self> {
        Self::with_scorer_factory(config, Arc::new(DensityScorerFactory))
    }

    pub fn with_scorer_factory(
        config: OutlierConfig,
        factory: Arc<dyn ScorerFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            numeric: Vec::new(),
            borders: Vec::new(),
            scorers: Vec::new(),
            fitted: false,
            degradations: Vec::new(),
            fit_degradations: 0,
        })
    }

    pub fn borders(&self, column: &str) -> Option<Borders> {
        self.borders
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, b)| *b)
    }

    /// Columns that received a scoring oracle at fit.
    pub fn scored_columns(&self) -> Vec<&str> {
        self.scorers.iter().map(|(c, _)| c.as_str()).collect()
    }

    fn fit_iqr(&mut self, x: &DataFrame) -> Result<()> {
        for col in &self.numeric {
            let values = stats::present(&f64_values(series(x, col)?)?);
            let outcome = match (
                stats::quantile(&values, 0.25),
                stats::median(&values),
                stats::quantile(&values, 0.75),
            ) {
                (Some(q1), Some(mid), Some(q3)) if (q3 - q1).is_finite() && mid.is_finite() => {
                    let iqr = q3 - q1;
                    Outcome::Applied(Some(Borders {
                        min: mid - self.config.magnitude * iqr,
                        max: mid + self.config.magnitude * iqr,
                    }))
                }
                _ => Outcome::degraded(None, "IQR could not be computed"),
            };
            if let Some(b) = outcome.record("outliers", Some(col), &mut self.degradations) {
                debug!("Column '{}': IQR borders [{}, {}]", col, b.min, b.max);
                self.borders.push((col.clone(), b));
            }
        }
        Ok(())
    }

    fn fit_density(&mut self, x: &DataFrame) -> Result<()> {
        for col in &self.numeric {
            let column = series(x, col)?;
            let values = stats::present(&f64_values(column)?);
            let min_cluster_size = self
                .config
                .min_cluster_size
                .unwrap_or((column.len() as f64 * 0.01) as usize);
            let radius = self.config.radius.unwrap_or_else(|| {
                match (stats::median(&values), stats::std_dev(&values)) {
                    (Some(m), Some(s)) => f64::max(1.0, m + s),
                    _ => 1.0,
                }
            });

            let outcome = match self.factory.build(min_cluster_size, radius) {
                Ok(scorer) => Outcome::Applied(Some(scorer)),
                Err(e) => Outcome::degraded(None, format!("no scoring oracle: {e}")),
            };
            if let Some(scorer) = outcome.record("outliers", Some(col), &mut self.degradations) {
                self.scorers.push((col.clone(), scorer));
            }
        }
        Ok(())
    }

    /// Replace `+inf` by `max + std` and `-inf` by `min - std` of the finite values.
    fn replace_infinite(x: &mut DataFrame, col: &str) -> Result<()> {
        let values = f64_values(series(x, col)?)?;
        if !values.iter().flatten().any(|v| v.is_infinite()) {
            return Ok(());
        }
        let finite: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            warn!("Column '{}' has no finite values to replace infinities", col);
            return Ok(());
        }
        let std = stats::std_dev(&finite).unwrap_or(0.0);
        let hi = finite.iter().copied().fold(f64::MIN, f64::max) + std;
        let lo = finite.iter().copied().fold(f64::MAX, f64::min) - std;
        let replaced: Vec<Option<f64>> = values
            .into_iter()
            .map(|v| {
                v.map(|v| {
                    if v == f64::INFINITY {
                        hi
                    } else if v == f64::NEG_INFINITY {
                        lo
                    } else {
                        v
                    }
                })
            })
            .collect();
        x.replace(col, Series::new(col.into(), replaced))?;
        Ok(())
    }

    fn transform_iqr(&self, x: &mut DataFrame) -> Result<()> {
        for (col, b) in &self.borders {
            if x.column(col).is_err() {
                continue;
            }
            let column = series(x, col)?;
            let dtype = column.dtype().clone();
            let values = f64_values(column)?;
            let inside: Vec<f64> = values
                .iter()
                .flatten()
                .copied()
                .filter(|v| *v > b.min && *v < b.max)
                .collect();
            if inside.is_empty() {
                continue;
            }
            let lo = inside.iter().copied().fold(f64::MAX, f64::min);
            let hi = inside.iter().copied().fold(f64::MIN, f64::max);

            let mut clamped = 0;
            let fixed: Vec<Option<f64>> = values
                .into_iter()
                .map(|v| {
                    v.map(|v| {
                        if v > b.max {
                            clamped += 1;
                            hi
                        } else if v < b.min {
                            clamped += 1;
                            lo
                        } else {
                            v
                        }
                    })
                })
                .collect();
            if clamped > 0 {
                // clamp targets are observed values, so the source dtype holds them
                let fixed = Series::new(col.as_str().into(), fixed).cast(&dtype)?;
                x.replace(col, fixed)?;
                debug!("Column '{}': clamped {} values to [{}, {}]", col, clamped, lo, hi);
            }
        }
        Ok(())
    }

    /// Score one column and work out its indicator and replacement values.
    fn score_column(
        &self,
        x: &DataFrame,
        col: &str,
        scorer: &dyn OutlierScorer,
    ) -> Result<Outcome<Option<DensityFix>>> {
        let values = f64_values(series(x, col)?)?;
        let (rows, present): (Vec<usize>, Vec<f64>) = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.filter(|v| !v.is_nan()).map(|v| (i, v)))
            .unzip();

        let scores = match scorer.score(&present) {
            Ok(scores) if scores.len() == present.len() => scores,
            Ok(scores) => {
                return Ok(Outcome::degraded(
                    None,
                    format!("oracle returned {} scores for {} values", scores.len(), present.len()),
                ));
            }
            Err(e) => return Ok(Outcome::degraded(None, format!("scoring failed: {e}"))),
        };
        let Some(threshold) = stats::quantile(&scores, self.config.score_quantile) else {
            return Ok(Outcome::Applied(None));
        };

        let mut flagged = vec![false; values.len()];
        for (row, score) in rows.iter().zip(&scores) {
            flagged[*row] = *score > threshold;
        }
        if !flagged.iter().any(|f| *f) {
            return Ok(Outcome::Applied(None));
        }

        let fixed = match self.config.treatment {
            OutlierTreatment::Zero => Some(
                values
                    .iter()
                    .zip(&flagged)
                    .map(|(v, f)| if *f { Some(0.0) } else { *v })
                    .collect(),
            ),
            OutlierTreatment::Clamp => match self.percentile_clamp(&values, &present) {
                Some(fixed) => Some(fixed),
                None => {
                    error!("Column '{}': percentile clamp failed, column left as-is", col);
                    None
                }
            },
        };

        Ok(Outcome::Applied(Some(DensityFix {
            column: col.to_string(),
            flagged,
            values: fixed,
        })))
    }

    /// Clamp to the `lower_q`/`upper_q` percentiles, pulling each border
    /// inwards by `increment` while it is infinite.
    fn percentile_clamp(&self, values: &[Option<f64>], present: &[f64]) -> Option<Vec<Option<f64>>> {
        let mut sorted = present.to_vec();
        sorted.sort_by(f64::total_cmp);
        if sorted.is_empty() {
            return None;
        }

        let mut lower_q = self.config.lower_q;
        let mut low = stats::quantile_sorted(&sorted, lower_q);
        while low == f64::NEG_INFINITY && lower_q < 1.0 {
            lower_q += self.config.increment;
            low = stats::quantile_sorted(&sorted, lower_q);
        }
        let mut upper_q = self.config.upper_q;
        let mut high = stats::quantile_sorted(&sorted, upper_q);
        while high == f64::INFINITY && upper_q > 0.0 {
            upper_q -= self.config.increment;
            high = stats::quantile_sorted(&sorted, upper_q);
        }
        if !(low.is_finite() && high.is_finite()) || low > high {
            return None;
        }

        Some(values.iter().map(|v| v.map(|v| v.clamp(low, high))).collect())
    }

    fn transform_density(&mut self, x: &mut DataFrame, roles: &mut RoleRegistry) -> Result<()> {
        let snapshot: &DataFrame = x;
        let tasks: Vec<&(String, Box<dyn OutlierScorer>)> = self
            .scorers
            .iter()
            .filter(|(col, _)| snapshot.column(col).is_ok())
            .collect();

        let pool = worker_pool()?;
        let results: Vec<(String, Outcome<Option<DensityFix>>)> = pool.install(|| {
            tasks
                .par_iter()
                .map(|(col, scorer)| {
                    self.score_column(snapshot, col, &**scorer)
                        .map(|outcome| (col.clone(), outcome))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        for (col, outcome) in results {
            let Some(fix) = outcome.record("outliers", Some(&col), &mut self.degradations) else {
                continue;
            };
            let indicator = format!("{}_has_outliers", fix.column);
            let flagged_count = fix.flagged.iter().filter(|f| **f).count();
            x.with_column(Series::new(indicator.as_str().into(), fix.flagged))?;
            roles.register(indicator, ColumnRole::Categorical);
            if let Some(values) = fix.values {
                x.replace(&fix.column, Series::new(fix.column.as_str().into(), values))?;
            }
            debug!("Column '{}': {} outliers flagged", col, flagged_count);
        }
        Ok(())
    }
}

impl Stage for OutlierStage {
    fn name(&self) -> &'static str {
        "outliers"
    }

    fn fit(&mut self, x: &DataFrame, _y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        self.numeric = roles.numeric_in(x);
        self.borders.clear();
        self.scorers.clear();
        self.degradations.clear();

        match self.config.method {
            OutlierMethod::Iqr => self.fit_iqr(x)?,
            OutlierMethod::Density => self.fit_density(x)?,
        }

        self.fit_degradations = self.degradations.len();
        self.fitted = true;
        info!(
            "Outlier fit ({:?}): {} columns, {} skipped",
            self.config.method,
            self.numeric.len(),
            self.fit_degradations
        );
        Ok(())
    }

    fn transform(
        &mut self,
        mut x: DataFrame,
        _y: Option<&Series>,
        roles: &mut RoleRegistry,
    ) -> Result<DataFrame> {
        if !self.fitted {
            return Err(FeatureError::NotFitted(self.name()));
        }
        self.degradations.truncate(self.fit_degradations);

        for col in &self.numeric {
            if x.column(col).is_ok() {
                Self::replace_infinite(&mut x, col)?;
            }
        }

        match self.config.method {
            OutlierMethod::Iqr => self.transform_iqr(&mut x)?,
            OutlierMethod::Density => self.transform_density(&mut x, roles)?,
        }

        info!("Outlier transform end");
        Ok(x)
    }

    fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use pretty_assertions::assert_eq;

    fn roles(numeric: &[&str]) -> RoleRegistry {
        let numeric: Vec<String> = numeric.iter().map(|s| s.to_string()).collect();
        RoleRegistry::new(&numeric, &[], None)
    }

    fn floats(df: &DataFrame, col: &str) -> Vec<Option<f64>> {
        f64_values(df.column(col).unwrap().as_materialized_series()).unwrap()
    }

    // ==================== IQR ====================

    #[test]
    fn test_iqr_borders() {
        let df = df!["x" => [1.0, 2.0, 3.0, 4.0, 5.0]].unwrap();
        let mut stage = OutlierStage::new(OutlierConfig::default()).unwrap();
        stage.fit(&df, None, &mut roles(&["x"])).unwrap();

        // q1 = 2, q3 = 4, median = 3
        assert_eq!(stage.borders("x"), Some(Borders { min: -4.0, max: 10.0 }));
    }

    #[test]
    fn test_iqr_clamps_to_in_range_extremes() {
        let train = df!["x" => [1.0, 2.0, 3.0, 4.0, 5.0]].unwrap();
        let test = df!["x" => [Some(-50.0), Some(2.0), None, Some(7.0), Some(99.0)]].unwrap();
        let mut roles = roles(&["x"]);
        let mut stage = OutlierStage::new(OutlierConfig::default()).unwrap();
        stage.fit(&train, None, &mut roles).unwrap();

        let out = stage.transform(test, None, &mut roles).unwrap();
        assert_eq!(
            floats(&out, "x"),
            vec![Some(2.0), Some(2.0), None, Some(7.0), Some(7.0)]
        );
    }

    #[test]
    fn test_iqr_keeps_integer_dtype() {
        let train = df!["n" => [1i64, 2, 3, 4, 5]].unwrap();
        let mut roles = roles(&["n"]);
        let mut stage = OutlierStage::new(OutlierConfig::default()).unwrap();
        stage.fit(&train, None, &mut roles).unwrap();

        let clamped = stage
            .transform(df!["n" => [-50i64, 2, 7, 99]].unwrap(), None, &mut roles)
            .unwrap();
        assert_eq!(clamped.column("n").unwrap().dtype(), &DataType::Int64);
        assert_eq!(
            floats(&clamped, "n"),
            vec![Some(2.0), Some(2.0), Some(7.0), Some(7.0)]
        );

        let untouched = stage
            .transform(df!["n" => [1i64, 2]].unwrap(), None, &mut roles)
            .unwrap();
        assert_eq!(untouched.column("n").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn test_iqr_output_within_borders() {
        let values: Vec<f64> = (0..100).map(|i| (i % 10) as f64).chain([1e6, -1e6]).collect();
        let df = df!["x" => values].unwrap();
        let mut stage = OutlierStage::new(OutlierConfig::default()).unwrap();
        let out = stage.fit_transform(df, None, &mut roles(&["x"])).unwrap();

        let b = stage.borders("x").unwrap();
        for v in floats(&out, "x").into_iter().flatten() {
            assert!(v >= b.min && v <= b.max);
        }
    }

    #[test]
    fn test_infinities_replaced() {
        let train = df!["x" => [1.0, 2.0, 3.0]].unwrap();
        let test = df!["x" => [1.0, f64::INFINITY, 3.0, f64::NEG_INFINITY]].unwrap();
        let mut roles = roles(&["x"]);
        let mut stage = OutlierStage::new(OutlierConfig {
            magnitude: 100.0,
            ..Default::default()
        })
        .unwrap();
        stage.fit(&train, None, &mut roles).unwrap();
        let out = stage.transform(test, None, &mut roles).unwrap();

        // finite values 1 and 3, std = sqrt(2)
        let values = floats(&out, "x");
        let std = 2f64.sqrt();
        assert!((values[1].unwrap() - (3.0 + std)).abs() < 1e-12);
        assert!((values[3].unwrap() - (1.0 - std)).abs() < 1e-12);
    }

    #[test]
    fn test_iqr_skips_column_without_values() {
        let df = df!["x" => [None::<f64>, None]].unwrap();
        let mut stage = OutlierStage::new(OutlierConfig::default()).unwrap();
        stage.fit(&df, None, &mut roles(&["x"])).unwrap();
        assert_eq!(stage.borders("x"), None);
        assert_eq!(stage.degradations().len(), 1);
    }

    // ==================== density ====================

    fn density_frame() -> DataFrame {
        let mut values: Vec<f64> = (0..300).map(|i| (i % 20) as f64 * 0.1).collect();
        values.extend([500.0, 900.0]);
        df!["x" => values].unwrap()
    }

    #[test]
    fn test_density_flags_and_clamps() {
        let mut roles = roles(&["x"]);
        let mut stage = OutlierStage::new(OutlierConfig {
            method: OutlierMethod::Density,
            ..Default::default()
        })
        .unwrap();

        let out = stage.fit_transform(density_frame(), None, &mut roles).unwrap();
        assert_eq!(stage.scored_columns(), vec!["x"]);

        let flags: Vec<Option<bool>> = out
            .column("x_has_outliers")
            .unwrap()
            .as_materialized_series()
            .bool()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(flags[300], Some(true));
        assert_eq!(flags[301], Some(true));
        assert_eq!(flags[0], Some(false));
        assert_eq!(roles.role("x_has_outliers"), Some(ColumnRole::Categorical));

        let values = floats(&out, "x");
        assert!(values[301].unwrap() < 900.0);
    }

    #[test]
    fn test_density_zero_treatment() {
        let mut stage = OutlierStage::new(OutlierConfig {
            method: OutlierMethod::Density,
            treatment: OutlierTreatment::Zero,
            ..Default::default()
        })
        .unwrap();
        let out = stage
            .fit_transform(density_frame(), None, &mut roles(&["x"]))
            .unwrap();
        let values = floats(&out, "x");
        assert_eq!(values[300], Some(0.0));
        assert_eq!(values[301], Some(0.0));
        assert_eq!(values[5], Some(0.5));
    }

    #[test]
    fn test_density_small_table_passes_through() {
        let df = df!["x" => [1.0, 2.0, 3.0, 100.0]].unwrap();
        let mut stage = OutlierStage::new(OutlierConfig {
            method: OutlierMethod::Density,
            ..Default::default()
        })
        .unwrap();
        let out = stage.fit_transform(df.clone(), None, &mut roles(&["x"])).unwrap();

        assert!(out.equals_missing(&df));
        assert_eq!(stage.degradations().len(), 1);
        assert!(stage.degradations()[0].reason.contains("no scoring oracle"));
    }

    struct FailingScorer;

    impl OutlierScorer for FailingScorer {
        fn score(&self, _values: &[f64]) -> anyhow::Result<Vec<f64>> {
            bail!("boom")
        }
    }

    struct FailingFactory;

    impl ScorerFactory for FailingFactory {
        fn build(&self, _m: usize, _r: f64) -> anyhow::Result<Box<dyn OutlierScorer>> {
            Ok(Box::new(FailingScorer))
        }
    }

    #[test]
    fn test_scoring_failure_degrades() {
        let df = df!["x" => [1.0, 2.0, 3.0]].unwrap();
        let mut stage = OutlierStage::with_scorer_factory(
            OutlierConfig {
                method: OutlierMethod::Density,
                ..Default::default()
            },
            Arc::new(FailingFactory),
        )
        .unwrap();
        let out = stage.fit_transform(df.clone(), None, &mut roles(&["x"])).unwrap();

        assert!(out.equals_missing(&df));
        assert_eq!(stage.degradations().len(), 1);
        assert!(stage.degradations()[0].reason.contains("boom"));
    }
}
