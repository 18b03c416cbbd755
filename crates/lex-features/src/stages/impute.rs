//! Missing-value stage.
//!
//! Adds a `<col>_was_missing` indicator for every numeric column that has
//! missing cells, then fills them with a constant, a fit-time statistic, or a
//! per-entity forward/backward fill ordered by timestamp.

use polars::prelude::*;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::accumulator::Accumulator;
use super::{Stage, worker_pool};
use crate::config::{ImputeConfig, ImputeStrategy, NEGATIVE_SENTINEL};
use crate::error::{FeatureError, Result, ResultExt};
use crate::frame::{
    f64_values, fill_numeric_nulls, fill_string_nulls, is_numeric_dtype, move_to_front,
    most_frequent, partition_rows, series, sort_by_column, take_rows,
};
use crate::roles::{ColumnRole, RoleRegistry};
use crate::stats;

/// Column carrying the original row position through the accumulation file.
const ROW_ORDER: &str = "__row_order";

pub struct ImputeStage {
    config: ImputeConfig,
    numeric: Vec<String>,
    statistics: HashMap<String, f64>,
    fitted: bool,
}

impl ImputeStage {
    pub fn new(config: ImputeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            numeric: Vec::new(),
            statistics: HashMap::new(),
            fitted: false,
        })
    }

    /// Fit-time fill value of a column, if the strategy learns one.
    pub fn statistic(&self, column: &str) -> Option<f64> {
        self.statistics.get(column).copied()
    }

    fn fill_value(&self, column: &str) -> Option<f64> {
        match self.config.strategy {
            ImputeStrategy::Zero => Some(0.0),
            ImputeStrategy::Negative => Some(NEGATIVE_SENTINEL),
            ImputeStrategy::TimeSeries => None,
            _ => self.statistic(column),
        }
    }

    fn time_series_fill(&self, df: DataFrame) -> Result<DataFrame> {
        let (Some(key), Some(date)) = (
            self.config.key_column.as_deref(),
            self.config.date_column.as_deref(),
        ) else {
            return Err(FeatureError::Internal(
                "time-series fill without key or date column".to_string(),
            ));
        };
        series(&df, key)?;
        series(&df, date)?;

        let mut table = df;
        let order: Vec<u64> = (0..table.height() as u64).collect();
        table.with_column(Series::new(ROW_ORDER.into(), order))?;
        let schema: Schema = table
            .get_columns()
            .iter()
            .map(|c| (c.name().clone(), c.dtype().clone()))
            .collect();

        let partitions = partition_rows(series(&table, key)?)?;
        let accumulator = Accumulator::create(&self.config.resource_dir)?;
        let ctx = FillContext {
            table: &table,
            key,
            date,
            fill_end: self.config.fill_end,
            accumulator: &accumulator,
        };

        if self.config.parallel {
            let pool = worker_pool()?;
            pool.install(|| {
                partitions
                    .par_iter()
                    .try_for_each(|(_, rows)| ctx.fill_partition(rows))
            })?;
        } else {
            for (_, rows) in &partitions {
                ctx.fill_partition(rows)?;
            }
        }
        debug!("Filled {} entities", partitions.len());

        let merged = accumulator
            .read_back(schema)
            .context("Reading back time-series fill")?;
        let merged = sort_by_column(&merged, ROW_ORDER)?.drop(ROW_ORDER)?;
        Ok(move_to_front(&merged, &[key, date])?)
    }
}

/// Everything a fill worker needs; shared read-only across the pool.
struct FillContext<'a> {
    table: &'a DataFrame,
    key: &'a str,
    date: &'a str,
    fill_end: f64,
    accumulator: &'a Accumulator,
}

impl FillContext<'_> {
    fn fill_partition(&self, rows: &[IdxSize]) -> Result<()> {
        let part = take_rows(self.table, rows.to_vec())?;
        let mut part = sort_by_column(&part, self.date)?;

        let names: Vec<String> = part
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .filter(|n| n != self.key && n != self.date && n != ROW_ORDER)
            .collect();

        for name in &names {
            let original = series(&part, name)?;
            if original.null_count() == 0 {
                continue;
            }
            let dtype = original.dtype().clone();
            let filled = original
                .fill_null(FillNullStrategy::Forward(None))?
                .fill_null(FillNullStrategy::Backward(None))?;
            let filled = if filled.null_count() == 0 {
                filled
            } else if is_numeric_dtype(&dtype) {
                let values: Vec<f64> = f64_values(&filled)?
                    .into_iter()
                    .map(|v| v.unwrap_or(self.fill_end))
                    .collect();
                Series::new(filled.name().clone(), values).cast(&dtype)?
            } else if dtype == DataType::String {
                fill_string_nulls(&filled, &self.fill_end.to_string())?
            } else {
                warn!(
                    "Column '{}' ({}) has entities with no values; nulls left in place",
                    name, dtype
                );
                filled
            };
            part.replace(name, filled)?;
        }

        self.accumulator.append(&mut part)
    }
}

impl Stage for ImputeStage {
    fn name(&self) -> &'static str {
        "impute"
    }

    fn fit(&mut self, x: &DataFrame, _y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        self.numeric = roles.numeric_in(x);
        self.statistics.clear();

        if self.config.strategy.learns_statistic() {
            for col in &self.numeric {
                let present = Series::new(
                    col.as_str().into(),
                    stats::present(&f64_values(series(x, col)?)?),
                );
                let stat = match self.config.strategy {
                    ImputeStrategy::Mean => present.mean(),
                    ImputeStrategy::Median => present.median(),
                    _ => most_frequent(&present)?,
                };
                match stat {
                    Some(v) => {
                        self.statistics.insert(col.clone(), v);
                    }
                    None => warn!("Column '{}' has no values to learn a fill from", col),
                }
            }
        }

        self.fitted = true;
        info!(
            "Impute fit: {} numeric columns, strategy {:?}",
            self.numeric.len(),
            self.config.strategy
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

        let mut indicators = 0;
        for col in &self.numeric {
            let Ok(column) = x.column(col) else {
                continue;
            };
            let is_float = column.dtype().is_float();
            let values = f64_values(column.as_materialized_series())?;
            let missing: Vec<bool> = values
                .iter()
                .map(|v| v.is_none_or(f64::is_nan))
                .collect();
            if !missing.iter().any(|m| *m) {
                continue;
            }

            let indicator = format!("{}_was_missing", col);
            x.with_column(Series::new(indicator.as_str().into(), missing))?;
            roles.register(indicator, ColumnRole::Categorical);
            indicators += 1;

            match self.fill_value(col) {
                Some(fill) => {
                    let filled = fill_numeric_nulls(series(&x, col)?, fill)?;
                    x.replace(col, filled)?;
                }
                // NaN becomes null so the entity fill sees it
                None if is_float => {
                    let cleared: Vec<Option<f64>> = values
                        .into_iter()
                        .map(|v| v.filter(|v| !v.is_nan()))
                        .collect();
                    x.replace(col, Series::new(col.as_str().into(), cleared))?;
                }
                None => {}
            }
            debug!("Column '{}': added missing indicator", col);
        }

        if self.config.strategy == ImputeStrategy::TimeSeries {
            x = self.time_series_fill(x)?;
        }

        info!("Impute transform: {} indicator columns", indicators);
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{column_names, string_values};
    use pretty_assertions::assert_eq;

    fn roles(numeric: &[&str]) -> RoleRegistry {
        let numeric: Vec<String> = numeric.iter().map(|s| s.to_string()).collect();
        RoleRegistry::new(&numeric, &[], None)
    }

    fn floats(df: &DataFrame, col: &str) -> Vec<Option<f64>> {
        f64_values(df.column(col).unwrap().as_materialized_series()).unwrap()
    }

    fn bools(df: &DataFrame, col: &str) -> Vec<Option<bool>> {
        df.column(col)
            .unwrap()
            .as_materialized_series()
            .bool()
            .unwrap()
            .into_iter()
            .collect()
    }

    // ==================== constant strategies ====================

    #[test]
    fn test_negative_sentinel_and_indicator() {
        let df = df!["age" => [Some(10.0), Some(20.0), None, Some(15.0)]].unwrap();
        let mut roles = roles(&["age"]);
        let mut stage = ImputeStage::new(ImputeConfig::default()).unwrap();

        let out = stage.fit_transform(df, None, &mut roles).unwrap();

        assert_eq!(
            floats(&out, "age"),
            vec![Some(10.0), Some(20.0), Some(-9999999999999.0), Some(15.0)]
        );
        assert_eq!(
            bools(&out, "age_was_missing"),
            vec![Some(false), Some(false), Some(true), Some(false)]
        );
        assert_eq!(roles.role("age_was_missing"), Some(ColumnRole::Categorical));
    }

    #[test]
    fn test_zero_strategy() {
        let df = df!["x" => [None, Some(2.0)]].unwrap();
        let mut roles = roles(&["x"]);
        let mut stage = ImputeStage::new(ImputeConfig {
            strategy: ImputeStrategy::Zero,
            ..Default::default()
        })
        .unwrap();

        let out = stage.fit_transform(df, None, &mut roles).unwrap();
        assert_eq!(floats(&out, "x"), vec![Some(0.0), Some(2.0)]);
    }

    #[test]
    fn test_no_missing_no_indicator() {
        let df = df!["x" => [1.0, 2.0]].unwrap();
        let mut roles = roles(&["x"]);
        let mut stage = ImputeStage::new(ImputeConfig::default()).unwrap();

        let out = stage.fit_transform(df, None, &mut roles).unwrap();
        assert_eq!(column_names(&out), vec!["x"]);
    }

    // ==================== learned statistics ====================

    #[test]
    fn test_mean_learned_at_fit_applied_at_transform() {
        let train = df!["x" => [Some(1.0), Some(3.0), None]].unwrap();
        let test = df!["x" => [None, Some(100.0)]].unwrap();
        let mut roles = roles(&["x"]);
        let mut stage = ImputeStage::new(ImputeConfig {
            strategy: ImputeStrategy::Mean,
            ..Default::default()
        })
        .unwrap();

        stage.fit(&train, None, &mut roles).unwrap();
        assert_eq!(stage.statistic("x"), Some(2.0));

        let out = stage.transform(test, None, &mut roles).unwrap();
        assert_eq!(floats(&out, "x"), vec![Some(2.0), Some(100.0)]);
    }

    #[test]
    fn test_median_and_most_frequent() {
        let train = df!["x" => [Some(1.0), Some(5.0), Some(5.0), Some(9.0), Some(10.0)]].unwrap();

        let mut median = ImputeStage::new(ImputeConfig {
            strategy: ImputeStrategy::Median,
            ..Default::default()
        })
        .unwrap();
        median.fit(&train, None, &mut roles(&["x"])).unwrap();
        assert_eq!(median.statistic("x"), Some(5.0));

        let mut mode = ImputeStage::new(ImputeConfig {
            strategy: ImputeStrategy::MostFrequent,
            ..Default::default()
        })
        .unwrap();
        mode.fit(&train, None, &mut roles(&["x"])).unwrap();
        assert_eq!(mode.statistic("x"), Some(5.0));
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let mut stage = ImputeStage::new(ImputeConfig::default()).unwrap();
        let err = stage
            .transform(df!["x" => [1.0]].unwrap(), None, &mut roles(&["x"]))
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FITTED");
    }

    // ==================== time series ====================

    fn time_series_config(dir: &std::path::Path, parallel: bool) -> ImputeConfig {
        ImputeConfig {
            strategy: ImputeStrategy::TimeSeries,
            key_column: Some("id".to_string()),
            date_column: Some("day".to_string()),
            parallel,
            resource_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn time_series_frame() -> DataFrame {
        df![
            "id" => ["a", "b", "a", "b", "a", "c"],
            "day" => [3i64, 1, 1, 2, 2, 1],
            "sales" => [None, Some(5.0), Some(1.0), None, None, None],
        ]
        .unwrap()
    }

    #[test]
    fn test_time_series_fill_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let mut roles = roles(&["sales"]);
        let mut stage = ImputeStage::new(time_series_config(dir.path(), false)).unwrap();

        let out = stage
            .fit_transform(time_series_frame(), None, &mut roles)
            .unwrap();

        assert_eq!(column_names(&out), vec!["id", "day", "sales", "sales_was_missing"]);
        // original row order; entity a forward-fills from day 1, c has no values
        assert_eq!(
            floats(&out, "sales"),
            vec![Some(1.0), Some(5.0), Some(1.0), Some(5.0), Some(1.0), Some(-1.0)]
        );
        assert_eq!(
            string_values(out.column("id").unwrap().as_materialized_series()).unwrap(),
            ["a", "b", "a", "b", "a", "c"]
                .iter()
                .map(|s| Some(s.to_string()))
                .collect::<Vec<_>>()
        );
        assert_eq!(
            bools(&out, "sales_was_missing"),
            vec![Some(true), Some(false), Some(false), Some(true), Some(true), Some(true)]
        );
        assert!(!dir.path().join(super::super::ACCUMULATION_FILE).exists());
    }

    #[test]
    fn test_time_series_parallel_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let mut seq = ImputeStage::new(time_series_config(dir.path(), false)).unwrap();
        let mut par = ImputeStage::new(time_series_config(dir.path(), true)).unwrap();

        let a = seq
            .fit_transform(time_series_frame(), None, &mut roles(&["sales"]))
            .unwrap();
        let b = par
            .fit_transform(time_series_frame(), None, &mut roles(&["sales"]))
            .unwrap();
        assert!(a.equals_missing(&b));
    }

    #[test]
    fn test_time_series_boolean_column_keeps_unfillable_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let mut stage = ImputeStage::new(time_series_config(dir.path(), false)).unwrap();
        let df = df![
            "id" => ["a", "a", "c"],
            "day" => [2i64, 1, 1],
            "open" => [None, Some(true), None],
        ]
        .unwrap();

        let out = stage
            .fit_transform(df, None, &mut roles(&[]))
            .unwrap();

        assert_eq!(out.column("open").unwrap().dtype(), &DataType::Boolean);
        assert_eq!(bools(&out, "open"), vec![Some(true), Some(true), None]);
    }

    #[test]
    fn test_time_series_missing_key_column() {
        let dir = tempfile::tempdir().unwrap();
        let mut stage = ImputeStage::new(time_series_config(dir.path(), false)).unwrap();
        let df = df!["day" => [1i64], "sales" => [Some(1.0)]].unwrap();
        let err = stage
            .fit_transform(df, None, &mut roles(&["sales"]))
            .unwrap_err();
        assert_eq!(err.error_code(), "COLUMN_NOT_FOUND");
    }
}
