//! Per-entity time-series windowing.
//!
//! `transform` partitions the table by entity key, hands every partition
//! (ordered by date) to a [`Windower`] on the worker pool, and stacks the
//! results back together in first-seen key order with the key and date
//! columns leading.

use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info};

use super::{Stage, worker_pool};
use crate::config::TimeSeriesConfig;
use crate::error::{FeatureError, Result};
use crate::frame::{
    column_names, drop_incomplete_rows, move_to_front, partition_rows, series, sort_by_column,
    take_rows,
};
use crate::oracles::{LagWindower, Windower};
use crate::roles::RoleRegistry;

pub struct TimeSeriesStage {
    config: TimeSeriesConfig,
    windower: Box<dyn Windower>,
    key: String,
    date: String,
    target: Option<String>,
    fitted: bool,
}

impl TimeSeriesStage {
    /// Uses the built-in [`LagWindower`].
    pub fn new(config: TimeSeriesConfig) -> Result<Self> {
        Self::with_windower(config, Box::new(LagWindower))
    }

    pub fn with_windower(config: TimeSeriesConfig, windower: Box<dyn Windower>) -> Result<Self> {
        config.validate()?;
        let key = config.key_column.clone().unwrap_or_default();
        let date = config.date_column.clone().unwrap_or_default();
        Ok(Self {
            config,
            windower,
            key,
            date,
            target: None,
            fitted: false,
        })
    }

    /// Window one partition and put its key and date back.
    fn window_partition(&self, table: &DataFrame, rows: &[IdxSize], target: &str) -> Result<DataFrame> {
        let part = sort_by_column(&take_rows(table, rows.to_vec())?, &self.date)?;
        let features: Vec<String> = column_names(&part)
            .into_iter()
            .filter(|c| *c != self.key && *c != self.date)
            .collect();
        let features = part.select(features)?;

        let mut windowed = self
            .windower
            .window(
                &features,
                target,
                &self.config.static_columns,
                self.config.window,
                self.config.horizon,
                false,
            )
            .map_err(|e| FeatureError::Collaborator {
                name: "windowing",
                reason: e.to_string(),
            })?;
        if windowed.height() != part.height() {
            return Err(FeatureError::Collaborator {
                name: "windowing",
                reason: format!(
                    "returned {} rows for a partition of {}",
                    windowed.height(),
                    part.height()
                ),
            });
        }

        windowed.with_column(series(&part, &self.key)?.clone())?;
        windowed.with_column(series(&part, &self.date)?.clone())?;
        Ok(move_to_front(&windowed, &[&self.key, &self.date])?)
    }
}

impl Stage for TimeSeriesStage {
    fn name(&self) -> &'static str {
        "time_series"
    }

    fn fit(&mut self, _x: &DataFrame, y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        self.target = self
            .config
            .target
            .clone()
            .or_else(|| y.map(|y| y.name().to_string()))
            .or_else(|| roles.target().map(str::to_string));
        self.fitted = true;
        info!("Time-series fit: target {:?}", self.target);
        Ok(())
    }

    fn transform(
        &mut self,
        x: DataFrame,
        y: Option<&Series>,
        _roles: &mut RoleRegistry,
    ) -> Result<DataFrame> {
        if !self.fitted {
            return Err(FeatureError::NotFitted(self.name()));
        }
        let target = self
            .target
            .clone()
            .ok_or(FeatureError::MissingTarget(self.name()))?;

        let table = match y {
            Some(y) if x.column(y.name()).is_err() => x.hstack(&[y.clone().into_column()])?,
            _ => x,
        };
        if table.column(&target).is_err() {
            return Err(FeatureError::MissingTarget(self.name()));
        }

        let mut partitions = partition_rows(series(&table, &self.key)?)?;
        series(&table, &self.date)?;
        if partitions.is_empty() {
            partitions.push((None, Vec::new()));
        }
        debug!("Windowing {} partitions", partitions.len());

        let pool = worker_pool()?;
        let parts: Vec<DataFrame> = pool.install(|| {
            partitions
                .par_iter()
                .map(|(_, rows)| self.window_partition(&table, rows, &target))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut parts = parts.into_iter();
        let mut out = parts.next().unwrap_or_default();
        for part in parts {
            out.vstack_mut(&part)?;
        }
        if self.config.drop_incomplete {
            out = drop_incomplete_rows(&out)?;
        }

        info!("Time-series transform end: {} rows", out.height());
        Ok(out)
    }
}
