//! Min-max scaling of numeric columns.

use polars::prelude::*;
use tracing::{debug, info};

use super::Stage;
use crate::error::{FeatureError, Result};
use crate::frame::{f64_values, layout, reconcile_columns, series};
use crate::roles::RoleRegistry;
use crate::stats;

/// Fit-time range of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    /// Maps `[min, max]` onto `[0, 1]`; a zero-width range only shifts.
    pub fn scale(&self, value: f64) -> f64 {
        let width = self.max - self.min;
        if width == 0.0 {
            value - self.min
        } else {
            (value - self.min) / width
        }
    }
}

#[derive(Debug, Default)]
pub struct ScalingStage {
    ranges: Vec<(String, Range)>,
    layout: Vec<(String, DataType)>,
    fitted: bool,
}

impl ScalingStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(&self, column: &str) -> Option<Range> {
        self.ranges
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, r)| *r)
    }
}

impl Stage for ScalingStage {
    fn name(&self) -> &'static str {
        "scaling"
    }

    fn fit(&mut self, x: &DataFrame, _y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        self.ranges.clear();
        for col in roles.numeric_in(x) {
            let values = stats::present(&f64_values(series(x, &col)?)?);
            if values.is_empty() {
                debug!("Column '{}' has no values to scale", col);
                continue;
            }
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            self.ranges.push((col, Range { min, max }));
        }
        self.layout = layout(x);
        self.fitted = true;
        info!("Scaling fit: {} columns", self.ranges.len());
        Ok(())
    }

    fn transform(
        &mut self,
        x: DataFrame,
        _y: Option<&Series>,
        _roles: &mut RoleRegistry,
    ) -> Result<DataFrame> {
        if !self.fitted {
            return Err(FeatureError::NotFitted(self.name()));
        }
        let mut x = reconcile_columns(&x, &self.layout)?;

        for (col, range) in &self.ranges {
            let scaled: Vec<Option<f64>> = f64_values(series(&x, col)?)?
                .into_iter()
                .map(|v| v.map(|v| range.scale(v)))
                .collect();
            x.replace(col, Series::new(col.as_str().into(), scaled))?;
        }

        info!("Scaling transform end");
        Ok(x)
    }
}
