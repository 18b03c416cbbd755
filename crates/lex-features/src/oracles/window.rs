//! Lag / lead windowing of a single time-ordered entity table.

use anyhow::{Result, bail};
use polars::prelude::*;

use super::Windower;
use crate::frame::{column_names, drop_incomplete_rows};

/// Builds `col(t-w) .. col(t-1)` for every non-static column, plus
/// `target(t) .. target(t+h-1)`. Static columns are copied unchanged.
///
/// Output order: static columns, lagged columns in input order, then the
/// target's current and future values.
#[derive(Debug, Clone, Copy, Default)]
pub struct LagWindower;

impl Windower for LagWindower {
    fn window(
        &self,
        table: &DataFrame,
        target: &str,
        static_columns: &[String],
        window: usize,
        horizon: usize,
        drop_incomplete: bool,
    ) -> Result<DataFrame> {
        let target_series = match table.column(target) {
            Ok(c) => c.as_materialized_series().clone(),
            Err(_) => bail!("target column '{target}' not in windowed table"),
        };

        let mut statics: Vec<Column> = Vec::new();
        let mut lagged: Vec<Column> = Vec::new();
        for name in column_names(table) {
            let series = table.column(&name)?.as_materialized_series();
            if static_columns.contains(&name) {
                statics.push(series.clone().into_column());
                continue;
            }
            for lag in (1..=window).rev() {
                let mut shifted = series.shift(lag as i64);
                shifted.rename(format!("{name}(t-{lag})").into());
                lagged.push(shifted.into_column());
            }
        }

        let mut leads: Vec<Column> = Vec::with_capacity(horizon);
        for step in 0..horizon {
            let mut shifted = target_series.shift(-(step as i64));
            let label = if step == 0 {
                format!("{target}(t)")
            } else {
                format!("{target}(t+{step})")
            };
            shifted.rename(label.into());
            leads.push(shifted.into_column());
        }

        statics.extend(lagged);
        statics.extend(leads);
        let out = DataFrame::new(statics)?;

        if drop_incomplete {
            Ok(drop_incomplete_rows(&out)?)
        } else {
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::f64_values;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lag_and_lead_columns() {
        let table = df![
            "x" => [1.0, 2.0, 3.0, 4.0],
            "store" => ["a", "a", "a", "a"],
            "y" => [10.0, 20.0, 30.0, 40.0],
        ]
        .unwrap();

        let out = LagWindower
            .window(&table, "y", &["store".to_string()], 2, 2, false)
            .unwrap();

        assert_eq!(
            column_names(&out),
            vec![
                "store", "x(t-2)", "x(t-1)", "y(t-2)", "y(t-1)", "y(t)", "y(t+1)"
            ]
        );
        assert_eq!(out.height(), 4);
        assert_eq!(
            f64_values(out.column("x(t-1)").unwrap().as_materialized_series()).unwrap(),
            vec![None, Some(1.0), Some(2.0), Some(3.0)]
        );
        assert_eq!(
            f64_values(out.column("y(t+1)").unwrap().as_materialized_series()).unwrap(),
            vec![Some(20.0), Some(30.0), Some(40.0), None]
        );
    }

    #[test]
    fn test_drop_incomplete_rows() {
        let table = df![
            "x" => [1.0, 2.0, 3.0, 4.0],
            "y" => [10.0, 20.0, 30.0, 40.0],
        ]
        .unwrap();

        let out = LagWindower.window(&table, "y", &[], 1, 1, true).unwrap();
        assert_eq!(out.height(), 3);
    }

    #[test]
    fn test_missing_target_is_error() {
        let table = df!["x" => [1.0]].unwrap();
        assert!(LagWindower.window(&table, "y", &[], 1, 1, false).is_err());
    }
}
