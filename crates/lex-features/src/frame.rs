//! Shared DataFrame helpers used across the stages.

use polars::prelude::*;

use crate::error::{FeatureError, Result};

/// String used for a missing cell when values are treated as categories.
pub const NULL_CATEGORY: &str = "nan";

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Numeric or boolean; both take part in rank correlation.
#[inline]
pub fn is_numeric_like(dtype: &DataType) -> bool {
    is_numeric_dtype(dtype) || matches!(dtype, DataType::Boolean)
}

// =============================================================================
// Column access
// =============================================================================

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Borrow a column as a Series, reporting a missing column by name.
pub fn series<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series> {
    df.column(name)
        .map(|c| c.as_materialized_series())
        .map_err(|_| FeatureError::ColumnNotFound(name.to_string()))
}

/// Values of a numeric-like series as `f64`.
pub fn f64_values(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    let cast = series.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().collect())
}

/// Values of any series rendered as strings.
pub fn string_values(series: &Series) -> PolarsResult<Vec<Option<String>>> {
    let cast = series.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Category label of a cell; missing cells become [`NULL_CATEGORY`].
pub fn category_key(value: Option<&str>) -> String {
    value.unwrap_or(NULL_CATEGORY).to_string()
}

/// Lookup key for a category label: the label with all whitespace removed.
pub fn normalize_category(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Common boolean true representations.
pub const BOOLEAN_TRUE_VALUES: [&str; 8] =
    ["true", "yes", "1", "t", "y", "on", "enabled", "active"];

/// Check if a string represents a boolean true value.
pub fn is_boolean_true(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    BOOLEAN_TRUE_VALUES.iter().any(|&v| v == lower) || lower.parse::<f64>() == Ok(1.0)
}

// =============================================================================
// Series Transformation Utilities
// =============================================================================

/// Fill null and NaN values in a numeric Series with a specific value.
pub fn fill_numeric_nulls(series: &Series, fill_value: f64) -> PolarsResult<Series> {
    let filled: Vec<f64> = f64_values(series)?
        .into_iter()
        .map(|v| v.filter(|v| !v.is_nan()).unwrap_or(fill_value))
        .collect();
    Ok(Series::new(series.name().clone(), filled))
}

/// Fill null values in a string Series with a specific value.
pub fn fill_string_nulls(series: &Series, fill_value: &str) -> PolarsResult<Series> {
    let filled: Vec<String> = string_values(series)?
        .into_iter()
        .map(|v| v.unwrap_or_else(|| fill_value.to_string()))
        .collect();
    Ok(Series::new(series.name().clone(), filled))
}

/// Most frequent non-null value of a numeric Series; the smallest one wins ties.
pub fn most_frequent(series: &Series) -> PolarsResult<Option<f64>> {
    let non_null = series.drop_nulls().with_name("value".into());
    if non_null.is_empty() {
        return Ok(None);
    }

    let counts = non_null.value_counts(false, false, "count".into(), false)?;
    let values = f64_values(counts.column("value")?.as_materialized_series())?;
    let tallies = counts
        .column("count")?
        .as_materialized_series()
        .cast(&DataType::UInt64)?;

    Ok(values
        .into_iter()
        .zip(tallies.u64()?.into_iter())
        .filter_map(|(value, count)| Some((value?, count?)))
        .max_by(|(va, ca), (vb, cb)| ca.cmp(cb).then(vb.total_cmp(va)))
        .map(|(value, _)| value))
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// =============================================================================
// Row Utilities
// =============================================================================

/// Rows of `df` ordered by `column` ascending; ties keep their input order.
pub fn sort_by_column(df: &DataFrame, column: &str) -> Result<DataFrame> {
    let order = series(df, column)?.arg_sort(SortOptions::default().with_maintain_order(true));
    Ok(df.take(&order)?)
}

pub fn take_rows(df: &DataFrame, rows: Vec<IdxSize>) -> PolarsResult<DataFrame> {
    df.take(&IdxCa::from_vec("rows".into(), rows))
}

/// Row indices grouped by the value of `key`, groups in first-seen order.
///
/// Missing keys form their own group, keyed `None`.
pub fn partition_rows(key: &Series) -> PolarsResult<Vec<(Option<String>, Vec<IdxSize>)>> {
    let mut groups: Vec<(Option<String>, Vec<IdxSize>)> = Vec::new();
    let mut positions: std::collections::HashMap<Option<String>, usize> =
        std::collections::HashMap::new();

    for (row, value) in string_values(key)?.into_iter().enumerate() {
        let slot = *positions.entry(value.clone()).or_insert_with(|| {
            groups.push((value, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row as IdxSize);
    }

    Ok(groups)
}

/// Rows without any missing cell.
pub fn drop_incomplete_rows(df: &DataFrame) -> PolarsResult<DataFrame> {
    let mut keep = vec![true; df.height()];
    for column in df.get_columns() {
        let nulls = column.as_materialized_series().is_null();
        for (row, is_null) in nulls.into_iter().enumerate() {
            if is_null.unwrap_or(false) {
                keep[row] = false;
            }
        }
    }
    df.filter(&BooleanChunked::from_slice("keep".into(), &keep))
}

/// Reorder columns so `leading` come first, others keep their order.
pub fn move_to_front(df: &DataFrame, leading: &[&str]) -> PolarsResult<DataFrame> {
    let mut order: Vec<String> = leading.iter().map(|s| s.to_string()).collect();
    order.extend(
        column_names(df)
            .into_iter()
            .filter(|name| !leading.contains(&name.as_str())),
    );
    df.select(order.iter().map(|s| s.as_str()))
}

// =============================================================================
// Schema reconciliation
// =============================================================================

/// Column names and dtypes of `df`, in order.
pub fn layout(df: &DataFrame) -> Vec<(String, DataType)> {
    df.get_columns()
        .iter()
        .map(|c| (c.name().to_string(), c.dtype().clone()))
        .collect()
}

/// Reshape `df` to exactly `layout`: missing columns become constant 0 of the
/// recorded dtype, extra columns are dropped, order follows `layout`.
pub fn reconcile_columns(df: &DataFrame, layout: &[(String, DataType)]) -> PolarsResult<DataFrame> {
    let columns = layout
        .iter()
        .map(|(name, dtype)| match df.column(name) {
            Ok(column) => Ok(column.clone()),
            Err(_) => Series::new(name.as_str().into(), vec![0i32; df.height()])
                .cast(dtype)
                .map(Series::into_column),
        })
        .collect::<PolarsResult<Vec<Column>>>()?;
    DataFrame::new(columns)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_is_numeric_dtype() {
        assert!(is_numeric_dtype(&DataType::Int64));
        assert!(is_numeric_dtype(&DataType::Float64));
        assert!(!is_numeric_dtype(&DataType::String));
        assert!(!is_numeric_dtype(&DataType::Boolean));
        assert!(is_numeric_like(&DataType::Boolean));
    }

    #[test]
    fn test_normalize_category() {
        assert_eq!(normalize_category(" New  York "), "NewYork");
        assert_eq!(normalize_category("a\tb"), "ab");
    }

    #[test]
    fn test_is_boolean_true() {
        assert!(is_boolean_true("true"));
        assert!(is_boolean_true("1"));
        assert!(is_boolean_true("1.0"));
        assert!(!is_boolean_true("0"));
        assert!(!is_boolean_true("false"));
    }

    #[test]
    fn test_fill_numeric_nulls() {
        let series = Series::new("test".into(), &[Some(1.0), None, Some(f64::NAN), Some(3.0)]);
        let filled = fill_numeric_nulls(&series, 0.0).unwrap();
        assert_eq!(
            f64_values(&filled).unwrap(),
            vec![Some(1.0), Some(0.0), Some(0.0), Some(3.0)]
        );
    }

    #[test]
    fn test_most_frequent_prefers_smallest_on_tie() {
        let tie = Series::new("count".into(), &[3.0, 1.0, 3.0, 1.0, 2.0]);
        assert_eq!(most_frequent(&tie).unwrap(), Some(1.0));

        let clear = Series::new("x".into(), &[Some(5.0), None, Some(5.0), Some(1.0)]);
        assert_eq!(most_frequent(&clear).unwrap(), Some(5.0));

        let empty = Series::new("x".into(), &[None::<f64>, None]);
        assert_eq!(most_frequent(&empty).unwrap(), None);
    }

    #[test]
    fn test_string_values_render_numbers() {
        let series = Series::new("n".into(), &[Some(10i64), None]);
        assert_eq!(
            string_values(&series).unwrap(),
            vec![Some("10".to_string()), None]
        );
    }

    #[test]
    fn test_partition_rows_first_seen_order() {
        let key = Series::new("id".into(), &[Some("b"), Some("a"), Some("b"), None]);
        let groups = partition_rows(&key).unwrap();
        assert_eq!(
            groups,
            vec![
                (Some("b".to_string()), vec![0, 2]),
                (Some("a".to_string()), vec![1]),
                (None, vec![3]),
            ]
        );
    }

    #[test]
    fn test_partition_rows_null_key_apart_from_nan_label() {
        let key = Series::new("id".into(), &[Some("nan"), None, Some("nan"), None]);
        let groups = partition_rows(&key).unwrap();
        assert_eq!(
            groups,
            vec![(Some("nan".to_string()), vec![0, 2]), (None, vec![1, 3])]
        );
    }

    #[test]
    fn test_sort_by_column_is_stable() {
        let df = df![
            "t" => [2, 1, 2, 1],
            "v" => ["a", "b", "c", "d"],
        ]
        .unwrap();
        let sorted = sort_by_column(&df, "t").unwrap();
        let v = string_values(sorted.column("v").unwrap().as_materialized_series()).unwrap();
        assert_eq!(
            v,
            vec![
                Some("b".to_string()),
                Some("d".to_string()),
                Some("a".to_string()),
                Some("c".to_string())
            ]
        );
    }

    #[test]
    fn test_move_to_front() {
        let df = df![
            "a" => [1],
            "b" => [2],
            "c" => [3],
        ]
        .unwrap();
        let moved = move_to_front(&df, &["c", "b"]).unwrap();
        assert_eq!(column_names(&moved), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_reconcile_columns() {
        let fitted = df![
            "a" => [1.0],
            "b_x" => [1u8],
            "c" => [2i64],
        ]
        .unwrap();
        let current = df![
            "c" => [5i64, 6],
            "extra" => ["q", "r"],
            "a" => [3.0, 4.0],
        ]
        .unwrap();

        let out = reconcile_columns(&current, &layout(&fitted)).unwrap();
        assert_eq!(column_names(&out), vec!["a", "b_x", "c"]);
        assert_eq!(out.column("b_x").unwrap().dtype(), &DataType::UInt8);
        assert_eq!(
            f64_values(out.column("b_x").unwrap().as_materialized_series()).unwrap(),
            vec![Some(0.0), Some(0.0)]
        );
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456, 5), 0.12346);
        assert_eq!(round_to(0.796, 2), 0.8);
    }
}
