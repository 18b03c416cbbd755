//! Categorical encoders.

use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use super::Stage;
use crate::config::OneHotConfig;
use crate::error::{FeatureError, Result};
use crate::frame::{category_key, layout, reconcile_columns, series, string_values};
use crate::roles::RoleRegistry;

/// Code used for values not seen at fit time.
pub const UNSEEN_CODE: i64 = 0;

// =============================================================================
// Label encoding
// =============================================================================

/// Maps each category to its position in the sorted fit-time vocabulary.
///
/// Missing cells are encoded as the `"nan"` category. Values not seen at fit
/// map to [`UNSEEN_CODE`].
#[derive(Debug, Default)]
pub struct LabelEncodingStage {
    vocabularies: Vec<(String, HashMap<String, i64>)>,
    fitted: bool,
}

impl LabelEncodingStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vocabulary(&self, column: &str) -> Option<&HashMap<String, i64>> {
        self.vocabularies
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }
}

impl Stage for LabelEncodingStage {
    fn name(&self) -> &'static str {
        "label_encoding"
    }

    fn fit(&mut self, x: &DataFrame, _y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        self.vocabularies.clear();
        for col in roles.categorical_in(x) {
            let sorted: BTreeSet<String> = string_values(series(x, &col)?)?
                .iter()
                .map(|v| category_key(v.as_deref()))
                .collect();
            let codes = sorted
                .into_iter()
                .enumerate()
                .map(|(code, value)| (value, code as i64))
                .collect();
            self.vocabularies.push((col, codes));
        }
        self.fitted = true;
        info!("Label encoding fit: {} columns", self.vocabularies.len());
        Ok(())
    }

    fn transform(
        &mut self,
        mut x: DataFrame,
        _y: Option<&Series>,
        _roles: &mut RoleRegistry,
    ) -> Result<DataFrame> {
        if !self.fitted {
            return Err(FeatureError::NotFitted(self.name()));
        }

        for (col, codes) in &self.vocabularies {
            if x.column(col).is_err() {
                continue;
            }
            let mut unseen = 0usize;
            let encoded: Vec<i64> = string_values(series(&x, col)?)?
                .iter()
                .map(|v| {
                    codes
                        .get(&category_key(v.as_deref()))
                        .copied()
                        .unwrap_or_else(|| {
                            unseen += 1;
                            UNSEEN_CODE
                        })
                })
                .collect();
            if unseen > 0 {
                debug!("Column '{}': {} unseen values encoded as {}", col, unseen, UNSEEN_CODE);
            }
            x.replace(col, Series::new(col.as_str().into(), encoded))?;
        }

        info!("Label encoding transform end");
        Ok(x)
    }
}

// =============================================================================
// One-hot encoding
// =============================================================================

/// Expands categorical columns into `<col>_<value>` indicator columns.
///
/// Categories are sorted; the first one is dropped as the reference level
/// when `drop_first` is set. Missing cells get no indicator. Transform output
/// always has the fit-time column layout.
pub struct OneHotStage {
    config: OneHotConfig,
    categorical: Vec<String>,
    layout: Vec<(String, DataType)>,
    fitted: bool,
}

impl OneHotStage {
    pub fn new(config: OneHotConfig) -> Self {
        Self {
            config,
            categorical: Vec::new(),
            layout: Vec::new(),
            fitted: false,
        }
    }

    /// Fit-time output columns, in order.
    pub fn columns(&self) -> Vec<&str> {
        self.layout.iter().map(|(c, _)| c.as_str()).collect()
    }

    /// Non-categorical columns first, then the indicators of every
    /// categorical column in registration order.
    fn expand(&self, x: &DataFrame) -> Result<DataFrame> {
        let present: Vec<&String> = self
            .categorical
            .iter()
            .filter(|c| x.column(c).is_ok())
            .collect();

        let mut columns: Vec<Column> = x
            .get_columns()
            .iter()
            .filter(|c| !present.iter().any(|p| p.as_str() == c.name().as_str()))
            .cloned()
            .collect();

        for col in present {
            let values = string_values(series(x, col)?)?;
            let categories: BTreeSet<&str> = values.iter().flatten().map(String::as_str).collect();
            let skip = usize::from(self.config.drop_first);
            for category in categories.into_iter().skip(skip) {
                let indicator: Vec<u8> = values
                    .iter()
                    .map(|v| u8::from(v.as_deref() == Some(category)))
                    .collect();
                let name = format!("{col}_{category}");
                columns.push(Series::new(name.as_str().into(), indicator).into_column());
            }
        }

        Ok(DataFrame::new(columns)?)
    }
}

impl Stage for OneHotStage {
    fn name(&self) -> &'static str {
        "one_hot"
    }

    fn fit(&mut self, x: &DataFrame, _y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        self.categorical = roles.categorical_in(x);
        self.layout = layout(&self.expand(x)?);
        self.fitted = true;
        info!(
            "One-hot fit: {} categorical columns, {} output columns",
            self.categorical.len(),
            self.layout.len()
        );
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
        let expanded = self.expand(&x)?;
        let out = reconcile_columns(&expanded, &self.layout)?;
        info!("One-hot transform end");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{column_names, f64_values};
    use pretty_assertions::assert_eq;

    fn categorical(cols: &[&str]) -> RoleRegistry {
        let cols: Vec<String> = cols.iter().map(|s| s.to_string()).collect();
        RoleRegistry::new(&[], &cols, None)
    }

    fn ints(df: &DataFrame, col: &str) -> Vec<Option<i64>> {
        df.column(col)
            .unwrap()
            .as_materialized_series()
            .i64()
            .unwrap()
            .into_iter()
            .collect()
    }

    // ==================== label encoding ====================

    #[test]
    fn test_unseen_value_gets_fallback_code() {
        let mut roles = categorical(&["c"]);
        let mut stage = LabelEncodingStage::new();
        stage.fit(&df!["c" => ["x", "y"]].unwrap(), None, &mut roles).unwrap();

        let out = stage
            .transform(df!["c" => ["y", "z", "x"]].unwrap(), None, &mut roles)
            .unwrap();
        assert_eq!(ints(&out, "c"), vec![Some(1), Some(0), Some(0)]);
    }

    #[test]
    fn test_vocabulary_sorted_with_missing_as_nan() {
        let df = df!["c" => [Some("b"), None, Some("a")]].unwrap();
        let mut stage = LabelEncodingStage::new();
        let out = stage.fit_transform(df, None, &mut categorical(&["c"])).unwrap();

        // a, b, nan
        assert_eq!(ints(&out, "c"), vec![Some(1), Some(2), Some(0)]);
        assert_eq!(stage.vocabulary("c").unwrap()["nan"], 2);
    }

    #[test]
    fn test_label_transform_idempotent() {
        let df = df!["c" => ["p", "q", "p"], "n" => [1.0, 2.0, 3.0]].unwrap();
        let mut roles = categorical(&["c"]);
        let mut stage = LabelEncodingStage::new();
        stage.fit(&df, None, &mut roles).unwrap();

        let first = stage.transform(df.clone(), None, &mut roles).unwrap();
        let second = stage.transform(df, None, &mut roles).unwrap();
        assert!(first.equals_missing(&second));
    }

    // ==================== one-hot ====================

    #[test]
    fn test_first_category_dropped() {
        let df = df![
            "n" => [1.0, 2.0, 3.0],
            "color" => ["red", "blue", "green"],
        ]
        .unwrap();
        let mut stage = OneHotStage::new(OneHotConfig::default());
        let out = stage.fit_transform(df, None, &mut categorical(&["color"])).unwrap();

        assert_eq!(column_names(&out), vec!["n", "color_green", "color_red"]);
        assert_eq!(out.column("color_red").unwrap().dtype(), &DataType::UInt8);
        assert_eq!(
            f64_values(out.column("color_red").unwrap().as_materialized_series()).unwrap(),
            vec![Some(1.0), Some(0.0), Some(0.0)]
        );
    }

    #[test]
    fn test_schema_stable_across_inputs() {
        let train = df![
            "n" => [1.0, 2.0, 3.0],
            "color" => ["red", "blue", "green"],
        ]
        .unwrap();
        let mut roles = categorical(&["color"]);
        let mut stage = OneHotStage::new(OneHotConfig::default());
        stage.fit(&train, None, &mut roles).unwrap();

        let only_new = df![
            "color" => ["purple", "red"],
            "extra" => [1, 2],
            "n" => [5.0, 6.0],
        ]
        .unwrap();
        let no_categorical = df!["n" => [7.0]].unwrap();

        let a = stage.transform(only_new, None, &mut roles).unwrap();
        let b = stage.transform(no_categorical, None, &mut roles).unwrap();
        assert_eq!(column_names(&a), stage.columns());
        assert_eq!(column_names(&b), stage.columns());
        assert_eq!(
            f64_values(a.column("color_green").unwrap().as_materialized_series()).unwrap(),
            vec![Some(0.0), Some(0.0)]
        );
        assert_eq!(
            f64_values(a.column("color_red").unwrap().as_materialized_series()).unwrap(),
            vec![Some(0.0), Some(1.0)]
        );
    }

    #[test]
    fn test_keep_all_categories() {
        let df = df!["c" => [Some("a"), Some("b"), None]].unwrap();
        let mut stage = OneHotStage::new(OneHotConfig { drop_first: false });
        let out = stage.fit_transform(df, None, &mut categorical(&["c"])).unwrap();
        assert_eq!(column_names(&out), vec!["c_a", "c_b"]);
        assert_eq!(
            f64_values(out.column("c_a").unwrap().as_materialized_series()).unwrap(),
            vec![Some(1.0), Some(0.0), Some(0.0)]
        );
    }
}
