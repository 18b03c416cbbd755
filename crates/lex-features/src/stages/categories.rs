//! Category-merge stages.
//!
//! [`FrequencyMergeStage`] folds the rare tail of each categorical column
//! into a single label. It re-learns the tail on every `transform` call.
//!
//! [`TargetMergeStage`] merges categories whose positive-target rates are
//! within a threshold of each other, using connected components of the
//! "close enough" graph. The mapping is learned at fit and reused.

use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::Stage;
use crate::config::{FrequencyMergeConfig, TargetMergeConfig};
use crate::error::{FeatureError, Result};
use crate::frame::{
    category_key, is_boolean_true, is_numeric_dtype, normalize_category, round_to, series,
    string_values,
};
use crate::roles::RoleRegistry;

// =============================================================================
// Frequency-tail merge
// =============================================================================

pub struct FrequencyMergeStage {
    config: FrequencyMergeConfig,
    categorical: Vec<String>,
    /// Raw value -> output value, per column, from the last transform.
    mappings: Vec<(String, HashMap<String, String>)>,
    fitted: bool,
}

impl FrequencyMergeStage {
    pub fn new(config: FrequencyMergeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            categorical: Vec::new(),
            mappings: Vec::new(),
            fitted: false,
        })
    }

    /// Mapping applied to `column` by the last `transform` call.
    pub fn mapping(&self, column: &str) -> Option<&HashMap<String, String>> {
        self.mappings
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, m)| m)
    }

    /// Lower-cased categories that stay distinct.
    ///
    /// Categories are ranked by count (ties in first-seen order). Shares are
    /// rounded to 5 decimals and the running total to 2; everything below the
    /// threshold is kept, plus the first category that reaches it.
    fn kept_categories(&self, values: &[Option<String>]) -> HashSet<String> {
        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for value in values {
            let key = category_key(value.as_deref()).to_lowercase();
            let count = counts.entry(key.clone()).or_insert(0);
            if *count == 0 {
                order.push(key);
            }
            *count += 1;
        }
        order.sort_by(|a, b| counts[b].cmp(&counts[a]));

        let total = values.len() as f64;
        let mut kept = HashSet::new();
        let mut cumulative = 0.0;
        for category in order {
            cumulative += round_to(counts[&category] as f64 / total, 5);
            let boundary = round_to(cumulative, 2) >= self.config.threshold;
            kept.insert(category);
            if boundary {
                break;
            }
        }
        kept
    }
}

impl Stage for FrequencyMergeStage {
    fn name(&self) -> &'static str {
        "frequency_merge"
    }

    fn fit(&mut self, x: &DataFrame, _y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        self.categorical = roles.categorical_in(x);
        self.fitted = true;
        info!("Frequency merge fit: {} columns", self.categorical.len());
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
        let label = self.config.label.clone();
        let mut mappings = Vec::with_capacity(self.categorical.len());

        for col in &self.categorical {
            if x.column(col).is_err() {
                debug!("Column '{}' missing, filled with '{}'", col, label);
                let filled = Series::new(col.as_str().into(), vec![label.as_str(); x.height()]);
                x.with_column(filled)?;
                continue;
            }

            let values = string_values(series(&x, col)?)?;
            let kept = self.kept_categories(&values);

            let mut mapping = HashMap::new();
            let mut merged = 0usize;
            let output: Vec<Option<String>> = values
                .into_iter()
                .map(|value| {
                    let raw = category_key(value.as_deref());
                    if kept.contains(&raw.to_lowercase()) {
                        mapping.insert(raw.clone(), raw);
                        value
                    } else {
                        merged += 1;
                        mapping.insert(raw, label.clone());
                        Some(label.clone())
                    }
                })
                .collect();

            if merged > 0 {
                x.replace(col, Series::new(col.as_str().into(), output))?;
                debug!("Column '{}': {} values merged into '{}'", col, merged, label);
            }
            mappings.push((col.clone(), mapping));
        }

        self.mappings = mappings;
        info!("Frequency merge transform end");
        Ok(x)
    }
}

// =============================================================================
// Target-rate merge
// =============================================================================

/// Union-find over category indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

/// Positive-target rate of one category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRate {
    pub category: String,
    pub positives: usize,
    pub total: usize,
}

impl CategoryRate {
    pub fn rate(&self) -> f64 {
        self.positives as f64 / self.total as f64
    }
}

pub struct TargetMergeStage {
    config: TargetMergeConfig,
    categorical: Vec<String>,
    /// Normalized category -> canonical label, for columns that were merged.
    names: Vec<(String, HashMap<String, String>)>,
    fitted: bool,
}

impl TargetMergeStage {
    pub fn new(config: TargetMergeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            categorical: Vec::new(),
            names: Vec::new(),
            fitted: false,
        })
    }

    pub fn mapping(&self, column: &str) -> Option<&HashMap<String, String>> {
        self.names.iter().find(|(c, _)| c == column).map(|(_, m)| m)
    }

    /// Per-category positive rates, ordered numerically for numeric columns
    /// and lexicographically otherwise. Rows with a missing value or target
    /// are skipped.
    pub fn category_rates(column: &Series, y: &Series) -> Result<Vec<CategoryRate>> {
        let values = string_values(column)?;
        let targets = string_values(y)?;

        let mut rates: Vec<CategoryRate> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (value, target) in values.into_iter().zip(targets) {
            let (Some(value), Some(target)) = (value, target) else {
                continue;
            };
            let slot = *index.entry(value.clone()).or_insert_with(|| {
                rates.push(CategoryRate {
                    category: value,
                    positives: 0,
                    total: 0,
                });
                rates.len() - 1
            });
            rates[slot].total += 1;
            if is_boolean_true(&target) {
                rates[slot].positives += 1;
            }
        }

        if is_numeric_dtype(column.dtype()) {
            rates.sort_by(|a, b| {
                let (pa, pb) = (a.category.parse::<f64>(), b.category.parse::<f64>());
                match (pa, pb) {
                    (Ok(pa), Ok(pb)) => pa.total_cmp(&pb),
                    _ => a.category.cmp(&b.category),
                }
            });
        } else {
            rates.sort_by(|a, b| a.category.cmp(&b.category));
        }
        Ok(rates)
    }

    /// Canonical label per normalized category.
    ///
    /// Every pair whose rates differ by at most `threshold` is an edge; each
    /// connected component becomes one label joining its members with `-` in
    /// the order they first appear in an edge.
    fn merge_names(&self, rates: &[CategoryRate]) -> HashMap<String, String> {
        let n = rates.len();
        let mut set = DisjointSet::new(n);
        let mut nodes: Vec<usize> = Vec::new();
        let mut seen = vec![false; n];

        for i in 0..n {
            for j in (i + 1)..n {
                if (rates[i].rate() - rates[j].rate()).abs() <= self.config.threshold {
                    set.union(i, j);
                    for node in [i, j] {
                        if !seen[node] {
                            seen[node] = true;
                            nodes.push(node);
                        }
                    }
                }
            }
        }

        let mut components: Vec<(usize, Vec<usize>)> = Vec::new();
        for &node in &nodes {
            let root = set.find(node);
            match components.iter_mut().find(|(r, _)| *r == root) {
                Some((_, members)) => members.push(node),
                None => components.push((root, vec![node])),
            }
        }

        let mut names = HashMap::with_capacity(n);
        for (_, members) in &components {
            let label = members
                .iter()
                .map(|&m| rates[m].category.as_str())
                .collect::<Vec<_>>()
                .join("-");
            for &m in members {
                names.insert(normalize_category(&rates[m].category), label.clone());
            }
        }
        for (i, rate) in rates.iter().enumerate() {
            if !seen[i] {
                names.insert(normalize_category(&rate.category), rate.category.clone());
            }
        }
        names
    }
}

impl Stage for TargetMergeStage {
    fn name(&self) -> &'static str {
        "target_merge"
    }

    fn fit(&mut self, x: &DataFrame, y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        let y = y.ok_or(FeatureError::MissingTarget(self.name()))?;
        self.categorical = roles.categorical_in(x);
        self.names.clear();

        for col in &self.categorical {
            let rates = Self::category_rates(series(x, col)?, y)?;
            if rates.len() < self.config.uniques {
                debug!(
                    "Column '{}': {} categories, below {}",
                    col,
                    rates.len(),
                    self.config.uniques
                );
                continue;
            }
            let names = self.merge_names(&rates);
            self.names.push((col.clone(), names));
        }

        self.fitted = true;
        info!("Target merge fit: {} columns mapped", self.names.len());
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

        for (col, names) in &self.names {
            if x.column(col).is_err() {
                continue;
            }
            let values = string_values(series(&x, col)?)?;
            let mut changed = false;
            let mapped: Vec<Option<String>> = values
                .into_iter()
                .map(|value| {
                    value.map(|v| match names.get(&normalize_category(&v)) {
                        Some(label) if *label != v => {
                            changed = true;
                            label.clone()
                        }
                        _ => v,
                    })
                })
                .collect();
            if changed {
                x.replace(col, Series::new(col.as_str().into(), mapped))?;
            }
        }

        info!("Target merge transform end");
        Ok(x)
    }
}
