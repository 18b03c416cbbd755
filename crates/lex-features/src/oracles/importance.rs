//! Bagged decision stumps as a lightweight importance model.

use anyhow::{Context, Result, bail};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use super::ImportanceModel;
use crate::config::ProblemType;
use crate::frame::{column_names, f64_values, is_numeric_like, string_values};

/// Each tree draws a bootstrap sample and `sqrt(p)` candidate features, splits
/// once on the best of them, and credits that feature with the weighted
/// impurity decrease (Gini for classification, variance for regression).
/// Importances are normalized to sum to 1.
#[derive(Debug, Clone)]
pub struct StumpForest {
    pub n_estimators: usize,
    pub seed: u64,
}

impl Default for StumpForest {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            seed: 42,
        }
    }
}

enum Labels {
    Classes { codes: Vec<usize>, n_classes: usize },
    Values(Vec<f64>),
}

impl Labels {
    fn from_series(y: &Series, problem: ProblemType) -> Result<Self> {
        match problem {
            ProblemType::Classification => {
                let mut index: HashMap<String, usize> = HashMap::new();
                let mut codes = Vec::with_capacity(y.len());
                for value in string_values(y)? {
                    let value = value.context("target contains missing values")?;
                    let next = index.len();
                    codes.push(*index.entry(value).or_insert(next));
                }
                Ok(Labels::Classes {
                    codes,
                    n_classes: index.len(),
                })
            }
            ProblemType::Regression => {
                let values = f64_values(y)?
                    .into_iter()
                    .map(|v| v.filter(|v| v.is_finite()))
                    .collect::<Option<Vec<f64>>>()
                    .context("target contains missing or non-finite values")?;
                Ok(Labels::Values(values))
            }
        }
    }

    fn impurity(&self, rows: &[usize]) -> f64 {
        match self {
            Labels::Classes { codes, n_classes } => {
                let mut counts = vec![0usize; *n_classes];
                for &r in rows {
                    counts[codes[r]] += 1;
                }
                gini(&counts, rows.len())
            }
            Labels::Values(values) => {
                let n = rows.len() as f64;
                let sum: f64 = rows.iter().map(|&r| values[r]).sum();
                let sq: f64 = rows.iter().map(|&r| values[r] * values[r]).sum();
                sq / n - (sum / n).powi(2)
            }
        }
    }

    /// Largest weighted impurity decrease of a single threshold split on `x`.
    fn best_split(&self, x: &[Option<f64>], sample: &[usize]) -> f64 {
        let mut rows: Vec<usize> = sample
            .iter()
            .copied()
            .filter(|&r| x[r].is_some_and(f64::is_finite))
            .collect();
        if rows.len() < 2 {
            return 0.0;
        }
        rows.sort_by(|&a, &b| x[a].unwrap_or(0.0).total_cmp(&x[b].unwrap_or(0.0)));
        let n = rows.len();
        let parent = self.impurity(&rows);
        let mut best = 0.0;

        match self {
            Labels::Classes { codes, n_classes } => {
                let mut left = vec![0usize; *n_classes];
                let mut right = vec![0usize; *n_classes];
                for &r in &rows {
                    right[codes[r]] += 1;
                }
                for i in 0..n - 1 {
                    let c = codes[rows[i]];
                    left[c] += 1;
                    right[c] -= 1;
                    if x[rows[i]] == x[rows[i + 1]] {
                        continue;
                    }
                    let (nl, nr) = (i + 1, n - i - 1);
                    let child = (nl as f64 * gini(&left, nl) + nr as f64 * gini(&right, nr))
                        / n as f64;
                    best = f64::max(best, parent - child);
                }
            }
            Labels::Values(values) => {
                let total: f64 = rows.iter().map(|&r| values[r]).sum();
                let total_sq: f64 = rows.iter().map(|&r| values[r] * values[r]).sum();
                let (mut sum_l, mut sq_l) = (0.0, 0.0);
                for i in 0..n - 1 {
                    let v = values[rows[i]];
                    sum_l += v;
                    sq_l += v * v;
                    if x[rows[i]] == x[rows[i + 1]] {
                        continue;
                    }
                    let (nl, nr) = ((i + 1) as f64, (n - i - 1) as f64);
                    let var_l = sq_l / nl - (sum_l / nl).powi(2);
                    let sum_r = total - sum_l;
                    let var_r = (total_sq - sq_l) / nr - (sum_r / nr).powi(2);
                    let child = (nl * var_l + nr * var_r) / n as f64;
                    best = f64::max(best, parent - child);
                }
            }
        }
        best * n as f64
    }
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>()
}

impl ImportanceModel for StumpForest {
    fn importances(&self, x: &DataFrame, y: &Series, problem: ProblemType) -> Result<Vec<f64>> {
        if x.height() != y.len() {
            bail!("x has {} rows but y has {}", x.height(), y.len());
        }
        let names = column_names(x);
        let features = names
            .iter()
            .map(|name| {
                let series = x.column(name)?.as_materialized_series();
                if !is_numeric_like(series.dtype()) {
                    bail!("feature '{name}' is not numeric ({})", series.dtype());
                }
                Ok(f64_values(series)?)
            })
            .collect::<Result<Vec<_>>>()?;
        let labels = Labels::from_series(y, problem)?;

        let n = x.height();
        let p = features.len();
        let mut importances = vec![0.0; p];
        if n == 0 || p == 0 {
            return Ok(importances);
        }
        let per_tree = ((p as f64).sqrt().round() as usize).clamp(1, p);

        for tree in 0..self.n_estimators {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(tree as u64));
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let candidates = rand::seq::index::sample(&mut rng, p, per_tree).into_vec();

            let best = candidates
                .into_iter()
                .map(|f| (f, labels.best_split(&features[f], &sample)))
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
            if let Some((feature, gain)) = best
                && gain > 0.0
            {
                importances[feature] += gain;
            }
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in &mut importances {
                *v /= total;
            }
        }
        Ok(importances)
    }
}
