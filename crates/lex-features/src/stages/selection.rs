//! Feature-selection stages.
//!
//! - [`ConstantColumnStage`]: drops columns with a single distinct value.
//! - [`CorrelationStage`]: greedy Spearman pruning against the target.
//! - [`ChiSquareStage`]: chi-square relevance of categorical columns.
//! - [`ImportanceStage`]: top-N columns of an importance model.

use polars::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::Stage;
use crate::config::{ChiSquareConfig, CorrelationConfig, ImportanceConfig};
use crate::error::{Degradation, FeatureError, Outcome, Result};
use crate::frame::{category_key, column_names, f64_values, is_numeric_like, series, string_values};
use crate::oracles::{ImportanceModel, StumpForest};
use crate::roles::RoleRegistry;
use crate::stats;

/// Columns of `x` not in `removed`, in table order.
///
/// Returns `x` untouched when nothing would remain.
fn drop_columns(x: DataFrame, removed: &[String]) -> Result<DataFrame> {
    let keep: Vec<String> = column_names(&x)
        .into_iter()
        .filter(|c| !removed.contains(c))
        .collect();
    if keep.is_empty() {
        warn!("Refusing to drop every column");
        return Ok(x);
    }
    Ok(x.select(keep)?)
}

// =============================================================================
// Constant columns
// =============================================================================

/// Removes columns that hold one distinct value (missing counts as a value).
///
/// Checks the categorical columns, or every column when none are registered.
#[derive(Debug, Default)]
pub struct ConstantColumnStage {
    removed: Vec<String>,
    fitted: bool,
}

impl ConstantColumnStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> &[String] {
        &self.removed
    }
}

impl Stage for ConstantColumnStage {
    fn name(&self) -> &'static str {
        "constant_columns"
    }

    fn fit(&mut self, x: &DataFrame, _y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        let mut candidates = roles.categorical_in(x);
        if candidates.is_empty() {
            candidates = column_names(x);
        }

        self.removed.clear();
        for col in candidates {
            let distinct: HashSet<String> = string_values(series(x, &col)?)?
                .iter()
                .map(|v| category_key(v.as_deref()))
                .collect();
            if distinct.len() == 1 {
                debug!("Column '{}' is constant", col);
                self.removed.push(col);
            }
        }

        self.fitted = true;
        info!("Constant column fit: {} removed", self.removed.len());
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
        drop_columns(x, &self.removed)
    }
}

// =============================================================================
// Correlation pruning
// =============================================================================

/// Drops one column of every highly rank-correlated pair.
///
/// The decision is taken on the first `transform` that sees the target and is
/// reused afterwards.
pub struct CorrelationStage {
    config: CorrelationConfig,
    candidates: Vec<String>,
    target: Option<String>,
    removed: Option<Vec<String>>,
    fitted: bool,
    degradations: Vec<Degradation>,
}

impl CorrelationStage {
    pub fn new(config: CorrelationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            candidates: Vec::new(),
            target: None,
            removed: None,
            fitted: false,
            degradations: Vec::new(),
        })
    }

    /// Columns removed by the pruning decision, once taken.
    pub fn removed(&self) -> Option<&[String]> {
        self.removed.as_deref()
    }

    /// Target values from `y` or from the table itself.
    fn target_values(&self, x: &DataFrame, y: Option<&Series>) -> Result<Outcome<Option<Vec<Option<f64>>>>> {
        let target = match (y, self.target.as_deref()) {
            (Some(y), _) => y,
            (None, Some(name)) if x.column(name).is_ok() => series(x, name)?,
            _ => return Ok(Outcome::degraded(None, "target not in correlation")),
        };
        if !is_numeric_like(target.dtype()) {
            return Ok(Outcome::degraded(
                None,
                format!("target is not numeric ({})", target.dtype()),
            ));
        }
        Ok(Outcome::Applied(Some(f64_values(target)?)))
    }

    /// Greedy left-to-right pruning.
    ///
    /// For each column, every other unchecked column correlated at or above
    /// the threshold is compared on absolute target correlation; the weaker
    /// one is removed. Removing the current column moves on to the next.
    fn prune(&self, columns: &[Vec<Option<f64>>], target: &[Option<f64>]) -> Vec<usize> {
        let n = columns.len();
        let to_target: Vec<f64> = columns
            .iter()
            .map(|c| stats::spearman(c, target).abs())
            .collect();
        let mut pair = vec![vec![f64::NAN; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let corr = stats::spearman(&columns[i], &columns[j]);
                pair[i][j] = corr;
                pair[j][i] = corr;
            }
        }

        let mut kept: Vec<usize> = (0..n).collect();
        let mut checked: HashSet<usize> = HashSet::new();
        let mut pos = 0;
        while pos < kept.len() {
            let current = kept[pos];
            let others: Vec<usize> = kept
                .iter()
                .copied()
                .filter(|c| *c != current && !checked.contains(c))
                .collect();

            let mut current_removed = false;
            for other in others {
                if pair[current][other] < self.config.threshold || pair[current][other].is_nan() {
                    continue;
                }
                if to_target[current] > to_target[other] {
                    kept.retain(|c| *c != other);
                } else {
                    kept.retain(|c| *c != current);
                    current_removed = true;
                    break;
                }
            }

            checked.insert(current);
            if !current_removed {
                pos += 1;
            }
        }
        kept
    }

    fn decide(&mut self, x: &DataFrame, y: Option<&Series>) -> Result<Option<Vec<String>>> {
        let outcome = self.target_values(x, y)?;
        let Some(target) = outcome.record("correlation", None, &mut self.degradations) else {
            return Ok(None);
        };

        let names: Vec<String> = self
            .candidates
            .iter()
            .filter(|c| Some(c.as_str()) != self.target.as_deref())
            .filter(|c| {
                x.column(c)
                    .map(|col| is_numeric_like(col.dtype()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        let columns = names
            .iter()
            .map(|c| f64_values(series(x, c)?).map_err(FeatureError::from))
            .collect::<Result<Vec<_>>>()?;

        let kept = self.prune(&columns, &target);
        let removed: Vec<String> = names
            .iter()
            .enumerate()
            .filter(|(i, _)| !kept.contains(i))
            .map(|(_, c)| c.clone())
            .collect();
        Ok(Some(removed))
    }
}

impl Stage for CorrelationStage {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn fit(&mut self, x: &DataFrame, y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        let mut candidates = roles.categorical_in(x);
        candidates.extend(roles.numeric());
        self.candidates = candidates;
        self.target = roles
            .target()
            .map(str::to_string)
            .or_else(|| y.map(|y| y.name().to_string()));
        self.removed = None;
        self.degradations.clear();
        self.fitted = true;
        info!("Correlation fit: {} candidate columns", self.candidates.len());
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
        if self.removed.is_none() {
            self.degradations.clear();
            match self.decide(&x, y)? {
                Some(removed) => {
                    info!("Correlation pruning removed {:?}", removed);
                    self.removed = Some(removed);
                }
                None => {
                    info!("Correlation transform end (no target)");
                    return Ok(x);
                }
            }
        }

        let removed = self.removed.as_deref().unwrap_or_default();
        info!("Correlation transform end");
        drop_columns(x, removed)
    }

    fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }
}

// =============================================================================
// Chi-square pruning
// =============================================================================

pub struct ChiSquareStage {
    config: ChiSquareConfig,
    /// Categorical columns kept, strongest first. `None` when nothing was pruned.
    kept: Option<Vec<String>>,
    pruned: Vec<String>,
    fitted: bool,
    degradations: Vec<Degradation>,
}

impl ChiSquareStage {
    pub fn new(config: ChiSquareConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            kept: None,
            pruned: Vec::new(),
            fitted: false,
            degradations: Vec::new(),
        })
    }

    pub fn kept(&self) -> Option<&[String]> {
        self.kept.as_deref()
    }

    pub fn pruned(&self) -> &[String] {
        &self.pruned
    }

    /// Categorical columns to keep, ordered by descending statistic.
    fn select(&self, x: &DataFrame, y: &Series, categorical: &[String]) -> Result<Outcome<Option<Vec<String>>>> {
        let classes: Vec<String> = string_values(y)?
            .iter()
            .map(|v| category_key(v.as_deref()))
            .collect();
        let features = categorical
            .iter()
            .map(|c| f64_values(series(x, c)?).map_err(FeatureError::from))
            .collect::<Result<Vec<_>>>()?;

        let scores = match stats::chi_square(&features, &classes) {
            Ok(scores) => scores,
            Err(e) => return Ok(Outcome::degraded(None, format!("chi-square test failed: {e}"))),
        };

        let rank = |s: f64| if s.is_nan() { f64::NEG_INFINITY } else { s };
        let mut order: Vec<usize> = (0..categorical.len()).collect();
        order.sort_by(|&a, &b| rank(scores[b].statistic).total_cmp(&rank(scores[a].statistic)));

        let kept: Vec<String> = match self.config.threshold {
            Some(fraction) => {
                let n = (categorical.len() as f64 * fraction) as usize;
                order.iter().take(n).map(|&i| categorical[i].clone()).collect()
            }
            None => order
                .iter()
                .filter(|&&i| scores[i].p_value <= self.config.alpha)
                .map(|&i| categorical[i].clone())
                .collect(),
        };
        Ok(Outcome::Applied(Some(kept)))
    }
}

impl Stage for ChiSquareStage {
    fn name(&self) -> &'static str {
        "chi_square"
    }

    fn fit(&mut self, x: &DataFrame, y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        let y = y.ok_or(FeatureError::MissingTarget(self.name()))?;
        let categorical = roles.categorical_in(x);
        self.kept = None;
        self.pruned.clear();
        self.degradations.clear();
        self.fitted = true;

        let distinct: HashSet<String> = string_values(y)?
            .iter()
            .map(|v| category_key(v.as_deref()))
            .collect();
        if distinct.len() > self.config.y_threshold {
            info!(
                "Target has {} distinct values, above {}; no chi-square pruning",
                distinct.len(),
                self.config.y_threshold
            );
            return Ok(());
        }

        let outcome = self.select(x, y, &categorical)?;
        if let Some(kept) = outcome.record("chi_square", None, &mut self.degradations) {
            self.pruned = categorical
                .into_iter()
                .filter(|c| !kept.contains(c))
                .collect();
            self.kept = Some(kept);
        }
        info!("Chi-square fit: {} columns pruned", self.pruned.len());
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
        drop_columns(x, &self.pruned)
    }

    fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }
}

// =============================================================================
// Importance ranking
// =============================================================================

pub struct ImportanceStage {
    config: ImportanceConfig,
    model: Box<dyn ImportanceModel>,
    ranking: Vec<(String, f64)>,
    selected: Option<Vec<String>>,
}

impl ImportanceStage {
    /// Uses the built-in [`StumpForest`].
    pub fn new(config: ImportanceConfig) -> Result<Self> {
        let model = StumpForest {
            n_estimators: config.n_estimators,
            seed: config.seed,
        };
        Self::with_model(config, Box::new(model))
    }

    pub fn with_model(config: ImportanceConfig, model: Box<dyn ImportanceModel>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            model,
            ranking: Vec::new(),
            selected: None,
        })
    }

    /// Every feature with its importance, most important first.
    pub fn ranking(&self) -> &[(String, f64)] {
        &self.ranking
    }

    pub fn selected(&self) -> Option<&[String]> {
        self.selected.as_deref()
    }
}

impl Stage for ImportanceStage {
    fn name(&self) -> &'static str {
        "importance"
    }

    fn fit(&mut self, x: &DataFrame, y: Option<&Series>, roles: &mut RoleRegistry) -> Result<()> {
        let y = y.ok_or(FeatureError::MissingTarget(self.name()))?;
        let target = roles.target().unwrap_or(y.name().as_str()).to_string();
        let features: Vec<String> = column_names(x)
            .into_iter()
            .filter(|c| *c != target)
            .collect();
        let table = x.select(features.iter().map(String::as_str))?;

        let importances = self
            .model
            .importances(&table, y, self.config.problem_type)
            .map_err(|e| FeatureError::Collaborator {
                name: "importance",
                reason: e.to_string(),
            })?;
        if importances.len() != features.len() {
            return Err(FeatureError::Collaborator {
                name: "importance",
                reason: format!(
                    "{} importances for {} features",
                    importances.len(),
                    features.len()
                ),
            });
        }

        let mut ranking: Vec<(String, f64)> = features.into_iter().zip(importances).collect();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1));
        let selected: Vec<String> = ranking
            .iter()
            .take(self.config.top_n)
            .map(|(c, _)| c.clone())
            .collect();

        info!("Importance fit: kept {} of {} features", selected.len(), ranking.len());
        self.ranking = ranking;
        self.selected = Some(selected);
        Ok(())
    }

    fn transform(
        &mut self,
        x: DataFrame,
        _y: Option<&Series>,
        _roles: &mut RoleRegistry,
    ) -> Result<DataFrame> {
        let selected = self
            .selected
            .as_ref()
            .ok_or(FeatureError::NotFitted("importance"))?;
        for col in selected {
            series(&x, col)?;
        }
        Ok(x.select(selected.iter().map(String::as_str))?)
    }
}
