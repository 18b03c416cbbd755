//! Column role registry.
//!
//! Roles are kept outside the table and handed explicitly from stage to
//! stage. Stages that synthesize columns (missing-value and outlier
//! indicators) register them here so later stages see them as categorical.

use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Role a column plays for the feature stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Numeric,
    Categorical,
    Target,
}

/// Ordered mapping from column name to [`ColumnRole`].
///
/// Registration order is preserved; it is the order stages iterate columns in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleRegistry {
    entries: Vec<(String, ColumnRole)>,
}

impl RoleRegistry {
    pub fn new(numeric: &[String], categorical: &[String], target: Option<&str>) -> Self {
        let mut registry = Self::default();
        for name in numeric {
            registry.register(name, ColumnRole::Numeric);
        }
        for name in categorical {
            registry.register(name, ColumnRole::Categorical);
        }
        if let Some(target) = target {
            registry.register(target, ColumnRole::Target);
        }
        registry
    }

    /// Register a column, replacing its previous role if any.
    pub fn register(&mut self, name: impl Into<String>, role: ColumnRole) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = role,
            None => self.entries.push((name, role)),
        }
    }

    pub fn role(&self, name: &str) -> Option<ColumnRole> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, role)| *role)
    }

    pub fn columns(&self, role: ColumnRole) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, r)| *r == role)
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn numeric(&self) -> Vec<String> {
        self.columns(ColumnRole::Numeric)
    }

    pub fn categorical(&self) -> Vec<String> {
        self.columns(ColumnRole::Categorical)
    }

    pub fn target(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, r)| *r == ColumnRole::Target)
            .map(|(n, _)| n.as_str())
    }

    /// Columns with `role` that exist in `df`, in registration order.
    pub fn present(&self, role: ColumnRole, df: &DataFrame) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(n, r)| *r == role && df.column(n).is_ok())
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn numeric_in(&self, df: &DataFrame) -> Vec<String> {
        self.present(ColumnRole::Numeric, df)
    }

    pub fn categorical_in(&self, df: &DataFrame) -> Vec<String> {
        self.present(ColumnRole::Categorical, df)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
