//! Missing value imputation strategies

use crate::error::{EnsembleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Strategy for imputing missing values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImputeStrategy {
    /// Replace with mean (numeric only)
    Mean,
    /// Replace with median (numeric only)
    Median,
    /// Replace with mode / most frequent value
    MostFrequent,
    /// Replace with a constant value
    Constant(f64),
    /// Replace with a constant string (categorical)
    ConstantString(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImputeValue {
    Numeric(f64),
    String(String),
}

/// Imputer for handling missing values, one learned fill value per column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Imputer {
    strategy: ImputeStrategy,
    fill_values: BTreeMap<String, ImputeValue>,
    is_fitted: bool,
}

impl Imputer {
    /// Create a new imputer with the specified strategy
    pub fn new(strategy: ImputeStrategy) -> Self {
        Self {
            strategy,
            fill_values: BTreeMap::new(),
            is_fitted: false,
        }
    }

    pub fn strategy(&self) -> &ImputeStrategy {
        &self.strategy
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Learn the fill value of a numeric column
    pub fn fit_numeric(&mut self, column: &str, values: &[Option<f64>]) -> Result<&mut Self> {
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        if present.is_empty() {
            warn!(column = column, "Numeric column has no observed values, imputing 0.0");
        }

        let fill = match &self.strategy {
            ImputeStrategy::Mean => mean(&present),
            ImputeStrategy::Median => median(&present),
            ImputeStrategy::MostFrequent => mode_numeric(&present),
            ImputeStrategy::Constant(val) => *val,
            ImputeStrategy::ConstantString(_) => {
                return Err(EnsembleError::PreprocessingError(format!(
                    "cannot impute numeric column '{}' with a string constant",
                    column
                )))
            }
        };

        self.fill_values.insert(column.to_string(), ImputeValue::Numeric(fill));
        self.is_fitted = true;
        Ok(self)
    }

    /// Learn the fill value of a categorical column
    pub fn fit_categorical(&mut self, column: &str, values: &[Option<String>]) -> Result<&mut Self> {
        let fill = match &self.strategy {
            ImputeStrategy::MostFrequent => {
                let mode = mode_string(values);
                if mode.is_none() {
                    warn!(column = column, "Categorical column has no observed values, imputing \"missing\"");
                }
                mode.unwrap_or_else(|| "missing".to_string())
            }
            ImputeStrategy::ConstantString(val) => val.clone(),
            other => {
                return Err(EnsembleError::PreprocessingError(format!(
                    "cannot impute categorical column '{}' with {:?}",
                    column, other
                )))
            }
        };

        self.fill_values.insert(column.to_string(), ImputeValue::String(fill));
        self.is_fitted = true;
        Ok(self)
    }

    /// Replace missing numeric entries with the learned fill value
    pub fn fill_numeric(&self, column: &str, values: &[Option<f64>]) -> Result<Vec<f64>> {
        match self.fill_values.get(column) {
            Some(ImputeValue::Numeric(fill)) => {
                Ok(values.iter().map(|v| v.unwrap_or(*fill)).collect())
            }
            Some(ImputeValue::String(_)) => Err(EnsembleError::PreprocessingError(format!(
                "column '{}' was fitted as categorical",
                column
            ))),
            None => Err(self.unfitted_column(column)),
        }
    }

    /// Replace missing categorical entries with the learned fill value
    pub fn fill_categorical(&self, column: &str, values: &[Option<String>]) -> Result<Vec<String>> {
        match self.fill_values.get(column) {
            Some(ImputeValue::String(fill)) => Ok(values
                .iter()
                .map(|v| v.clone().unwrap_or_else(|| fill.clone()))
                .collect()),
            Some(ImputeValue::Numeric(_)) => Err(EnsembleError::PreprocessingError(format!(
                "column '{}' was fitted as numeric",
                column
            ))),
            None => Err(self.unfitted_column(column)),
        }
    }

    /// Learned fill values of numeric columns
    pub fn numeric_fill_values(&self) -> BTreeMap<String, f64> {
        self.fill_values
            .iter()
            .filter_map(|(name, value)| match value {
                ImputeValue::Numeric(v) => Some((name.clone(), *v)),
                ImputeValue::String(_) => None,
            })
            .collect()
    }

    /// Learned fill values of categorical columns
    pub fn categorical_fill_values(&self) -> BTreeMap<String, String> {
        self.fill_values
            .iter()
            .filter_map(|(name, value)| match value {
                ImputeValue::String(v) => Some((name.clone(), v.clone())),
                ImputeValue::Numeric(_) => None,
            })
            .collect()
    }

    fn unfitted_column(&self, column: &str) -> EnsembleError {
        if self.is_fitted {
            EnsembleError::SchemaMismatch(format!("column '{}' was not seen during fit", column))
        } else {
            EnsembleError::ModelNotFitted
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Most frequent value; ties resolve to the smallest value
fn mode_numeric(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut best = (0.0, 0usize);
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        if j - i > best.1 {
            best = (sorted[i], j - i);
        }
        i = j;
    }
    best.0
}

/// Most frequent string; ties resolve to the lexicographically smallest
fn mode_string(values: &[Option<String>]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for val in values.iter().flatten() {
        *counts.entry(val.as_str()).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (val, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((val, count));
        }
    }
    best.map(|(val, _)| val.to_string())
}
