//! One-hot encoding of categorical features

use crate::error::{EnsembleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One-hot encoder with sorted categories.
///
/// Categories not seen during fit encode as an all-zero block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OneHotEncoder {
    // column name -> sorted categories
    categories: BTreeMap<String, Vec<String>>,
    is_fitted: bool,
}

impl OneHotEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Learned categories per column
    pub fn categories(&self) -> &BTreeMap<String, Vec<String>> {
        &self.categories
    }

    /// Learn the categories of one column. `values` must already be imputed.
    pub fn fit_column(&mut self, column: &str, values: &[String]) -> Result<&mut Self> {
        let unique: BTreeSet<&str> = values.iter().map(|s| s.as_str()).collect();
        self.categories
            .insert(column.to_string(), unique.into_iter().map(str::to_string).collect());
        self.is_fitted = true;
        Ok(self)
    }

    /// Width of the one-hot block produced for `column`
    pub fn width(&self, column: &str) -> usize {
        self.categories.get(column).map_or(0, Vec::len)
    }

    /// Output names `column=category` for one column
    pub fn feature_names(&self, column: &str) -> Vec<String> {
        self.categories
            .get(column)
            .map(|cats| cats.iter().map(|c| format!("{}={}", column, c)).collect())
            .unwrap_or_default()
    }

    /// Index of the active category per row, `None` for unseen categories
    pub fn encode_column(&self, column: &str, values: &[String]) -> Result<Vec<Option<usize>>> {
        let cats = self.categories.get(column).ok_or_else(|| {
            if self.is_fitted {
                EnsembleError::SchemaMismatch(format!("column '{}' was not seen during fit", column))
            } else {
                EnsembleError::ModelNotFitted
            }
        })?;

        Ok(values
            .iter()
            .map(|v| cats.binary_search_by(|c| c.as_str().cmp(v.as_str())).ok())
            .collect())
    }
}
