//! Data preprocessing module
//!
//! Turns a feature table into the numeric design matrix consumed by the
//! base regressors:
//! - Numeric columns: imputation, Yeo-Johnson power transform, standardization
//! - Categorical columns: most-frequent imputation, one-hot encoding
//! - Fit-time schema capture and inference-time schema validation
//!
//! The ensemble engine only talks to the [`PreprocessorFactory`] and
//! [`FeatureTransformer`] traits; [`DataPreprocessor`] is the default
//! implementation.

mod config;
mod encoder;
mod imputer;
mod pipeline;
pub mod transforms;

pub use config::PreprocessingConfig;
pub use encoder::OneHotEncoder;
pub use imputer::{ImputeStrategy, ImputeValue, Imputer};
pub use pipeline::DataPreprocessor;
pub use transforms::{PowerParams, PowerTransformer};

use crate::error::{EnsembleError, Result};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Kind of a feature column as seen by the preprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// One column of the captured schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

/// Column set captured from the training table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub columns: Vec<ColumnSpec>,
    /// Columns present at fit time whose dtype carries no usable feature
    /// (dates, lists, ...). They are skipped, not rejected.
    pub ignored: Vec<String>,
}

impl FeatureSchema {
    /// Detect column kinds from the dtypes of a training table
    pub fn infer(df: &DataFrame) -> Result<Self> {
        let mut schema = FeatureSchema::default();

        for col in df.get_columns() {
            let name = col.name().to_string();
            match column_kind(col.dtype()) {
                Some(kind) => schema.columns.push(ColumnSpec { name, kind }),
                None => schema.ignored.push(name),
            }
        }

        if schema.columns.is_empty() {
            return Err(EnsembleError::ConfigError(
                "feature table has no usable columns".to_string(),
            ));
        }
        Ok(schema)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn numeric(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Numeric)
            .map(|c| c.name.as_str())
    }

    pub fn categorical(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Categorical)
            .map(|c| c.name.as_str())
    }

    /// Check that `df` carries every captured column with a compatible dtype.
    ///
    /// Categorical columns accept numeric input (it is cast to strings);
    /// numeric columns reject string input.
    pub fn validate(&self, df: &DataFrame, allow_extra_columns: bool) -> Result<()> {
        let mut missing = Vec::new();
        for spec in &self.columns {
            let col = match df.column(&spec.name) {
                Ok(col) => col,
                Err(_) => {
                    missing.push(spec.name.clone());
                    continue;
                }
            };
            if spec.kind == ColumnKind::Numeric
                && column_kind(col.dtype()) == Some(ColumnKind::Categorical)
            {
                return Err(EnsembleError::SchemaMismatch(format!(
                    "column '{}' is numeric but received {}",
                    spec.name,
                    col.dtype()
                )));
            }
        }
        if !missing.is_empty() {
            return Err(EnsembleError::SchemaMismatch(format!(
                "missing columns: {}",
                missing.join(", ")
            )));
        }

        if !allow_extra_columns {
            let known: BTreeSet<&str> = self
                .columns
                .iter()
                .map(|c| c.name.as_str())
                .chain(self.ignored.iter().map(String::as_str))
                .collect();
            let extra: Vec<String> = df
                .get_column_names()
                .into_iter()
                .map(|n| n.to_string())
                .filter(|n| !known.contains(n.as_str()))
                .collect();
            if !extra.is_empty() {
                return Err(EnsembleError::SchemaMismatch(format!(
                    "unexpected columns: {}",
                    extra.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Map a polars dtype to the kind of feature it carries
pub fn column_kind(dtype: &DataType) -> Option<ColumnKind> {
    match dtype {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 |
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 |
        DataType::Float32 | DataType::Float64 | DataType::Boolean | DataType::Null => {
            Some(ColumnKind::Numeric)
        }
        DataType::String | DataType::Categorical(_, _) => Some(ColumnKind::Categorical),
        _ => None,
    }
}

/// Read a column as optional floats. NaN counts as missing.
pub fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df.column(name)?.as_materialized_series().cast(&DataType::Float64)?;
    Ok(series
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

/// Read a column as optional strings, casting numeric input
pub fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df.column(name)?.as_materialized_series().cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// A feature transform fit on training rows and reapplied at inference
pub trait FeatureTransformer: Clone + Send + Sync {
    /// Learn the transform state from `x`, replacing any previous state
    fn fit(&mut self, x: &DataFrame) -> Result<()>;

    /// Apply the fitted transform, producing one matrix row per table row
    fn transform(&self, x: &DataFrame) -> Result<Array2<f64>>;

    /// Independent copy with the same configuration and no fitted state
    fn unfitted(&self) -> Self;

    fn is_fitted(&self) -> bool;

    /// Names of the output matrix columns, empty before fit
    fn feature_names(&self) -> Vec<String>;

    fn fit_transform(&mut self, x: &DataFrame) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }
}

/// Builds an unfitted transformer configured for a training table
pub trait PreprocessorFactory: Send + Sync {
    type Transformer: FeatureTransformer;

    fn build(&self, x_train: &DataFrame) -> Result<Self::Transformer>;
}

/// Factory producing [`DataPreprocessor`] instances
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultPreprocessorFactory {
    pub config: PreprocessingConfig,
}

impl DefaultPreprocessorFactory {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }
}

impl PreprocessorFactory for DefaultPreprocessorFactory {
    type Transformer = DataPreprocessor;

    fn build(&self, x_train: &DataFrame) -> Result<DataPreprocessor> {
        self.config.validate()?;
        let schema = FeatureSchema::infer(x_train)?;
        Ok(DataPreprocessor::with_schema(self.config.clone(), schema))
    }
}
