//! Data preprocessing pipeline

use super::{
    config::PreprocessingConfig,
    encoder::OneHotEncoder,
    imputer::Imputer,
    numeric_values, string_values,
    transforms::PowerTransformer,
    FeatureSchema, FeatureTransformer,
};
use crate::error::{EnsembleError, Result};
use ndarray::Array2;
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Default preprocessor: impute and power-transform numeric columns,
/// impute and one-hot encode categorical columns.
///
/// The output matrix holds the numeric columns first, in schema order,
/// followed by one one-hot block per categorical column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPreprocessor {
    config: PreprocessingConfig,
    schema: FeatureSchema,
    numeric_imputer: Imputer,
    categorical_imputer: Imputer,
    power: PowerTransformer,
    encoder: OneHotEncoder,
    n_samples_fitted: usize,
    is_fitted: bool,
}

impl DataPreprocessor {
    /// Create a preprocessor that captures its schema on the first fit
    pub fn new() -> Self {
        Self::with_config(PreprocessingConfig::default())
    }

    pub fn with_config(config: PreprocessingConfig) -> Self {
        Self::with_schema(config, FeatureSchema::default())
    }

    /// Create a preprocessor bound to an already captured schema
    pub fn with_schema(config: PreprocessingConfig, schema: FeatureSchema) -> Self {
        Self {
            numeric_imputer: Imputer::new(config.numeric_impute_strategy.clone()),
            categorical_imputer: Imputer::new(config.categorical_impute_strategy.clone()),
            power: PowerTransformer::new(config.power_transform, config.standardize),
            encoder: OneHotEncoder::new(),
            config,
            schema,
            n_samples_fitted: 0,
            is_fitted: false,
        }
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Number of rows seen by the last fit
    pub fn n_samples_fitted(&self) -> usize {
        self.n_samples_fitted
    }

    /// Learned numeric fill values (medians by default)
    pub fn numeric_fill_values(&self) -> BTreeMap<String, f64> {
        self.numeric_imputer.numeric_fill_values()
    }

    /// Learned categorical fill values
    pub fn categorical_fill_values(&self) -> BTreeMap<String, String> {
        self.categorical_imputer.categorical_fill_values()
    }

    /// Learned Yeo-Johnson lambda per numeric column
    pub fn lambdas(&self) -> BTreeMap<String, f64> {
        self.power
            .params()
            .iter()
            .map(|(name, p)| (name.clone(), p.lambda))
            .collect()
    }

    /// Learned categories per categorical column
    pub fn categories(&self) -> &BTreeMap<String, Vec<String>> {
        self.encoder.categories()
    }

    /// Width of the output matrix
    pub fn n_features_out(&self) -> usize {
        self.schema.numeric().count()
            + self
                .schema
                .categorical()
                .map(|c| self.encoder.width(c))
                .sum::<usize>()
    }

    fn reset(&mut self) {
        self.numeric_imputer = Imputer::new(self.config.numeric_impute_strategy.clone());
        self.categorical_imputer = Imputer::new(self.config.categorical_impute_strategy.clone());
        self.power = PowerTransformer::new(self.config.power_transform, self.config.standardize);
        self.encoder = OneHotEncoder::new();
        self.is_fitted = false;
    }

    /// Impute, then power-transform every numeric column. Columns are
    /// independent, so they are processed in parallel.
    fn numeric_block(&self, df: &DataFrame) -> Result<Vec<Vec<f64>>> {
        let names: Vec<&str> = self.schema.numeric().collect();
        names
            .par_iter()
            .map(|name| {
                let raw = numeric_values(df, name)?;
                let mut filled = self.numeric_imputer.fill_numeric(name, &raw)?;
                self.power.transform_column(name, &mut filled)?;
                Ok(filled)
            })
            .collect()
    }
}

impl Default for DataPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureTransformer for DataPreprocessor {
    fn fit(&mut self, df: &DataFrame) -> Result<()> {
        self.config.validate()?;
        if df.height() == 0 {
            return Err(EnsembleError::ValidationError(
                "cannot fit preprocessor on an empty table".to_string(),
            ));
        }
        if self.schema.is_empty() {
            self.schema = FeatureSchema::infer(df)?;
        }
        // Extra columns are tolerated at fit time; they are simply not features.
        self.schema.validate(df, true)?;
        self.reset();

        let numeric: Vec<String> = self.schema.numeric().map(str::to_string).collect();
        for name in &numeric {
            let raw = numeric_values(df, name)?;
            self.numeric_imputer.fit_numeric(name, &raw)?;
            let filled = self.numeric_imputer.fill_numeric(name, &raw)?;
            self.power.fit_column(name, &filled)?;
        }

        let categorical: Vec<String> = self.schema.categorical().map(str::to_string).collect();
        for name in &categorical {
            let raw = string_values(df, name)?;
            self.categorical_imputer.fit_categorical(name, &raw)?;
            let filled = self.categorical_imputer.fill_categorical(name, &raw)?;
            self.encoder.fit_column(name, &filled)?;
        }

        self.n_samples_fitted = df.height();
        self.is_fitted = true;
        debug!(
            rows = df.height(),
            numeric = numeric.len(),
            categorical = categorical.len(),
            features_out = self.n_features_out(),
            "Preprocessor fitted"
        );
        Ok(())
    }

    fn transform(&self, df: &DataFrame) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(EnsembleError::ModelNotFitted);
        }
        self.schema.validate(df, self.config.allow_extra_columns)?;

        let n_rows = df.height();
        if n_rows == 0 {
            return Err(EnsembleError::ValidationError(
                "feature table has no rows".to_string(),
            ));
        }

        let numeric = self.numeric_block(df)?;
        let mut out = Array2::zeros((n_rows, self.n_features_out()));

        for (j, column) in numeric.iter().enumerate() {
            for (i, &v) in column.iter().enumerate() {
                out[[i, j]] = v;
            }
        }

        let mut offset = numeric.len();
        for name in self.schema.categorical() {
            let raw = string_values(df, name)?;
            let filled = self.categorical_imputer.fill_categorical(name, &raw)?;
            let codes = self.encoder.encode_column(name, &filled)?;
            for (i, code) in codes.into_iter().enumerate() {
                if let Some(c) = code {
                    out[[i, offset + c]] = 1.0;
                }
            }
            offset += self.encoder.width(name);
        }

        Ok(out)
    }

    fn unfitted(&self) -> Self {
        Self::with_schema(self.config.clone(), self.schema.clone())
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    fn feature_names(&self) -> Vec<String> {
        if !self.is_fitted {
            return Vec::new();
        }
        let mut names: Vec<String> = self.schema.numeric().map(str::to_string).collect();
        for name in self.schema.categorical() {
            names.extend(self.encoder.feature_names(name));
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::{DefaultPreprocessorFactory, PreprocessorFactory};

    fn create_test_dataframe() -> DataFrame {
        df! {
            "LotArea" => &[Some(8450.0), Some(9600.0), None, Some(9550.0), Some(14260.0)],
            "YearBuilt" => &[2003i64, 1976, 2001, 1915, 2000],
            "MSZoning" => &[Some("RL"), Some("RL"), Some("RM"), None, Some("RL")],
        }
        .unwrap()
    }

    fn fitted() -> DataPreprocessor {
        let df = create_test_dataframe();
        let mut pre = DefaultPreprocessorFactory::default().build(&df).unwrap();
        pre.fit(&df).unwrap();
        pre
    }

    #[test]
    fn test_preprocessor_creation() {
        let pre = DataPreprocessor::new();
        assert!(!pre.is_fitted());
        assert!(pre.feature_names().is_empty());
    }

    #[test]
    fn test_fit_transform_shape() {
        let pre = fitted();
        let x = pre.transform(&create_test_dataframe()).unwrap();

        // 2 numeric + 2 categories
        assert_eq!(x.dim(), (5, 4));
        assert_eq!(
            pre.feature_names(),
            vec!["LotArea", "YearBuilt", "MSZoning=RL", "MSZoning=RM"]
        );
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_imputation_state() {
        let pre = fitted();
        assert_eq!(pre.numeric_fill_values()["LotArea"], (9550.0 + 9600.0) / 2.0);
        assert_eq!(pre.categorical_fill_values()["MSZoning"], "RL");
    }

    #[test]
    fn test_one_hot_rows() {
        let pre = fitted();
        let x = pre.transform(&create_test_dataframe()).unwrap();
        assert_eq!(x.row(0).to_vec()[2..].to_vec(), vec![1.0, 0.0]);
        assert_eq!(x.row(2).to_vec()[2..].to_vec(), vec![0.0, 1.0]);
        // missing category imputed with the mode
        assert_eq!(x.row(3).to_vec()[2..].to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_unknown_category_is_all_zero() {
        let pre = fitted();
        let df = df! {
            "LotArea" => &[10000.0],
            "YearBuilt" => &[1999i64],
            "MSZoning" => &["C (all)"],
        }
        .unwrap();
        let x = pre.transform(&df).unwrap();
        assert_eq!(x.row(0).to_vec()[2..].to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_transform_before_fit() {
        let pre = DataPreprocessor::new();
        let err = pre.transform(&create_test_dataframe()).unwrap_err();
        assert!(matches!(err, EnsembleError::ModelNotFitted));
    }

    #[test]
    fn test_unfitted_copy_keeps_schema() {
        let pre = fitted();
        let copy = pre.unfitted();
        assert!(!copy.is_fitted());
        assert_eq!(copy.schema(), pre.schema());
        assert!(copy.numeric_fill_values().is_empty());
    }

    #[test]
    fn test_empty_rows_rejected() {
        let pre = fitted();
        let df = create_test_dataframe().head(Some(0));
        assert!(matches!(pre.transform(&df), Err(EnsembleError::ValidationError(_))));
    }
}
