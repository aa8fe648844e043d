//! Preprocessing configuration

use serde::{Deserialize, Serialize};
use super::ImputeStrategy;
use crate::error::{EnsembleError, Result};

/// Configuration for the default feature preprocessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Strategy for handling missing numeric values
    pub numeric_impute_strategy: ImputeStrategy,

    /// Strategy for handling missing categorical values
    pub categorical_impute_strategy: ImputeStrategy,

    /// Apply a Yeo-Johnson power transform to numeric features
    pub power_transform: bool,

    /// Standardize numeric features to zero mean and unit variance
    /// after the power transform
    pub standardize: bool,

    /// Accept inference tables carrying columns the schema does not know.
    /// When false such tables are rejected with a schema error.
    pub allow_extra_columns: bool,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            numeric_impute_strategy: ImputeStrategy::Median,
            categorical_impute_strategy: ImputeStrategy::MostFrequent,
            power_transform: true,
            standardize: true,
            allow_extra_columns: false,
        }
    }
}

impl PreprocessingConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set numeric impute strategy
    pub fn with_numeric_impute(mut self, strategy: ImputeStrategy) -> Self {
        self.numeric_impute_strategy = strategy;
        self
    }

    /// Builder method to set categorical impute strategy
    pub fn with_categorical_impute(mut self, strategy: ImputeStrategy) -> Self {
        self.categorical_impute_strategy = strategy;
        self
    }

    /// Builder method to toggle the power transform
    pub fn with_power_transform(mut self, enabled: bool) -> Self {
        self.power_transform = enabled;
        self
    }

    /// Builder method to toggle standardization
    pub fn with_standardize(mut self, enabled: bool) -> Self {
        self.standardize = enabled;
        self
    }

    /// Builder method to tolerate unknown columns at transform time
    pub fn with_allow_extra_columns(mut self, allow: bool) -> Self {
        self.allow_extra_columns = allow;
        self
    }

    /// Check that the strategies make sense for their column kinds
    pub fn validate(&self) -> Result<()> {
        if let ImputeStrategy::ConstantString(_) = self.numeric_impute_strategy {
            return Err(EnsembleError::ConfigError(
                "numeric columns cannot be imputed with a string constant".to_string(),
            ));
        }
        if matches!(
            self.categorical_impute_strategy,
            ImputeStrategy::Mean | ImputeStrategy::Median | ImputeStrategy::Constant(_)
        ) {
            return Err(EnsembleError::ConfigError(format!(
                "categorical columns cannot be imputed with {:?}",
                self.categorical_impute_strategy
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PreprocessingConfig::default();
        assert_eq!(config.numeric_impute_strategy, ImputeStrategy::Median);
        assert!(config.power_transform);
        assert!(!config.allow_extra_columns);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = PreprocessingConfig::new()
            .with_numeric_impute(ImputeStrategy::Mean)
            .with_power_transform(false)
            .with_allow_extra_columns(true);

        assert_eq!(config.numeric_impute_strategy, ImputeStrategy::Mean);
        assert!(!config.power_transform);
        assert!(config.allow_extra_columns);
    }

    #[test]
    fn test_rejects_mismatched_strategies() {
        let config = PreprocessingConfig::new()
            .with_categorical_impute(ImputeStrategy::Median);
        assert!(matches!(config.validate(), Err(EnsembleError::ConfigError(_))));
    }
}
