//! Model traits and evaluation metrics

use super::metrics;
use crate::error::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metrics for regression model evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// R-squared
    pub r2: f64,
    /// Number of scored samples
    pub n_samples: usize,
}

impl ModelMetrics {
    /// Compute regression metrics
    pub fn compute_regression(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<Self> {
        let mse = metrics::mse(y_true, y_pred)?;
        Ok(Self {
            mse,
            rmse: mse.sqrt(),
            mae: metrics::mae(y_true, y_pred)?,
            r2: metrics::r2_score(y_true, y_pred)?,
            n_samples: y_true.len(),
        })
    }
}

/// Base estimator capability.
///
/// Hyperparameters are fixed at construction; `fit` only learns state.
pub trait Regressor: Send + Sync {
    /// Short model name used in reports and registry records
    fn name(&self) -> &str;

    /// Fit the model to training data, replacing any previous state
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    /// Make predictions
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Copy with the same hyperparameters and no fitted state
    fn unfitted(&self) -> Self
    where
        Self: Sized;

    /// Hyperparameters as a flat mapping
    fn params(&self) -> BTreeMap<String, serde_json::Value>;

    fn is_fitted(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_regression_metrics() {
        let y_true = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let y_pred = array![1.1, 2.0, 2.9, 4.1, 5.0];

        let metrics = ModelMetrics::compute_regression(&y_true, &y_pred).unwrap();

        assert_eq!(metrics.n_samples, 5);
        assert!(metrics.rmse < 0.1);
        assert!(metrics.r2 > 0.9);
    }
}
