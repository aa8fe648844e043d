//! Preprocessor + estimator pipeline

use super::models::Regressor;
use crate::error::{EnsembleError, Result};
use crate::preprocessing::FeatureTransformer;
use ndarray::Array1;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

/// One base model with its own preprocessor instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPipeline<T, R> {
    preprocessor: T,
    estimator: R,
}

impl<T: FeatureTransformer, R: Regressor> ModelPipeline<T, R> {
    pub fn new(preprocessor: T, estimator: R) -> Self {
        Self {
            preprocessor,
            estimator,
        }
    }

    pub fn preprocessor(&self) -> &T {
        &self.preprocessor
    }

    pub fn estimator(&self) -> &R {
        &self.estimator
    }

    /// Fit the preprocessor on `x`, then the estimator on the transformed matrix
    pub fn fit(&mut self, x: &DataFrame, y: &Array1<f64>) -> Result<()> {
        if x.height() != y.len() {
            return Err(EnsembleError::ShapeError {
                expected: format!("{} targets", x.height()),
                actual: format!("{} targets", y.len()),
            });
        }
        let matrix = self.preprocessor.fit_transform(x)?;
        self.estimator.fit(&matrix, y)
    }

    pub fn predict(&self, x: &DataFrame) -> Result<Array1<f64>> {
        if !self.is_fitted() {
            return Err(EnsembleError::ModelNotFitted);
        }
        let matrix = self.preprocessor.transform(x)?;
        self.estimator.predict(&matrix)
    }

    pub fn is_fitted(&self) -> bool {
        self.preprocessor.is_fitted() && self.estimator.is_fitted()
    }

    /// Same preprocessing and hyperparameters, nothing fitted
    pub fn unfitted(&self) -> Self {
        Self::new(self.preprocessor.unfitted(), self.estimator.unfitted())
    }
}
