//! Regularized linear regression
//!
//! ElasticNet fit by cyclic coordinate descent on the objective
//! `1/(2n) ||y - Xw||² + alpha * l1_ratio * ||w||₁ + 0.5 * alpha * (1 - l1_ratio) * ||w||²`.

use super::models::Regressor;
use crate::error::{EnsembleError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Hyperparameters of [`ElasticNetRegression`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticNetConfig {
    /// Overall regularization strength
    pub alpha: f64,
    /// L1 ratio (0.0 = pure L2/Ridge, 1.0 = pure L1/Lasso)
    pub l1_ratio: f64,
    pub max_iter: usize,
    /// Convergence threshold on the summed absolute coefficient change
    pub tol: f64,
    pub fit_intercept: bool,
}

impl Default for ElasticNetConfig {
    fn default() -> Self {
        Self {
            alpha: 0.0005,
            l1_ratio: 0.9,
            max_iter: 1000,
            tol: 1e-6,
            fit_intercept: true,
        }
    }
}

impl ElasticNetConfig {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_l1_ratio(mut self, l1_ratio: f64) -> Self {
        self.l1_ratio = l1_ratio;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha >= 0.0 && self.alpha.is_finite()) {
            return Err(EnsembleError::ConfigError(format!(
                "alpha must be a non-negative number, got {}",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.l1_ratio) {
            return Err(EnsembleError::ConfigError(format!(
                "l1_ratio must lie in [0, 1], got {}",
                self.l1_ratio
            )));
        }
        if self.max_iter == 0 {
            return Err(EnsembleError::ConfigError("max_iter must be positive".to_string()));
        }
        Ok(())
    }
}

/// ElasticNet regression (L1 + L2 regularization)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticNetRegression {
    pub config: ElasticNetConfig,
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
    /// Coordinate descent sweeps used by the last fit
    pub n_iter: usize,
    pub is_fitted: bool,
}

impl Default for ElasticNetRegression {
    fn default() -> Self {
        Self::new(ElasticNetConfig::default())
    }
}

impl ElasticNetRegression {
    pub fn new(config: ElasticNetConfig) -> Self {
        Self {
            config,
            coefficients: None,
            intercept: None,
            n_iter: 0,
            is_fitted: false,
        }
    }

    fn soft_threshold(val: f64, threshold: f64) -> f64 {
        if val > threshold {
            val - threshold
        } else if val < -threshold {
            val + threshold
        } else {
            0.0
        }
    }

    pub fn score(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        let p = self.predict(x)?;
        super::metrics::r2_score(y, &p)
    }
}

impl Regressor for ElasticNetRegression {
    fn name(&self) -> &str {
        "elasticnet"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.config.validate()?;
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() {
            return Err(EnsembleError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(EnsembleError::TrainingError("no training samples".to_string()));
        }

        let (x_c, y_c, x_mean, y_mean) = if self.config.fit_intercept {
            let xm = x
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(n_features));
            let ym = y.mean().unwrap_or(0.0);
            (x - &xm.view().insert_axis(Axis(0)), y - ym, xm, ym)
        } else {
            (x.clone(), y.clone(), Array1::zeros(n_features), 0.0)
        };

        let col_norms: Vec<f64> = (0..n_features)
            .map(|j| x_c.column(j).mapv(|v| v * v).sum())
            .collect();

        let mut w = Array1::zeros(n_features);
        let n = n_samples as f64;
        let l1_penalty = self.config.alpha * self.config.l1_ratio * n;
        let l2_penalty = self.config.alpha * (1.0 - self.config.l1_ratio) * n;

        let mut r = &y_c - &x_c.dot(&w);
        let mut iterations = 0;
        for _ in 0..self.config.max_iter {
            iterations += 1;
            let mut diff = 0.0;

            for j in 0..n_features {
                let denom = col_norms[j] + l2_penalty;
                if denom < 1e-15 {
                    w[j] = 0.0;
                    continue;
                }
                // rho = x_j^T r + |x_j|² w_j, with r the current residual
                let rho = x_c.column(j).dot(&r) + col_norms[j] * w[j];
                let old_wj = w[j];
                w[j] = Self::soft_threshold(rho, l1_penalty) / denom;
                let delta = old_wj - w[j];
                if delta != 0.0 {
                    r.scaled_add(delta, &x_c.column(j));
                    diff += delta.abs();
                }
            }

            if diff < self.config.tol {
                break;
            }
        }

        self.intercept = Some(y_mean - w.dot(&x_mean));
        self.coefficients = Some(w);
        self.n_iter = iterations;
        self.is_fitted = true;
        debug!(
            samples = n_samples,
            features = n_features,
            iterations = iterations,
            "ElasticNet fitted"
        );
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coef = match (&self.coefficients, self.is_fitted) {
            (Some(coef), true) => coef,
            _ => return Err(EnsembleError::ModelNotFitted),
        };
        if x.ncols() != coef.len() {
            return Err(EnsembleError::ShapeError {
                expected: format!("{} features", coef.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.dot(coef) + self.intercept.unwrap_or(0.0))
    }

    fn unfitted(&self) -> Self {
        Self::new(self.config.clone())
    }

    fn params(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            ("alpha".to_string(), json!(self.config.alpha)),
            ("l1_ratio".to_string(), json!(self.config.l1_ratio)),
            ("max_iter".to_string(), json!(self.config.max_iter)),
            ("tol".to_string(), json!(self.config.tol)),
            ("fit_intercept".to_string(), json!(self.config.fit_intercept)),
        ])
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}
