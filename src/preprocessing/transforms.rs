//! Power transform for numeric features
//!
//! Yeo-Johnson transform with a per-column lambda chosen by maximum
//! likelihood, optionally followed by standardization.

use crate::error::{EnsembleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lower bound of the lambda search
const LAMBDA_MIN: f64 = -2.0;
/// Upper bound of the lambda search
const LAMBDA_MAX: f64 = 2.0;
const COARSE_STEP: f64 = 0.1;
const FINE_STEP: f64 = 0.005;
/// Variance below this fraction of the squared mean counts as constant
const RELATIVE_VAR_TOL: f64 = 1e-12;

/// Parameters learned for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerParams {
    /// Yeo-Johnson lambda (1.0 is the identity)
    pub lambda: f64,
    /// Mean of the transformed training values
    pub mean: f64,
    /// Population standard deviation of the transformed training values
    pub scale: f64,
}

/// Yeo-Johnson power transformer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerTransformer {
    /// Estimate lambda; when false lambda stays at 1.0
    power: bool,
    standardize: bool,
    params: BTreeMap<String, PowerParams>,
    is_fitted: bool,
}

impl PowerTransformer {
    /// Create a new transformer
    pub fn new(power: bool, standardize: bool) -> Self {
        Self {
            power,
            standardize,
            params: BTreeMap::new(),
            is_fitted: false,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Learned parameters per column
    pub fn params(&self) -> &BTreeMap<String, PowerParams> {
        &self.params
    }

    /// Fit lambda and standardization statistics for one column.
    /// `values` must already be imputed.
    pub fn fit_column(&mut self, column: &str, values: &[f64]) -> Result<&mut Self> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EnsembleError::PreprocessingError(format!(
                "column '{}' contains non-finite values",
                column
            )));
        }

        let constant = is_constant(values);
        let lambda = if self.power && !constant {
            estimate_lambda(values)
        } else {
            1.0
        };

        let transformed: Vec<f64> = values.iter().map(|&x| yeo_johnson(x, lambda)).collect();
        let (mean, scale) = if self.standardize && !transformed.is_empty() {
            let (mean, var) = mean_variance(&transformed);
            // Constant columns keep unit scale
            if constant || is_negligible(var, mean) {
                (mean, 1.0)
            } else {
                (mean, var.sqrt())
            }
        } else {
            (0.0, 1.0)
        };

        self.params.insert(column.to_string(), PowerParams { lambda, mean, scale });
        self.is_fitted = true;
        Ok(self)
    }

    /// Apply the fitted transform to one column in place
    pub fn transform_column(&self, column: &str, values: &mut [f64]) -> Result<()> {
        let params = self.params.get(column).ok_or_else(|| {
            if self.is_fitted {
                EnsembleError::SchemaMismatch(format!("column '{}' was not seen during fit", column))
            } else {
                EnsembleError::ModelNotFitted
            }
        })?;

        for v in values.iter_mut() {
            *v = (yeo_johnson(*v, params.lambda) - params.mean) / params.scale;
        }
        Ok(())
    }
}

/// Yeo-Johnson transform for a single value
pub fn yeo_johnson(x: f64, lambda: f64) -> f64 {
    if x >= 0.0 {
        if lambda.abs() < 1e-10 {
            x.ln_1p()
        } else {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        }
    } else if (lambda - 2.0).abs() < 1e-10 {
        -(-x).ln_1p()
    } else {
        -(((-x + 1.0).powf(2.0 - lambda) - 1.0) / (2.0 - lambda))
    }
}

fn mean_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|&t| (t - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

/// Variance that is rounding noise relative to the mean
fn is_negligible(variance: f64, mean: f64) -> bool {
    variance <= 0.0 || variance <= RELATIVE_VAR_TOL * mean * mean
}

fn is_constant(values: &[f64]) -> bool {
    let mut iter = values.iter();
    match iter.next() {
        Some(first) => iter.all(|v| v == first),
        None => true,
    }
}

/// Yeo-Johnson log-likelihood
fn log_likelihood(values: &[f64], lambda: f64) -> f64 {
    let n = values.len() as f64;

    let transformed: Vec<f64> = values.iter().map(|&x| yeo_johnson(x, lambda)).collect();
    let (mean, variance) = mean_variance(&transformed);

    if !variance.is_finite() || is_negligible(variance, mean) {
        return f64::NEG_INFINITY;
    }

    let log_jacobian: f64 = values.iter().map(|&x| x.abs().ln_1p().copysign(x)).sum();

    -n / 2.0 * variance.ln() + (lambda - 1.0) * log_jacobian
}

/// Grid search on [-2, 2], then a finer pass around the coarse optimum
fn estimate_lambda(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 1.0;
    }

    let search = |lo: f64, hi: f64, step: f64, start: (f64, f64)| {
        let mut best = start;
        let n_steps = ((hi - lo) / step).round() as i64;
        for i in 0..=n_steps {
            let lambda = lo + i as f64 * step;
            let ll = log_likelihood(values, lambda);
            if ll > best.1 {
                best = (lambda, ll);
            }
        }
        best
    };

    let (coarse, coarse_ll) = search(LAMBDA_MIN, LAMBDA_MAX, COARSE_STEP, (1.0, f64::NEG_INFINITY));
    if !coarse_ll.is_finite() {
        return 1.0;
    }

    let lo = (coarse - COARSE_STEP).max(LAMBDA_MIN);
    let hi = (coarse + COARSE_STEP).min(LAMBDA_MAX);
    search(lo, hi, FINE_STEP, (coarse, coarse_ll)).0
}
