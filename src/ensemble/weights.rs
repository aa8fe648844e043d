//! Blend weight optimization
//!
//! Both optimizers pick a convex-style pair `(w, 1 - w)` for two base
//! models from their out-of-fold predictions. They differ in how `w` is
//! searched: an exhaustive scan of a fixed grid, or the closed-form least
//! squares projection.

use crate::error::{EnsembleError, Result};
use crate::training::metrics::rmse;
use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::{debug, warn};

/// Weights of the two base models; they always sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub weight_a: f64,
    pub weight_b: f64,
}

impl BlendWeights {
    pub fn new(weight_a: f64) -> Self {
        Self {
            weight_a,
            weight_b: 1.0 - weight_a,
        }
    }

    /// 50/50 blend
    pub fn equal() -> Self {
        Self::new(0.5)
    }

    /// `weight_a * a + weight_b * b`, element-wise
    pub fn blend(&self, a: &Array1<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
        if a.len() != b.len() {
            return Err(EnsembleError::ShapeError {
                expected: format!("{} predictions", a.len()),
                actual: format!("{} predictions", b.len()),
            });
        }
        let (wa, wb) = (self.weight_a, self.weight_b);
        Ok(Zip::from(a).and(b).map_collect(|&pa, &pb| wa * pa + wb * pb))
    }
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self::equal()
    }
}

/// Chosen weights and the RMSE they achieve on the fitting data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightFit {
    pub weights: BlendWeights,
    pub rmse: f64,
}

/// Strategy for choosing blend weights from two prediction vectors
pub trait WeightOptimizer: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn fit(&self, pred_a: &Array1<f64>, pred_b: &Array1<f64>, y_true: &Array1<f64>) -> Result<WeightFit>;
}

fn check_inputs(pred_a: &Array1<f64>, pred_b: &Array1<f64>, y_true: &Array1<f64>) -> Result<()> {
    if pred_a.len() != y_true.len() || pred_b.len() != y_true.len() {
        return Err(EnsembleError::ShapeError {
            expected: format!("{} predictions per model", y_true.len()),
            actual: format!("{} and {}", pred_a.len(), pred_b.len()),
        });
    }
    if y_true.is_empty() {
        return Err(EnsembleError::ValidationError(
            "cannot optimize weights on zero rows".to_string(),
        ));
    }
    let all_finite = pred_a
        .iter()
        .chain(pred_b.iter())
        .chain(y_true.iter())
        .all(|v| v.is_finite());
    if !all_finite {
        return Err(EnsembleError::ValidationError(
            "predictions and targets must be finite".to_string(),
        ));
    }
    Ok(())
}

fn blended_rmse(w: f64, pred_a: &Array1<f64>, pred_b: &Array1<f64>, y_true: &Array1<f64>) -> Result<f64> {
    rmse(y_true, &BlendWeights::new(w).blend(pred_a, pred_b)?)
}

/// Scan `w` over `0, step, 2*step, ..., <= 1` and keep the lowest RMSE.
///
/// The scan is sequential with a strict comparison, so ties keep the
/// smallest `w`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSearchOptimizer {
    pub step: f64,
}

impl Default for GridSearchOptimizer {
    fn default() -> Self {
        Self { step: 0.05 }
    }
}

impl GridSearchOptimizer {
    pub fn new(step: f64) -> Self {
        Self { step }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.step > 0.0 && self.step <= 1.0) {
            return Err(EnsembleError::ConfigError(format!(
                "grid step must lie in (0, 1], got {}",
                self.step
            )));
        }
        Ok(())
    }

    /// Grid points, endpoint 1.0 included when the step divides it
    pub fn grid(&self) -> Vec<f64> {
        let n_steps = (1.0 / self.step + 1e-9).floor() as usize;
        (0..=n_steps).map(|i| (i as f64 * self.step).min(1.0)).collect()
    }
}

impl WeightOptimizer for GridSearchOptimizer {
    fn name(&self) -> &str {
        "grid"
    }

    fn fit(&self, pred_a: &Array1<f64>, pred_b: &Array1<f64>, y_true: &Array1<f64>) -> Result<WeightFit> {
        self.validate()?;
        check_inputs(pred_a, pred_b, y_true)?;

        let mut best_w = 0.0;
        let mut best_rmse = f64::INFINITY;
        for w in self.grid() {
            let score = blended_rmse(w, pred_a, pred_b, y_true)?;
            debug!(weight = w, rmse = score, "Grid point");
            if score < best_rmse {
                best_rmse = score;
                best_w = w;
            }
        }

        Ok(WeightFit {
            weights: BlendWeights::new(best_w),
            rmse: best_rmse,
        })
    }
}

/// Closed-form least squares: regress `y - b` on `a - b`, giving
/// `w = (A·B) / (A·A)`.
///
/// A denominator below `epsilon` means the two models agree everywhere;
/// `w` then falls back to 0.5. With `refine_step` set, a grid of that
/// step is scanned as well and replaces the closed-form answer when it
/// scores strictly better (or when the closed form was degenerate).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeastSquaresOptimizer {
    pub clip: bool,
    pub epsilon: f64,
    pub refine_step: Option<f64>,
}

impl Default for LeastSquaresOptimizer {
    fn default() -> Self {
        Self {
            clip: true,
            epsilon: 1e-12,
            refine_step: None,
        }
    }
}

impl LeastSquaresOptimizer {
    pub fn with_clip(mut self, clip: bool) -> Self {
        self.clip = clip;
        self
    }

    pub fn with_refine_step(mut self, step: Option<f64>) -> Self {
        self.refine_step = step;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.epsilon >= 0.0) {
            return Err(EnsembleError::ConfigError(format!(
                "epsilon must be non-negative, got {}",
                self.epsilon
            )));
        }
        if let Some(step) = self.refine_step {
            GridSearchOptimizer::new(step).validate()?;
        }
        Ok(())
    }
}

impl WeightOptimizer for LeastSquaresOptimizer {
    fn name(&self) -> &str {
        "least_squares"
    }

    fn fit(&self, pred_a: &Array1<f64>, pred_b: &Array1<f64>, y_true: &Array1<f64>) -> Result<WeightFit> {
        self.validate()?;
        check_inputs(pred_a, pred_b, y_true)?;

        let a = pred_a - pred_b;
        let b = y_true - pred_b;
        let denom = a.dot(&a);

        let degenerate = denom < self.epsilon;
        let w = if degenerate {
            warn!(denominator = denom, "Base model predictions coincide, defaulting weight to 0.5");
            0.5
        } else {
            let w = a.dot(&b) / denom;
            if self.clip {
                w.clamp(0.0, 1.0)
            } else {
                w
            }
        };

        let mut fit = WeightFit {
            weights: BlendWeights::new(w),
            rmse: blended_rmse(w, pred_a, pred_b, y_true)?,
        };

        if let Some(step) = self.refine_step {
            let grid = GridSearchOptimizer::new(step).fit(pred_a, pred_b, y_true)?;
            if degenerate || grid.rmse < fit.rmse {
                debug!(
                    closed_form = w,
                    grid = grid.weights.weight_a,
                    "Grid refinement replaces closed-form weight"
                );
                fit = grid;
            }
        }

        Ok(fit)
    }
}

/// Serializable choice of optimizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightStrategy {
    Grid(GridSearchOptimizer),
    LeastSquares(LeastSquaresOptimizer),
}

impl Default for WeightStrategy {
    fn default() -> Self {
        WeightStrategy::Grid(GridSearchOptimizer::default())
    }
}

impl WeightStrategy {
    pub fn optimizer(&self) -> &dyn WeightOptimizer {
        match self {
            WeightStrategy::Grid(grid) => grid,
            WeightStrategy::LeastSquares(ls) => ls,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            WeightStrategy::Grid(grid) => grid.validate(),
            WeightStrategy::LeastSquares(ls) => ls.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_grid_points() {
        let grid = GridSearchOptimizer::default().grid();
        assert_eq!(grid.len(), 21);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[20], 1.0);
        assert_eq!(GridSearchOptimizer::new(0.3).grid().len(), 4);
    }

    #[test]
    fn test_grid_finds_midpoint() {
        let a = array![1.0, 2.0, 3.0];
        let b = array![3.0, 2.0, 1.0];
        let y = array![2.0, 2.0, 2.0];
        let fit = GridSearchOptimizer::default().fit(&a, &b, &y).unwrap();
        assert!((fit.weights.weight_a - 0.5).abs() < 1e-12);
        assert!(fit.rmse < 1e-12);
    }

    #[test]
    fn test_grid_tie_keeps_lowest_weight() {
        // Identical models: every weight scores the same
        let a = array![0.0, 0.0];
        let y = array![1.0, 1.0];
        let fit = GridSearchOptimizer::default().fit(&a, &a, &y).unwrap();
        assert_eq!(fit.weights.weight_a, 0.0);
        assert_eq!(fit.weights.weight_b, 1.0);
    }

    #[test]
    fn test_least_squares_closed_form() {
        let a = array![10.0, 10.0];
        let b = array![20.0, 20.0];
        let y = array![15.0, 15.0];
        let fit = LeastSquaresOptimizer::default().fit(&a, &b, &y).unwrap();
        assert!((fit.weights.weight_a - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_least_squares_clipping() {
        // y lies beyond model a, so the unclipped weight exceeds 1
        let a = array![10.0, 12.0];
        let b = array![0.0, 0.0];
        let y = array![20.0, 24.0];

        let clipped = LeastSquaresOptimizer::default().fit(&a, &b, &y).unwrap();
        assert_eq!(clipped.weights.weight_a, 1.0);

        let free = LeastSquaresOptimizer::default().with_clip(false).fit(&a, &b, &y).unwrap();
        assert!((free.weights.weight_a - 2.0).abs() < 1e-12);
        assert!((free.weights.weight_b + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_least_squares_degenerate_denominator() {
        let a = array![5.0, 6.0];
        let y = array![1.0, 2.0];
        let fit = LeastSquaresOptimizer::default().fit(&a, &a, &y).unwrap();
        assert_eq!(fit.weights, BlendWeights::equal());
    }

    #[test]
    fn test_degenerate_denominator_uses_refine_grid() {
        // Every grid weight blends to the same zeros, so the scan keeps w = 0
        let a = array![0.0, 0.0];
        let y = array![1.0, 2.0];
        let fit = LeastSquaresOptimizer::default()
            .with_refine_step(Some(0.1))
            .fit(&a, &a, &y)
            .unwrap();
        assert_eq!(fit.weights.weight_a, 0.0);
        assert_eq!(fit.weights.weight_b, 1.0);
    }

    #[test]
    fn test_refinement_never_worse() {
        let a = array![1.0, 4.0, 2.0, 8.0];
        let b = array![2.0, 1.0, 5.0, 3.0];
        let y = array![1.5, 3.0, 2.0, 6.0];
        let plain = LeastSquaresOptimizer::default().fit(&a, &b, &y).unwrap();
        let refined = LeastSquaresOptimizer::default()
            .with_refine_step(Some(0.01))
            .fit(&a, &b, &y)
            .unwrap();
        assert!(refined.rmse <= plain.rmse);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let a = array![1.0, 2.0];
        let y = array![1.0];
        assert!(GridSearchOptimizer::default().fit(&a, &a, &y).is_err());

        let nan = array![f64::NAN, 1.0];
        let y = array![1.0, 1.0];
        assert!(matches!(
            LeastSquaresOptimizer::default().fit(&nan, &a, &y),
            Err(EnsembleError::ValidationError(_))
        ));
        assert!(matches!(
            GridSearchOptimizer::new(0.0).fit(&a, &a, &y),
            Err(EnsembleError::ConfigError(_))
        ));
    }

    #[test]
    fn test_strategy_serde() {
        let strategy = WeightStrategy::LeastSquares(LeastSquaresOptimizer::default());
        let json = serde_json::to_string(&strategy).unwrap();
        assert!(json.contains("least_squares"));
        let back: WeightStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, strategy);
    }
}
