//! Gradient Boosting implementation
//!
//! Stochastic gradient boosting on regression trees with squared-error
//! loss, row subsampling and per-tree column subsampling, in the spirit
//! of LightGBM/XGBoost but simpler.

use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use super::decision_tree::DecisionTree;
use super::models::Regressor;
use crate::error::{EnsembleError, Result};

/// Gradient Boosting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingConfig {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Learning rate (shrinkage)
    pub learning_rate: f64,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Minimum samples per leaf
    pub min_samples_leaf: usize,
    /// Subsample ratio for each tree
    pub subsample: f64,
    /// Column subsample ratio
    pub colsample_bytree: f64,
    /// Random seed; `None` draws from entropy
    pub random_state: Option<u64>,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 400,
            learning_rate: 0.05,
            max_depth: 4,
            min_samples_leaf: 3,
            subsample: 0.8,
            colsample_bytree: 0.8,
            random_state: Some(42),
        }
    }
}

impl GradientBoostingConfig {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n;
        self
    }

    pub fn with_subsample(mut self, ratio: f64) -> Self {
        self.subsample = ratio;
        self
    }

    pub fn with_colsample_bytree(mut self, ratio: f64) -> Self {
        self.colsample_bytree = ratio;
        self
    }

    pub fn with_random_state(mut self, seed: Option<u64>) -> Self {
        self.random_state = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(EnsembleError::ConfigError("n_estimators must be positive".to_string()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(EnsembleError::ConfigError(format!(
                "learning_rate must lie in (0, 1], got {}",
                self.learning_rate
            )));
        }
        for (name, ratio) in [("subsample", self.subsample), ("colsample_bytree", self.colsample_bytree)] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(EnsembleError::ConfigError(format!(
                    "{} must lie in (0, 1], got {}",
                    name, ratio
                )));
            }
        }
        if self.min_samples_leaf == 0 {
            return Err(EnsembleError::ConfigError("min_samples_leaf must be positive".to_string()));
        }
        Ok(())
    }
}

/// Gradient Boosting Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    config: GradientBoostingConfig,
    trees: Vec<DecisionTree>,
    initial_prediction: f64,
    n_features: usize,
    feature_importances: Vec<f64>,
    is_fitted: bool,
}

impl Default for GradientBoostingRegressor {
    fn default() -> Self {
        Self::new(GradientBoostingConfig::default())
    }
}

impl GradientBoostingRegressor {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            initial_prediction: 0.0,
            n_features: 0,
            feature_importances: Vec::new(),
            is_fitted: false,
        }
    }

    pub fn config(&self) -> &GradientBoostingConfig {
        &self.config
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Get feature importances
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    fn sample_indices(n: usize, ratio: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
        let sample_size = (((n as f64) * ratio).ceil() as usize).clamp(1, n.max(1));
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(rng);
        indices.truncate(sample_size);
        indices.sort_unstable();
        indices
    }
}

impl Regressor for GradientBoostingRegressor {
    fn name(&self) -> &str {
        "gradient_boosting"
    }

    /// Fit the gradient boosting model
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
        if n_samples == 0 || n_features == 0 {
            return Err(EnsembleError::TrainingError(format!(
                "cannot boost on a {}x{} matrix",
                n_samples, n_features
            )));
        }

        self.trees.clear();
        self.n_features = n_features;
        self.initial_prediction = y.mean().unwrap_or(0.0);
        self.feature_importances = vec![0.0; n_features];

        let mut predictions = Array1::from_elem(n_samples, self.initial_prediction);
        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        for _ in 0..self.config.n_estimators {
            let residuals = y - &predictions;

            let rows = Self::sample_indices(n_samples, self.config.subsample, &mut rng);
            let cols = Self::sample_indices(n_features, self.config.colsample_bytree, &mut rng);

            let mut tree = DecisionTree::new_regressor()
                .with_max_depth(self.config.max_depth)
                .with_min_samples_leaf(self.config.min_samples_leaf);
            tree.fit_subset(x, &residuals, &rows, &cols)?;

            // Every row moves, not only the sampled ones
            let tree_pred = tree.predict(x)?;
            predictions.scaled_add(self.config.learning_rate, &tree_pred);

            if let Some(importance) = tree.feature_importances() {
                for (acc, imp) in self.feature_importances.iter_mut().zip(importance.iter()) {
                    *acc += imp;
                }
            }
            self.trees.push(tree);
        }

        let total: f64 = self.feature_importances.iter().sum();
        if total > 0.0 {
            for imp in &mut self.feature_importances {
                *imp /= total;
            }
        }

        self.is_fitted = true;
        debug!(
            samples = n_samples,
            features = n_features,
            trees = self.trees.len(),
            "Gradient boosting fitted"
        );
        Ok(())
    }

    /// Make predictions
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.is_fitted {
            return Err(EnsembleError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(EnsembleError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut predictions = Array1::from_elem(x.nrows(), self.initial_prediction);
        for tree in &self.trees {
            predictions.scaled_add(self.config.learning_rate, &tree.predict(x)?);
        }
        Ok(predictions)
    }

    fn unfitted(&self) -> Self {
        Self::new(self.config.clone())
    }

    fn params(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            ("n_estimators".to_string(), json!(self.config.n_estimators)),
            ("learning_rate".to_string(), json!(self.config.learning_rate)),
            ("max_depth".to_string(), json!(self.config.max_depth)),
            ("min_samples_leaf".to_string(), json!(self.config.min_samples_leaf)),
            ("subsample".to_string(), json!(self.config.subsample)),
            ("colsample_bytree".to_string(), json!(self.config.colsample_bytree)),
            ("random_state".to_string(), json!(self.config.random_state)),
        ])
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}
