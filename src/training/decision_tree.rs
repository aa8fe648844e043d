//! Regression tree used as the weak learner of gradient boosting

use crate::error::{EnsembleError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Minimum squared-error reduction for a split to be kept
const MIN_GAIN: f64 = 1e-12;

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with prediction value
    Leaf {
        value: f64,
        n_samples: usize,
    },
    /// Internal node with split
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        gain: f64,
    },
}

impl TreeNode {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                    node = if row[*feature_idx] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }
}

/// Regression tree minimizing squared error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Tree root
    root: Option<TreeNode>,
    /// Maximum depth
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Number of features
    n_features: usize,
    /// Squared-error reduction per feature, normalized to sum to 1
    feature_importances: Option<Array1<f64>>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new_regressor()
    }
}

impl DecisionTree {
    /// Create a new regressor tree
    pub fn new_regressor() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            n_features: 0,
            feature_importances: None,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Set minimum samples to split
    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    /// Set minimum samples in leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    /// Fit the tree on all rows and all features
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let features: Vec<usize> = (0..x.ncols()).collect();
        self.fit_subset(x, y, &rows, &features)
    }

    /// Fit the tree on a subset of rows, splitting only on `features`
    pub fn fit_subset(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        rows: &[usize],
        features: &[usize],
    ) -> Result<&mut Self> {
        if x.nrows() != y.len() {
            return Err(EnsembleError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if rows.is_empty() {
            return Err(EnsembleError::TrainingError(
                "cannot fit a tree on zero samples".to_string(),
            ));
        }
        if let Some(&bad) = features.iter().find(|&&f| f >= x.ncols()) {
            return Err(EnsembleError::ShapeError {
                expected: format!("feature index < {}", x.ncols()),
                actual: bad.to_string(),
            });
        }

        self.n_features = x.ncols();
        let mut importances = vec![0.0; x.ncols()];
        self.root = Some(self.build_tree(x, y, rows, features, 0, &mut importances));

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        self.feature_importances = Some(Array1::from_vec(importances));
        Ok(self)
    }

    fn build_tree(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        features: &[usize],
        depth: usize,
        importances: &mut [f64],
    ) -> TreeNode {
        let n_samples = indices.len();
        let value = indices.iter().map(|&i| y[i]).sum::<f64>() / n_samples as f64;

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d);
        if should_stop {
            return TreeNode::Leaf { value, n_samples };
        }

        let Some((feature_idx, threshold, gain)) = self.find_best_split(x, y, indices, features) else {
            return TreeNode::Leaf { value, n_samples };
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, feature_idx]] <= threshold);
        if left_indices.is_empty() || right_indices.is_empty() {
            return TreeNode::Leaf { value, n_samples };
        }

        importances[feature_idx] += gain;

        let left = Box::new(self.build_tree(x, y, &left_indices, features, depth + 1, importances));
        let right = Box::new(self.build_tree(x, y, &right_indices, features, depth + 1, importances));

        TreeNode::Split {
            feature_idx,
            threshold,
            left,
            right,
            n_samples,
            gain,
        }
    }

    /// Best (feature, threshold, squared-error reduction) over `features`.
    /// Ties keep the earliest feature so fits are reproducible.
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        features: &[usize],
    ) -> Option<(usize, f64, f64)> {
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let parent_score = total_sum * total_sum / n as f64;
        let min_leaf = self.min_samples_leaf;

        // Each feature independently finds its best split
        let feature_results: Vec<Option<(usize, f64, f64)>> = features
            .par_iter()
            .map(|&feature_idx| {
                let mut order: Vec<(f64, f64)> = indices
                    .iter()
                    .map(|&i| (x[[i, feature_idx]], y[i]))
                    .collect();
                order.sort_by(|a, b| a.0.total_cmp(&b.0));

                let mut best: Option<(f64, f64)> = None;
                let mut left_sum = 0.0;
                for i in 0..n - 1 {
                    left_sum += order[i].1;
                    let left_count = i + 1;
                    let right_count = n - left_count;
                    if order[i].0 == order[i + 1].0
                        || left_count < min_leaf
                        || right_count < min_leaf
                    {
                        continue;
                    }
                    let right_sum = total_sum - left_sum;
                    let gain = left_sum * left_sum / left_count as f64
                        + right_sum * right_sum / right_count as f64
                        - parent_score;
                    if gain > MIN_GAIN && best.map_or(true, |(g, _)| gain > g) {
                        best = Some((gain, (order[i].0 + order[i + 1].0) / 2.0));
                    }
                }
                best.map(|(gain, threshold)| (feature_idx, threshold, gain))
            })
            .collect();

        feature_results
            .into_iter()
            .flatten()
            .fold(None, |acc: Option<(usize, f64, f64)>, cand| match acc {
                Some(a) if a.2 >= cand.2 => Some(a),
                _ => Some(cand),
            })
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(EnsembleError::ModelNotFitted)?;
        if x.ncols() != self.n_features {
            return Err(EnsembleError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.outer_iter().map(|row| root.predict_row(row)).collect())
    }

    pub fn is_fitted(&self) -> bool {
        self.root.is_some()
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.root.as_ref().map_or(0, TreeNode::depth)
    }

    pub fn n_leaves(&self) -> usize {
        self.root.as_ref().map_or(0, TreeNode::n_leaves)
    }
}
