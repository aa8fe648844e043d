//! K-fold cross-validation splitter

use crate::error::{EnsembleError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A single train/validation split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub validation_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// K-fold splitter.
///
/// Rows are optionally shuffled with a seeded ChaCha8 stream, then cut
/// into `n_splits` contiguous folds; the first `n % n_splits` folds get
/// one extra row. Every row is validated exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidator {
    n_splits: usize,
    shuffle: bool,
    random_state: Option<u64>,
}

impl CrossValidator {
    /// Create a shuffling k-fold splitter
    pub fn k_fold(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: true,
            random_state: None,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Generate train/validation splits
    pub fn split(&self, n_samples: usize) -> Result<Vec<CVSplit>> {
        if self.n_splits < 2 {
            return Err(EnsembleError::ConfigError(format!(
                "number of folds must be at least 2, got {}",
                self.n_splits
            )));
        }
        if n_samples < self.n_splits {
            return Err(EnsembleError::ConfigError(format!(
                "number of folds ({}) exceeds number of rows ({})",
                self.n_splits, n_samples
            )));
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if self.shuffle {
            let mut rng = match self.random_state {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            };
            indices.shuffle(&mut rng);
        }

        let base = n_samples / self.n_splits;
        let remainder = n_samples % self.n_splits;

        let mut splits = Vec::with_capacity(self.n_splits);
        let mut current = 0;
        for fold_idx in 0..self.n_splits {
            let fold_size = if fold_idx < remainder { base + 1 } else { base };
            let validation_indices = indices[current..current + fold_size].to_vec();
            let train_indices: Vec<usize> = indices[..current]
                .iter()
                .chain(indices[current + fold_size..].iter())
                .copied()
                .collect();

            splits.push(CVSplit {
                train_indices,
                validation_indices,
                fold_idx,
            });
            current += fold_size;
        }

        Ok(splits)
    }
}
