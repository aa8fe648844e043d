//! Two-model blended ensemble
//!
//! Provides the training and inference engine of the price model:
//! - Out-of-fold cross-fitting with per-fold preprocessors
//! - Blend weight search (grid scan or closed-form least squares)
//! - Final full-data refit with an optional log1p target
//! - Deterministic weighted prediction

mod blend;
mod cross_fit;
mod weights;

pub use blend::{
    BlendedEnsemble, EnsembleConfig, EnsembleRecord, EnsembleSummary, PriceEnsemble,
    PriceEnsembleConfig, PriceEnsembleTrainer, TargetTransform, TrainedEnsemble, WeightSource,
};
pub use cross_fit::{
    take_rows, CrossFitEngine, CrossFitResult, FoldReport, FoldSummary, OofPredictions, N_MODELS,
};
pub use weights::{
    BlendWeights, GridSearchOptimizer, LeastSquaresOptimizer, WeightFit, WeightOptimizer,
    WeightStrategy,
};
