//! Price Ensemble - residential sale price prediction
//!
//! A two-model regression ensemble: an ElasticNet and a gradient-boosted
//! tree model, each behind its own preprocessing pipeline, blended with a
//! single convex weight chosen on out-of-fold predictions.
//!
//! # Modules
//!
//! ## Core
//! - [`preprocessing`] - Schema capture, imputation, power transform, one-hot encoding
//! - [`training`] - Base regressors, pipelines, k-fold splitting, metrics
//! - [`ensemble`] - Out-of-fold cross-fit, blend weight search, final fit and predict
//!
//! ## Services
//! - [`tracking`] - Local model registry with aliases
//! - [`server`] - HTTP server with REST API
//! - [`cli`] - Command-line interface
//!
//! ## Utilities
//! - [`utils`] - CSV loading and target/id splitting

// Core error handling
pub mod error;

// Core ML modules
pub mod preprocessing;
pub mod training;
pub mod ensemble;

// Model bookkeeping
pub mod tracking;

// Utilities
pub mod utils;

// Services
pub mod server;
pub mod cli;

pub use error::{EnsembleError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{EnsembleError, Result};

    // Preprocessing
    pub use crate::preprocessing::{
        DataPreprocessor, DefaultPreprocessorFactory, FeatureSchema, FeatureTransformer,
        PreprocessingConfig, PreprocessorFactory,
    };

    // Training
    pub use crate::training::{
        CrossValidator, ElasticNetConfig, ElasticNetRegression, GradientBoostingConfig,
        GradientBoostingRegressor, ModelPipeline, Regressor,
    };

    // Ensemble
    pub use crate::ensemble::{
        BlendWeights, BlendedEnsemble, CrossFitEngine, EnsembleConfig, EnsembleSummary,
        GridSearchOptimizer, LeastSquaresOptimizer, PriceEnsemble, PriceEnsembleConfig,
        TargetTransform, TrainedEnsemble, WeightOptimizer, WeightStrategy,
    };

    // Model registry
    pub use crate::tracking::{LocalRegistry, RegistryConfig, RunMetadata};

    // Data loading
    pub use crate::utils::{split_target, DataLoader};
}
