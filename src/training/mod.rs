//! Model training module
//!
//! Provides the base estimators of the ensemble and the tools to evaluate them:
//! - ElasticNet linear regression
//! - Regression trees and gradient boosting
//! - Preprocessor + estimator pipelines
//! - K-fold cross-validation splitting
//! - Regression metrics

mod models;
mod pipeline;
pub mod cross_validation;
pub mod decision_tree;
pub mod gradient_boosting;
pub mod linear_models;
pub mod metrics;

pub use cross_validation::{CVSplit, CrossValidator};
pub use decision_tree::{DecisionTree, TreeNode};
pub use gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
pub use linear_models::{ElasticNetConfig, ElasticNetRegression};
pub use models::{ModelMetrics, Regressor};
pub use pipeline::ModelPipeline;
