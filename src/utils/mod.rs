//! Utility functions and types

pub mod data_loader;

pub use data_loader::{save_predictions, split_ids, split_target, DataLoader, TrainingData, PREDICTION_COLUMN};
