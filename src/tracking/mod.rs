//! Model tracking
//!
//! A local, file-based registry of experiment runs and versioned models.
//! Versions are addressed by alias (`challenger`, `champion`).

mod registry;

pub use registry::{
    hash_config, Experiment, LocalRegistry, LoggedRun, ModelVersion, RegisteredModel,
    RegistryConfig, RunMetadata, RunRecord, CHALLENGER, CHAMPION,
};
