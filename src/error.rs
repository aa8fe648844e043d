//! Error types for the price ensemble

use thiserror::Error;

/// Result type alias for ensemble operations
pub type Result<T> = std::result::Result<T, EnsembleError>;

/// Main error type for training, inference and model bookkeeping
#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EnsembleError {
    /// Whether the error was caused by the caller's input rather than the
    /// service itself. The HTTP layer maps these to 4xx responses.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EnsembleError::ConfigError(_)
                | EnsembleError::ValidationError(_)
                | EnsembleError::SchemaMismatch(_)
                | EnsembleError::DataError(_)
                | EnsembleError::ShapeError { .. }
        )
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            EnsembleError::ConfigError(_) => "configuration",
            EnsembleError::ValidationError(_) => "validation",
            EnsembleError::SchemaMismatch(_) => "schema_mismatch",
            EnsembleError::ModelNotFitted => "not_fitted",
            EnsembleError::DataError(_) => "data",
            EnsembleError::PreprocessingError(_) => "preprocessing",
            EnsembleError::TrainingError(_) => "training",
            EnsembleError::ShapeError { .. } => "shape",
            EnsembleError::RegistryError(_) => "registry",
            EnsembleError::NotFound(_) => "not_found",
            EnsembleError::IoError(_) => "io",
            EnsembleError::SerializationError(_) => "serialization",
        }
    }
}

impl From<polars::error::PolarsError> for EnsembleError {
    fn from(err: polars::error::PolarsError) -> Self {
        EnsembleError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for EnsembleError {
    fn from(err: serde_json::Error) -> Self {
        EnsembleError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for EnsembleError {
    fn from(err: ndarray::ShapeError) -> Self {
        EnsembleError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EnsembleError::SchemaMismatch("missing column 'LotArea'".to_string());
        assert_eq!(err.to_string(), "Schema mismatch: missing column 'LotArea'");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EnsembleError = io_err.into();
        assert!(matches!(err, EnsembleError::IoError(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(EnsembleError::ConfigError("k".into()).is_client_error());
        assert!(EnsembleError::SchemaMismatch("x".into()).is_client_error());
        assert!(!EnsembleError::ModelNotFitted.is_client_error());
        assert_eq!(EnsembleError::ModelNotFitted.kind(), "not_fitted");
    }
}
