//! Application state management

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::error::{Result, ServerError};
use super::ServerConfig;
use crate::ensemble::PriceEnsemble;
use crate::tracking::LocalRegistry;

/// Identity of the model being served
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ModelInfo {
    pub model: String,
    pub alias: String,
    pub version: Option<u32>,
    pub uri: String,
}

/// A loaded ensemble and where it came from
#[derive(Debug)]
pub struct LoadedModel {
    pub ensemble: PriceEnsemble,
    pub info: ModelInfo,
}

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    pub registry: LocalRegistry,
    model: RwLock<Option<Arc<LoadedModel>>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = LocalRegistry::open(&config.registry_dir);
        Self {
            config,
            registry,
            model: RwLock::new(None),
        }
    }

    /// State with an ensemble already in the slot
    pub fn with_model(config: ServerConfig, ensemble: PriceEnsemble) -> Self {
        let info = ModelInfo {
            model: config.model_name.clone(),
            alias: config.model_alias.clone(),
            version: None,
            uri: config.model_uri(),
        };
        let state = Self::new(config);
        Self {
            model: RwLock::new(Some(Arc::new(LoadedModel { ensemble, info }))),
            ..state
        }
    }

    pub async fn loaded(&self) -> Option<Arc<LoadedModel>> {
        self.model.read().await.clone()
    }

    /// Handle to the served model, loading it from the registry on first use
    pub async fn ensure_loaded(&self) -> Result<Arc<LoadedModel>> {
        if let Some(model) = self.loaded().await {
            return Ok(model);
        }

        let mut slot = self.model.write().await;
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        let name = self.config.model_name.clone();
        let alias = self.config.model_alias.clone();
        let registry = self.registry.clone();
        let (version, ensemble) = tokio::task::spawn_blocking(move || {
            let version = registry.resolve(&name, &alias)?;
            let ensemble: PriceEnsemble = registry.load_version(&name, version.version)?;
            Ok::<_, crate::error::EnsembleError>((version, ensemble))
        })
        .await
        .map_err(|e| ServerError::Internal(format!("model loading task failed: {}", e)))??;

        if !ensemble.pipeline_a().is_fitted() || !ensemble.pipeline_b().is_fitted() {
            return Err(ServerError::Unavailable(format!(
                "artifact for {} is not a fitted ensemble",
                self.config.model_uri()
            )));
        }

        let info = ModelInfo {
            model: self.config.model_name.clone(),
            alias: self.config.model_alias.clone(),
            version: Some(version.version),
            uri: self.config.model_uri(),
        };
        info!(uri = %info.uri, version = version.version, "Model loaded");

        let loaded = Arc::new(LoadedModel { ensemble, info });
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}
