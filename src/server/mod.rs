//! HTTP serving boundary
//!
//! Serves a registered ensemble over a small JSON API. The model is
//! resolved from the local registry as `MODEL_NAME@MODEL_ALIAS`, loaded
//! once and cached in the application state.

mod api;
mod error;
mod handlers;
mod payload;
mod state;

pub use api::create_router;
pub use error::ServerError;
pub use payload::PredictRequest;
pub use state::{AppState, LoadedModel, ModelInfo};

use crate::tracking::CHAMPION;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Default registered model name
pub const DEFAULT_MODEL_NAME: &str = "elnet_gbt";

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub registry_dir: PathBuf,
    pub model_name: String,
    pub model_alias: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            registry_dir: std::env::var("REGISTRY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./registry")),
            model_name: std::env::var("MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL_NAME.to_string()),
            model_alias: std::env::var("MODEL_ALIAS").unwrap_or_else(|_| CHAMPION.to_string()),
        }
    }
}

impl ServerConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_registry_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.registry_dir = dir.into();
        self
    }

    pub fn with_model(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.model_name = name.into();
        self.model_alias = alias.into();
        self
    }

    /// `models:/<name>@<alias>`
    pub fn model_uri(&self) -> String {
        format!("models:/{}@{}", self.model_name, self.model_alias)
    }
}

/// Start the server with the given configuration
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let start_time = chrono::Utc::now();
    let state = Arc::new(AppState::new(config.clone()));
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        address = %addr,
        registry_dir = %config.registry_dir.display(),
        model_uri = %config.model_uri(),
        started_at = %start_time.to_rfc3339(),
        "Price ensemble server starting"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, pid = std::process::id(), "Server listening");

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl+c");
            return;
        }
        let uptime = chrono::Utc::now().signed_duration_since(start_time);
        info!(uptime_secs = uptime.num_seconds(), "Shutdown signal received, stopping server");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}
