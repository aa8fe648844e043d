//! Request handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::info;

use super::error::{Result, ServerError};
use super::payload::PredictRequest;
use super::state::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "registry_dir": state.registry.root().display().to_string(),
        "model_uri": state.config.model_uri(),
        "model_loaded": state.loaded().await.is_some(),
    }))
}

pub async fn load_model(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let loaded = state.ensure_loaded().await?;
    let mut body = serde_json::to_value(&loaded.info).map_err(crate::error::EnsembleError::from)?;
    if let Value::Object(map) = &mut body {
        map.insert("loaded".to_string(), Value::Bool(true));
        map.insert(
            "weights".to_string(),
            serde_json::to_value(loaded.ensemble.weights()).map_err(crate::error::EnsembleError::from)?,
        );
    }
    Ok(Json(body))
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<Value>> {
    let x = request.into_frame()?;
    let loaded = state.ensure_loaded().await?;
    let n_rows = x.height();

    let model = Arc::clone(&loaded);
    let predictions = tokio::task::spawn_blocking(move || model.ensemble.predict(&x))
        .await
        .map_err(|e| ServerError::Internal(format!("prediction task failed: {}", e)))??;

    info!(rows = n_rows, uri = %loaded.info.uri, "Prediction served");
    Ok(Json(json!({
        "predictions": predictions.to_vec(),
        "model": loaded.info.model,
        "alias": loaded.info.alias,
        "version": loaded.info.version,
        "uri": loaded.info.uri,
    })))
}

pub async fn ready(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let loaded = state.ensure_loaded().await?;
    Ok(Json(json!({
        "message": "Model ready",
        "model": loaded.info.model,
        "alias": loaded.info.alias,
        "version": loaded.info.version,
        "uri": loaded.info.uri,
    })))
}
