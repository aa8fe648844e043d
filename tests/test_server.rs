//! Integration test: Server API endpoints

use axum::body::Body;
use axum::http::{Request, StatusCode};
use ndarray::Array1;
use polars::prelude::*;
use price_ensemble::ensemble::{EnsembleConfig, PriceEnsemble, PriceEnsembleConfig};
use price_ensemble::server::{create_router, AppState, ServerConfig};
use price_ensemble::tracking::{LocalRegistry, RunMetadata};
use price_ensemble::training::GradientBoostingConfig;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn house_data(n: usize) -> (DataFrame, Array1<f64>) {
    let streets = ["Pave", "Grvl"];
    let area: Vec<f64> = (0..n).map(|i| 900.0 + ((i * 211) % 1700) as f64).collect();
    let quality: Vec<f64> = (0..n).map(|i| (1 + (i * 3) % 10) as f64).collect();
    let street: Vec<&str> = (0..n).map(|i| streets[i % 2]).collect();
    let price: Vec<f64> = (0..n)
        .map(|i| (11.0 + 0.0003 * area[i] + 0.07 * quality[i] + 0.1 * (i % 2) as f64).exp())
        .collect();
    let df = df!(
        "GrLivArea" => &area,
        "OverallQual" => &quality,
        "Street" => &street,
    )
    .unwrap();
    (df, Array1::from_vec(price))
}

fn trained_model() -> PriceEnsemble {
    let (x, y) = house_data(36);
    let config = PriceEnsembleConfig {
        ensemble: EnsembleConfig::default().with_n_folds(3),
        gradient_boosting: GradientBoostingConfig::default().with_n_estimators(20),
        ..Default::default()
    };
    let mut trainer = config.trainer();
    trainer.fit(&x, &y).unwrap();
    trainer.into_trained().unwrap()
}

fn config_for(registry: &Path) -> ServerConfig {
    ServerConfig::default()
        .with_host("127.0.0.1")
        .with_port(0)
        .with_registry_dir(registry)
        .with_model("elnet_gbt", "champion")
}

fn app_with_model(model: PriceEnsemble) -> axum::Router {
    let dir = std::env::temp_dir().join("price-ensemble-unused-registry");
    create_router(Arc::new(AppState::with_model(config_for(&dir), model)))
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(Arc::new(AppState::new(config_for(dir.path()))));
    let (status, body) = send(app, get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_uri"], "models:/elnet_gbt@champion");
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn test_predict_with_records() {
    let model = trained_model();
    let (x, _) = house_data(36);
    let expected = model.predict(&x.head(Some(2))).unwrap();
    let app = app_with_model(model);

    let body = json!({
        "data": [
            {"GrLivArea": 900, "OverallQual": 1, "Street": "Pave"},
            {"GrLivArea": 1111, "OverallQual": 4, "Street": "Grvl"}
        ]
    });
    let (status, body) = send(app, post_json("/api/predict", body)).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let predictions: Vec<f64> = serde_json::from_value(body["predictions"].clone()).unwrap();
    assert_eq!(predictions.len(), 2);
    for (p, e) in predictions.iter().zip(expected.iter()) {
        assert!((p - e).abs() <= 1e-9 * e.abs());
    }
    assert_eq!(body["model"], "elnet_gbt");
}

#[tokio::test]
async fn test_predict_with_columns_and_rows() {
    let app = app_with_model(trained_model());
    let body = json!({
        "columns": ["GrLivArea", "OverallQual", "Street"],
        "rows": [[1500, 6, "Pave"], [2100, null, "Grvl"], [1800, 7, "Unseen"]]
    });
    let (status, body) = send(app, post_json("/api/predict", body)).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 3);
    assert!(predictions.iter().all(|p| p.as_f64().map_or(false, |v| v > 0.0)));
}

#[tokio::test]
async fn test_predict_bad_bodies() {
    let model = trained_model();
    let cases = [
        json!({}),
        json!({"rows": [[1500, 6, "Pave"]]}),
        json!({"data": [{"GrLivArea": 1500, "OverallQual": "six", "Street": "Pave"}]}),
        json!({"data": [{"GrLivArea": 1500, "Street": "Pave"}]}),
    ];
    for case in cases {
        let app = app_with_model(model.clone());
        let (status, body) = send(app, post_json("/api/predict", case.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} -> {}", case, body);
        assert_eq!(body["error"], true);
        assert!(body["kind"].is_string());
        assert!(body["message"].is_string());
    }
}

#[tokio::test]
async fn test_missing_model_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(Arc::new(AppState::new(config_for(dir.path()))));
    let (status, body) = send(app, get("/api/ready")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_load_from_registry() {
    let dir = tempfile::tempdir().unwrap();
    let registry = LocalRegistry::open(dir.path());
    let model = trained_model();
    let (_, version) = registry
        .log_and_register("house-prices", "run", "elnet_gbt", &model, RunMetadata::default())
        .unwrap();
    registry.promote("elnet_gbt", version).unwrap();

    let state = Arc::new(AppState::new(config_for(dir.path())));
    let app = create_router(Arc::clone(&state));

    let (status, body) = send(app.clone(), get("/api/load")).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["loaded"], true);
    assert_eq!(body["version"], 1);
    assert!(state.loaded().await.is_some());

    let (status, body) = send(app.clone(), post_json("/api/load", json!({}))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = send(app.clone(), get("/api/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Model ready");

    let (status, _) = send(
        app,
        post_json("/api/predict", json!({"data": [{"GrLivArea": 1500, "OverallQual": 6, "Street": "Pave"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route() {
    let app = app_with_model(trained_model());
    let (status, body) = send(app, get("/api/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], true);
}
