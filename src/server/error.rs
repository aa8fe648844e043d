//! Error types for the server

use crate::error::EnsembleError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Ensemble(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ServerError::Ensemble(EnsembleError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Ensemble(EnsembleError::ModelNotFitted) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Ensemble(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) => "bad_request",
            ServerError::Unavailable(_) => "unavailable",
            ServerError::Internal(_) => "internal",
            ServerError::Ensemble(e) => e.kind(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), detail = %self, "Request failed");
        } else {
            tracing::warn!(kind = self.kind(), detail = %self, "Request rejected");
        }

        let body = Json(json!({
            "error": true,
            "kind": self.kind(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
