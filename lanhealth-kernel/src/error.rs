use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Erreurs renvoyées par l'API, chacune terminale pour la requête.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid API key")]
    Unauthorized,
    #[error("{0}")]
    Validation(String),
    #[error("No data yet for this device_id")]
    NotFound,
    #[error("Device data is stale ({age_seconds}s old)")]
    Stale { age_seconds: i64 },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Stale { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "detail": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
