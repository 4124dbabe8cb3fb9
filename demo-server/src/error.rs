use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cluster_client::ClusterError;
use serde_json::json;
use thiserror::Error;

/// HTTP-facing error
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl ApiError {
    /// Convert to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            // The store answered, but with an error
            ApiError::Cluster(ClusterError::Server(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Cluster(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
