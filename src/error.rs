//! Service error taxonomy and HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Ingestion lock not acquired; another run owns the tenant.
    #[error("ingestion already running for tenant {tenant_id}")]
    Conflict {
        tenant_id: String,
        job_id: Option<String>,
    },

    #[error("{0} not found")]
    NotFound(String),

    /// External source failed beyond the retry budget.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Malformed payload from the external source.
    #[error("data error: {0}")]
    Data(String),

    /// Ingestion aborted because the lock lease was lost mid-run.
    #[error("lock lease lost for {0}")]
    LeaseLost(String),

    #[error("database error: {0}")]
    Store(#[from] diesel::result::Error),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match &self {
            ServiceError::Conflict { tenant_id, job_id } => {
                let body = json!({
                    "detail": self.to_string(),
                    "tenant_id": tenant_id,
                    "job_id": job_id,
                });
                (StatusCode::CONFLICT, Json(body)).into_response()
            }
            ServiceError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": self.to_string() })),
            )
                .into_response(),
            ServiceError::Upstream(_) | ServiceError::Data(_) | ServiceError::LeaseLost(_) => {
                tracing::error!("request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": self.to_string() })),
                )
                    .into_response()
            }
            ServiceError::Store(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}
