//! Router configuration.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Ingestion lifecycle
        .route("/ingest/run", post(handlers::run_ingestion))
        .route("/ingest/status", get(handlers::ingestion_status))
        .route("/ingest/progress/:job_id", get(handlers::job_progress))
        .route("/ingest/lock/:tenant_id", get(handlers::lock_status))
        .route("/ingest/:job_id", delete(handlers::cancel_job))
        // Tickets
        .route("/tickets", get(handlers::list_tickets))
        .route("/tickets/urgent", get(handlers::urgent_tickets))
        .route("/tickets/:external_id", get(handlers::get_ticket))
        .route(
            "/tickets/:external_id/history",
            get(handlers::ticket_history),
        )
        // Analytics
        .route("/tenants/:tenant_id/stats", get(handlers::tenant_stats))
        // Operations
        .route("/health", get(handlers::health))
        .route("/circuit/:name/status", get(handlers::circuit_status))
        .route("/circuit/:name/reset", post(handlers::circuit_reset))
        .route("/rate-limiter/status", get(handlers::rate_limiter_status))
        // OpenAPI spec
        .route("/api/openapi.json", get(handlers::openapi_spec))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
