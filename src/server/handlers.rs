//! Endpoint handlers.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, OpenApi, ToSchema};

use super::AppState;
use crate::analytics::{AtRiskCustomer, HourlyBucket, TenantStats};
use crate::breaker::{BreakerState, BreakerStatus};
use crate::error::ServiceError;
use crate::ingest::RunReport;
use crate::models::{IngestionJob, JobStatus, LockInfo, Sentiment, Ticket, Urgency};
use crate::rate_limit::RateLimiterStatus;
use crate::repository::ticket::TicketFilter;

/// Hard ceiling for the stats pipeline; anything slower is a gateway
/// timeout.
const STATS_BUDGET: Duration = Duration::from_secs(2);

#[derive(OpenApi)]
#[openapi(
    info(title = "ticketflow", description = "Support-ticket ingestion and analytics"),
    paths(
        run_ingestion,
        ingestion_status,
        job_progress,
        cancel_job,
        lock_status,
        list_tickets,
        urgent_tickets,
        get_ticket,
        ticket_history,
        tenant_stats,
        health,
        circuit_status,
        circuit_reset,
        rate_limiter_status,
    ),
    components(schemas(
        Ticket,
        Urgency,
        Sentiment,
        IngestionJob,
        JobStatus,
        RunReport,
        TenantStats,
        HourlyBucket,
        AtRiskCustomer,
        BreakerStatus,
        BreakerState,
        RateLimiterStatus,
        LockInfo,
        TicketListResponse,
    ))
)]
pub struct ApiDoc;

#[derive(Debug, Deserialize, IntoParams)]
pub struct TenantQuery {
    pub tenant_id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TicketListParams {
    pub tenant_id: String,
    pub status: Option<String>,
    pub urgency: Option<String>,
    pub source: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryParams {
    pub tenant_id: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatsParams {
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TicketListResponse {
    pub tickets: Vec<Ticket>,
}

/// Trigger an ingestion run for a tenant and wait for its counters.
#[utoipa::path(
    post,
    path = "/ingest/run",
    params(TenantQuery),
    responses(
        (status = 200, description = "Run finished", body = RunReport),
        (status = 409, description = "Another run holds the tenant's lock")
    ),
    tag = "Ingestion"
)]
pub async fn run_ingestion(
    State(state): State<AppState>,
    Query(params): Query<TenantQuery>,
) -> Result<Json<RunReport>, ServiceError> {
    let report = state.orchestrator.run(&params.tenant_id).await?;
    Ok(Json(report))
}

/// Current ingestion state for a tenant.
#[utoipa::path(
    get,
    path = "/ingest/status",
    params(TenantQuery),
    responses((status = 200, description = "Running job or idle marker")),
    tag = "Ingestion"
)]
pub async fn ingestion_status(
    State(state): State<AppState>,
    Query(params): Query<TenantQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let body = match state.orchestrator.tenant_status(&params.tenant_id).await? {
        Some(job) => json!({
            "running": true,
            "tenant_id": params.tenant_id,
            "job_id": job.job_id,
            "progress": job.progress,
            "started_at": job.started_at,
        }),
        None => json!({ "running": false, "tenant_id": params.tenant_id }),
    };
    Ok(Json(body))
}

/// Progress of one ingestion job.
#[utoipa::path(
    get,
    path = "/ingest/progress/{job_id}",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job progress", body = IngestionJob),
        (status = 404, description = "Unknown job")
    ),
    tag = "Ingestion"
)]
pub async fn job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<IngestionJob>, ServiceError> {
    state
        .orchestrator
        .job_status(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("job {job_id}")))
}

/// Request cancellation of a running job. Takes effect at the next page
/// boundary; already-ingested tickets are kept.
#[utoipa::path(
    delete,
    path = "/ingest/{job_id}",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Cancellation flagged"),
        (status = 404, description = "Unknown or already finished job")
    ),
    tag = "Ingestion"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    state.orchestrator.cancel(&job_id).await?;
    Ok(Json(json!({ "status": "cancelled", "job_id": job_id })))
}

/// Inspect the ingestion lock for a tenant.
#[utoipa::path(
    get,
    path = "/ingest/lock/{tenant_id}",
    params(("tenant_id" = String, Path, description = "Tenant id")),
    responses((status = 200, description = "Lock state", body = LockInfo)),
    tag = "Ingestion"
)]
pub async fn lock_status(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let resource = format!("ingest:{tenant_id}");
    let body = match state.locks.status(&resource).await? {
        Some(info) => {
            let mut value = serde_json::to_value(&info).unwrap_or_default();
            value["locked"] = json!(!info.is_expired);
            value
        }
        None => json!({ "locked": false, "tenant_id": tenant_id }),
    };
    Ok(Json(body))
}

/// Paged ticket listing for a tenant. Soft-deleted tickets never appear.
#[utoipa::path(
    get,
    path = "/tickets",
    params(TicketListParams),
    responses((status = 200, description = "Tickets", body = TicketListResponse)),
    tag = "Tickets"
)]
pub async fn list_tickets(
    State(state): State<AppState>,
    Query(params): Query<TicketListParams>,
) -> Result<Json<TicketListResponse>, ServiceError> {
    let filter = TicketFilter {
        status: params.status,
        urgency: params.urgency,
        source: params.source,
    };
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);

    let tickets = state
        .tickets
        .list(&params.tenant_id, &filter, page, page_size)
        .await?;
    Ok(Json(TicketListResponse { tickets }))
}

/// High-urgency tickets for a tenant, newest first.
#[utoipa::path(
    get,
    path = "/tickets/urgent",
    params(TenantQuery),
    responses((status = 200, description = "High-urgency tickets", body = TicketListResponse)),
    tag = "Tickets"
)]
pub async fn urgent_tickets(
    State(state): State<AppState>,
    Query(params): Query<TenantQuery>,
) -> Result<Json<TicketListResponse>, ServiceError> {
    let tickets = state.tickets.list_urgent(&params.tenant_id, 100).await?;
    Ok(Json(TicketListResponse { tickets }))
}

/// Single ticket lookup.
#[utoipa::path(
    get,
    path = "/tickets/{external_id}",
    params(
        ("external_id" = String, Path, description = "External ticket id"),
        TenantQuery,
    ),
    responses(
        (status = 200, description = "Ticket", body = Ticket),
        (status = 404, description = "Unknown or deleted ticket")
    ),
    tag = "Tickets"
)]
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Query(params): Query<TenantQuery>,
) -> Result<Json<Ticket>, ServiceError> {
    state
        .tickets
        .get_active(&params.tenant_id, &external_id)
        .await?
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("ticket {external_id}")))
}

/// Change history for a ticket, newest first.
#[utoipa::path(
    get,
    path = "/tickets/{external_id}/history",
    params(
        ("external_id" = String, Path, description = "External ticket id"),
        HistoryParams,
    ),
    responses((status = 200, description = "History rows")),
    tag = "Tickets"
)]
pub async fn ticket_history(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let history = state
        .history
        .list(&params.tenant_id, &external_id, limit)
        .await?;
    Ok(Json(json!({ "ticket_id": external_id, "history": history })))
}

/// Dashboard analytics for a tenant.
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/stats",
    params(
        ("tenant_id" = String, Path, description = "Tenant id"),
        StatsParams,
    ),
    responses(
        (status = 200, description = "Dashboard metrics", body = TenantStats),
        (status = 504, description = "Pipeline exceeded the 2s budget")
    ),
    tag = "Analytics"
)]
pub async fn tenant_stats(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Response, ServiceError> {
    let stats = tokio::time::timeout(
        STATS_BUDGET,
        state
            .analytics
            .tenant_stats(&tenant_id, params.from_date, params.to_date),
    )
    .await;

    match stats {
        Ok(stats) => Ok(Json(stats?).into_response()),
        Err(_) => Ok((
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({ "detail": "stats aggregation exceeded the 2s budget" })),
        )
            .into_response()),
    }
}

/// Dependency health. 503 unless both the store and the external source
/// answer within the probe timeout.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "All dependencies healthy"),
        (status = 503, description = "At least one dependency down")
    ),
    tag = "Operations"
)]
pub async fn health(State(state): State<AppState>) -> Response {
    let mut healthy = true;
    let mut dependencies = serde_json::Map::new();

    let store = tokio::time::timeout(state.probe_timeout, state.pool.ping()).await;
    dependencies.insert(
        "store".to_string(),
        match store {
            Ok(Ok(())) => json!("healthy"),
            Ok(Err(e)) => {
                healthy = false;
                json!(format!("unhealthy: {e}"))
            }
            Err(_) => {
                healthy = false;
                json!("unhealthy: timed out")
            }
        },
    );

    let source = tokio::time::timeout(state.probe_timeout, state.source.probe()).await;
    dependencies.insert(
        "external_source".to_string(),
        match source {
            Ok(Ok(())) => json!("healthy"),
            Ok(Err(e)) => {
                healthy = false;
                json!(format!("unhealthy: {e}"))
            }
            Err(_) => {
                healthy = false;
                json!("unhealthy: timed out")
            }
        },
    );

    let status = if healthy { "ok" } else { "degraded" };
    let body = json!({ "status": status, "dependencies": dependencies });
    if healthy {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

/// Circuit breaker state.
#[utoipa::path(
    get,
    path = "/circuit/{name}/status",
    params(("name" = String, Path, description = "Breaker name")),
    responses((status = 200, description = "Breaker status", body = BreakerStatus)),
    tag = "Operations"
)]
pub async fn circuit_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<BreakerStatus> {
    Json(state.breakers.get(&name).status())
}

/// Force a breaker back to CLOSED.
#[utoipa::path(
    post,
    path = "/circuit/{name}/reset",
    params(("name" = String, Path, description = "Breaker name")),
    responses((status = 200, description = "Breaker reset")),
    tag = "Operations"
)]
pub async fn circuit_reset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<serde_json::Value> {
    state.breakers.get(&name).reset();
    Json(json!({ "status": "reset", "name": name }))
}

/// Outbound rate limiter usage.
#[utoipa::path(
    get,
    path = "/rate-limiter/status",
    responses((status = 200, description = "Limiter usage", body = RateLimiterStatus)),
    tag = "Operations"
)]
pub async fn rate_limiter_status(State(state): State<AppState>) -> Json<RateLimiterStatus> {
    Json(state.limiter.status().await)
}

/// Generated OpenAPI document.
pub async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
