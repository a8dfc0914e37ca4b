//! HTTP boundary: shared state, router construction, and serving.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::analytics::AnalyticsService;
use crate::breaker::BreakerRegistry;
use crate::config::Settings;
use crate::ingest::IngestOrchestrator;
use crate::notify::Notifier;
use crate::rate_limit::RateLimiter;
use crate::repository::{
    init::provision_schema, DbPool, HistoryRepository, JobRepository, LockRepository,
    TicketRepository,
};
use crate::source::{HttpTicketSource, TicketSource};
use crate::sync::SyncEngine;

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub tickets: TicketRepository,
    pub history: HistoryRepository,
    pub jobs: JobRepository,
    pub locks: LockRepository,
    pub analytics: AnalyticsService,
    pub orchestrator: Arc<IngestOrchestrator>,
    pub limiter: Arc<RateLimiter>,
    pub breakers: BreakerRegistry,
    pub notifier: Arc<Notifier>,
    pub source: Arc<dyn TicketSource>,
    pub probe_timeout: std::time::Duration,
}

impl AppState {
    /// Build the full service graph against a live store. Provisions the
    /// schema and index set before returning.
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let pool = DbPool::from_url(&settings.database_url, settings.db_pool_max)?;
        provision_schema(&pool).await?;

        let source: Arc<dyn TicketSource> = Arc::new(HttpTicketSource::new(
            &settings.source_url,
            settings.fetch_timeout,
            settings.probe_timeout,
        ));
        Ok(Self::assemble(settings, pool, source))
    }

    /// Wire the components over an existing pool and source. Used by `new`
    /// and, with stub sources, by the test suites.
    pub fn assemble(settings: &Settings, pool: DbPool, source: Arc<dyn TicketSource>) -> Self {
        let tickets = TicketRepository::new(pool.clone());
        let history = HistoryRepository::new(pool.clone());
        let jobs = JobRepository::new(pool.clone());
        let locks = LockRepository::new(pool.clone());
        let analytics = AnalyticsService::new(pool.clone());

        let limiter = Arc::new(RateLimiter::new(settings.rate_limit, settings.rate_window));
        let breakers = BreakerRegistry::new();
        let notifier = Arc::new(Notifier::new(
            &settings.notify_url,
            breakers.get("notify"),
            limiter.clone(),
            settings.notify_timeout,
            settings.notify_queue,
            settings.notify_workers,
        ));

        let orchestrator = Arc::new(IngestOrchestrator::new(
            jobs.clone(),
            locks.clone(),
            SyncEngine::new(tickets.clone(), history.clone()),
            source.clone(),
            limiter.clone(),
            notifier.clone(),
            settings.lock_ttl,
            settings.lock_refresh_interval,
        ));

        Self {
            pool,
            tickets,
            history,
            jobs,
            locks,
            analytics,
            orchestrator,
            limiter,
            breakers,
            notifier,
            source,
            probe_timeout: settings.probe_timeout,
        }
    }
}

/// Start the server and run until ctrl-c, then drain the notifier.
pub async fn serve(settings: Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(&settings).await?;
    let notifier = state.notifier.clone();
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    notifier.shutdown().await;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::{SourceError, SourcePage};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::ServiceExt;

    /// Source stub: fixed pages, healthy probe.
    pub struct StubSource {
        pub pages: Vec<Vec<Value>>,
        pub healthy: bool,
    }

    #[async_trait]
    impl TicketSource for StubSource {
        async fn fetch_page(&self, _tenant: &str, page: u32) -> Result<SourcePage, SourceError> {
            self.pages
                .get(page.saturating_sub(1) as usize)
                .map(|tickets| SourcePage {
                    tickets: tickets.clone(),
                    page,
                    total_pages: self.pages.len().max(1) as u32,
                })
                .ok_or(SourceError::Status(404))
        }

        async fn probe(&self) -> Result<(), SourceError> {
            if self.healthy {
                Ok(())
            } else {
                Err(SourceError::Status(503))
            }
        }
    }

    pub async fn test_state(source: StubSource) -> (AppState, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let settings = Settings {
            database_url: dir.path().join("test.db").display().to_string(),
            ..Settings::from_env()
        };
        let pool = DbPool::from_url(&settings.database_url, 1).unwrap();
        provision_schema(&pool).await.unwrap();
        let state = AppState::assemble(&settings, pool, Arc::new(source));
        (state, dir)
    }

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    fn ticket_json(id: &str, subject: &str) -> Value {
        json!({
            "id": id,
            "customer_id": "c1",
            "source": "email",
            "subject": subject,
            "message": "body",
            "status": "open",
            "created_at": "2025-06-01T10:00:00Z",
            "updated_at": "2025-06-01T10:00:00Z",
        })
    }

    fn empty_source() -> StubSource {
        StubSource {
            pages: vec![vec![]],
            healthy: true,
        }
    }

    #[tokio::test]
    async fn ingest_run_returns_counters() {
        let (state, _dir) = test_state(StubSource {
            pages: vec![vec![ticket_json("a", "hello"), ticket_json("b", "urgent outage")]],
            healthy: true,
        })
        .await;
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/run?tenant_id=t1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["new_ingested"], 2);
        assert_eq!(json["updated"], 0);
        assert_eq!(json["errors"], 0);
        assert!(json["job_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn concurrent_runs_conflict_with_409() {
        let (state, _dir) = test_state(empty_source()).await;

        // Hold the tenant's lock as if another run were in flight
        state
            .locks
            .acquire("ingest:t1", "other-job", std::time::Duration::from_secs(60))
            .await
            .unwrap();

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/run?tenant_id=t1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn ticket_endpoints_serve_ingested_data() {
        let (state, _dir) = test_state(StubSource {
            pages: vec![vec![ticket_json("a", "hello"), ticket_json("b", "urgent outage")]],
            healthy: true,
        })
        .await;
        let app = create_router(state.clone());

        state.orchestrator.run("t1").await.unwrap();

        let (status, json) = get_json(app.clone(), "/tickets?tenant_id=t1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["tickets"].as_array().unwrap().len(), 2);

        let (status, json) = get_json(app.clone(), "/tickets/urgent?tenant_id=t1").await;
        assert_eq!(status, StatusCode::OK);
        let urgent = json["tickets"].as_array().unwrap();
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0]["external_id"], "b");

        let (status, json) = get_json(app.clone(), "/tickets/a?tenant_id=t1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["external_id"], "a");
        assert_eq!(json["urgency"], "low");

        let (status, _) = get_json(app.clone(), "/tickets/nope?tenant_id=t1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Tenant isolation
        let (status, _) = get_json(app.clone(), "/tickets/a?tenant_id=t2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = get_json(app, "/tickets/a/history?tenant_id=t1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
        assert_eq!(json["history"][0]["action"], "created");
    }

    #[tokio::test]
    async fn progress_and_status_endpoints() {
        let (state, _dir) = test_state(StubSource {
            pages: vec![vec![ticket_json("a", "hello")]],
            healthy: true,
        })
        .await;
        let app = create_router(state.clone());

        let report = state.orchestrator.run("t1").await.unwrap();

        let (status, json) =
            get_json(app.clone(), &format!("/ingest/progress/{}", report.job_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["progress"], 100);
        assert_eq!(json["total_pages"], 1);
        assert_eq!(json["processed_pages"], 1);

        let (status, _) = get_json(app.clone(), "/ingest/progress/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = get_json(app.clone(), "/ingest/status?tenant_id=t1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["running"], false);

        let (status, json) = get_json(app, "/ingest/lock/t1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["locked"], false);
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_404() {
        let (state, _dir) = test_state(empty_source()).await;
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/ingest/unknown-job")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_endpoint_returns_dashboard() {
        let (state, _dir) = test_state(StubSource {
            pages: vec![vec![ticket_json("a", "refund chargeback now")]],
            healthy: true,
        })
        .await;
        let app = create_router(state.clone());
        state.orchestrator.run("t1").await.unwrap();

        let (status, json) = get_json(app, "/tenants/t1/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_tickets"], 1);
        assert_eq!(json["urgency_high_ratio"], 1.0);
        assert!(json["by_status"]["open"].is_number());
    }

    #[tokio::test]
    async fn health_reflects_dependency_state() {
        let (state, _dir) = test_state(empty_source()).await;
        let app = create_router(state);
        let (status, json) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["dependencies"]["store"], "healthy");

        let (state, _dir) = test_state(StubSource {
            pages: vec![vec![]],
            healthy: false,
        })
        .await;
        let app = create_router(state);
        let (status, json) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "degraded");
    }

    #[tokio::test]
    async fn circuit_and_rate_limiter_endpoints() {
        let (state, _dir) = test_state(empty_source()).await;
        let app = create_router(state.clone());

        let (status, json) = get_json(app.clone(), "/circuit/notify/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "closed");
        assert_eq!(json["window_size"], 10);

        // Trip it, then reset through the API
        let breaker = state.breakers.get("notify");
        for _ in 0..10 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
        }
        let (_, json) = get_json(app.clone(), "/circuit/notify/status").await;
        assert_eq!(json["state"], "open");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/circuit/notify/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let (_, json) = get_json(app.clone(), "/circuit/notify/status").await;
        assert_eq!(json["state"], "closed");

        let (status, json) = get_json(app, "/rate-limiter/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["limit"], 60);
        assert_eq!(json["remaining"].as_i64().unwrap() + json["current_requests"].as_i64().unwrap(), 60);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let (state, _dir) = test_state(empty_source()).await;
        let app = create_router(state);
        let (status, json) = get_json(app, "/api/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["paths"]["/ingest/run"].is_object());
    }
}
