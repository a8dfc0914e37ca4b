//! Ingestion orchestrator: one run per tenant at a time.
//!
//! A run acquires the tenant's distributed lock before anything else (the
//! lock is the only serialization point; there is no pre-check of existing
//! jobs), then pages through the source, syncs each ticket, and finishes
//! with the deletion sweep. A background refresher keeps the lease alive;
//! losing it aborts the run. Teardown runs on every exit path and is the
//! only place the audit row is written, so a run that acquired the lock
//! always audits exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{IngestionJob, IngestionLog, JobStatus, LogStatus, Urgency};
use crate::notify::{NotificationTask, Notifier};
use crate::rate_limit::RateLimiter;
use crate::repository::{JobRepository, LockRepository};
use crate::source::{backoff_delay, ExternalTicket, SourceError, SourcePage, TicketSource};
use crate::sync::{SyncEngine, SyncOutcome};

const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Final counters for one run, returned to the caller of `/ingest/run`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunReport {
    pub job_id: String,
    pub status: JobStatus,
    pub new_ingested: u32,
    pub updated: u32,
    pub errors: u32,
}

#[derive(Default)]
struct RunTotals {
    new_ingested: u32,
    updated: u32,
    errors: u32,
    seen: HashSet<String>,
    /// min/max `created_at` observed this run; bounds the deletion sweep.
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

enum RunEnd {
    Completed,
    Cancelled,
}

pub struct IngestOrchestrator {
    jobs: JobRepository,
    locks: LockRepository,
    sync: SyncEngine,
    source: Arc<dyn TicketSource>,
    limiter: Arc<RateLimiter>,
    notifier: Arc<Notifier>,
    lock_ttl: Duration,
    refresh_interval: Duration,
    fetch_backoff_ms: u64,
    /// Cancellation flags for in-flight runs; entries live exactly as long
    /// as their job.
    flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl IngestOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: JobRepository,
        locks: LockRepository,
        sync: SyncEngine,
        source: Arc<dyn TicketSource>,
        limiter: Arc<RateLimiter>,
        notifier: Arc<Notifier>,
        lock_ttl: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            jobs,
            locks,
            sync,
            source,
            limiter,
            notifier,
            lock_ttl,
            refresh_interval,
            fetch_backoff_ms: 1_000,
            flags: RwLock::new(HashMap::new()),
        }
    }

    /// Shrink fetch backoff steps, for tests.
    pub fn with_fetch_backoff_ms(mut self, ms: u64) -> Self {
        self.fetch_backoff_ms = ms;
        self
    }

    /// Run one ingestion for a tenant, returning the final counters.
    ///
    /// Fails with [`ServiceError::Conflict`] when the tenant's lock is held;
    /// nothing is written in that case.
    pub async fn run(&self, tenant_id: &str) -> Result<RunReport, ServiceError> {
        let job_id = Uuid::new_v4().to_string();
        let resource = format!("ingest:{tenant_id}");

        if !self.locks.acquire(&resource, &job_id, self.lock_ttl).await? {
            let running = self.jobs.running_for_tenant(tenant_id).await?;
            return Err(ServiceError::Conflict {
                tenant_id: tenant_id.to_string(),
                job_id: running.map(|j| j.job_id),
            });
        }

        // Lock held: from here on, teardown must run no matter what.
        let job = IngestionJob::new(job_id.clone(), tenant_id.to_string());
        let cancel = Arc::new(AtomicBool::new(false));
        self.flags
            .write()
            .unwrap()
            .insert(job_id.clone(), cancel.clone());

        let lease_lost = Arc::new(AtomicBool::new(false));
        let refresher = self.spawn_lease_refresher(&resource, &job_id, lease_lost.clone());

        let mut totals = RunTotals::default();
        let outcome = self.execute(&job, &cancel, &lease_lost, &mut totals).await;

        self.teardown(&job, &resource, refresher, outcome, totals)
            .await
    }

    async fn execute(
        &self,
        job: &IngestionJob,
        cancel: &AtomicBool,
        lease_lost: &AtomicBool,
        totals: &mut RunTotals,
    ) -> Result<RunEnd, ServiceError> {
        self.jobs.insert(job).await?;
        tracing::info!(tenant_id = %job.tenant_id, job_id = %job.job_id, "ingestion started");

        let mut page = 1u32;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(RunEnd::Cancelled);
            }
            if lease_lost.load(Ordering::Relaxed) {
                return Err(ServiceError::LeaseLost(job.tenant_id.clone()));
            }

            let page_data = self.fetch_page_with_retry(&job.tenant_id, page).await?;
            let total_pages = page_data.total_pages.max(1);

            self.process_page(&job.tenant_id, &page_data, totals).await;

            let progress = IngestionJob::progress_pct(page, Some(total_pages));
            self.jobs
                .update_progress(&job.job_id, total_pages, page, progress)
                .await?;

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        if cancel.load(Ordering::Relaxed) {
            return Ok(RunEnd::Cancelled);
        }

        // Reconcile deletions inside the window this run actually saw.
        if let Some((start, end)) = totals.window {
            self.sync
                .sweep_deleted(&job.tenant_id, &totals.seen, start, end)
                .await?;
        }

        Ok(RunEnd::Completed)
    }

    async fn process_page(&self, tenant_id: &str, page: &SourcePage, totals: &mut RunTotals) {
        for raw in &page.tickets {
            let external = match ExternalTicket::parse(raw) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(tenant_id, "skipping malformed ticket: {}", e);
                    totals.errors += 1;
                    continue;
                }
            };

            totals.seen.insert(external.id.clone());
            totals.window = Some(match totals.window {
                None => (external.created_at, external.created_at),
                Some((start, end)) => {
                    (start.min(external.created_at), end.max(external.created_at))
                }
            });

            match self.sync.sync_ticket(tenant_id, &external).await {
                Ok((SyncOutcome::Created, ticket)) => {
                    totals.new_ingested += 1;
                    if ticket.urgency == Urgency::High {
                        self.enqueue_notification(&ticket.external_id, tenant_id);
                    }
                }
                Ok((SyncOutcome::Updated { .. }, ticket)) => {
                    totals.updated += 1;
                    if ticket.urgency == Urgency::High {
                        self.enqueue_notification(&ticket.external_id, tenant_id);
                    }
                }
                Ok((SyncOutcome::Unchanged, _)) => {}
                Err(e) => {
                    tracing::error!(tenant_id, external_id = %external.id, "ticket sync failed: {}", e);
                    totals.errors += 1;
                }
            }
        }
    }

    /// Fetch one page through the rate limiter.
    ///
    /// 429 waits for `Retry-After` (1 s fallback) and retries the same page
    /// without consuming the attempt budget. Transient failures get up to
    /// three attempts with exponential backoff; anything else fails the
    /// run.
    async fn fetch_page_with_retry(
        &self,
        tenant_id: &str,
        page: u32,
    ) -> Result<SourcePage, ServiceError> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;

            match self.source.fetch_page(tenant_id, page).await {
                Ok(data) => return Ok(data),
                Err(SourceError::RateLimited { retry_after }) => {
                    let wait = retry_after.unwrap_or(Duration::from_secs(1));
                    tracing::warn!(
                        tenant_id,
                        page,
                        wait_secs = wait.as_secs(),
                        "source rate limited, honouring Retry-After"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= MAX_FETCH_ATTEMPTS {
                        return Err(ServiceError::Upstream(e.to_string()));
                    }
                    let wait = backoff_delay(attempt - 1, self.fetch_backoff_ms);
                    tracing::warn!(
                        tenant_id,
                        page,
                        attempt,
                        "page fetch failed ({}), retrying in {:?}",
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(SourceError::Decode(e)) => return Err(ServiceError::Data(e)),
                Err(e) => return Err(ServiceError::Upstream(e.to_string())),
            }
        }
    }

    fn enqueue_notification(&self, external_id: &str, tenant_id: &str) {
        self.notifier.enqueue(NotificationTask {
            ticket_id: external_id.to_string(),
            tenant_id: tenant_id.to_string(),
            urgency: "high".to_string(),
            reason: "High urgency ticket detected".to_string(),
        });
    }

    fn spawn_lease_refresher(
        &self,
        resource: &str,
        owner: &str,
        lease_lost: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let locks = self.locks.clone();
        let interval = self.refresh_interval;
        let ttl = self.lock_ttl;
        let resource = resource.to_string();
        let owner = owner.to_string();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match locks.refresh(&resource, &owner, ttl).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::error!(%resource, %owner, "lock lease lost, aborting run");
                        lease_lost.store(true, Ordering::Relaxed);
                        break;
                    }
                    Err(e) => {
                        // Transient store trouble; the lease may still be
                        // live, so keep trying until the TTL decides.
                        tracing::warn!(%resource, "lease refresh errored: {}", e);
                    }
                }
            }
        })
    }

    /// Guaranteed-release scope: finalise the job, write the single audit
    /// row, release the lock, drop the cancellation flag.
    async fn teardown(
        &self,
        job: &IngestionJob,
        resource: &str,
        refresher: JoinHandle<()>,
        outcome: Result<RunEnd, ServiceError>,
        totals: RunTotals,
    ) -> Result<RunReport, ServiceError> {
        let ended_at = Utc::now();
        let (job_status, log_status, error) = match &outcome {
            Ok(RunEnd::Completed) if totals.errors > 0 => {
                (JobStatus::Completed, LogStatus::PartialSuccess, None)
            }
            Ok(RunEnd::Completed) => (JobStatus::Completed, LogStatus::Success, None),
            Ok(RunEnd::Cancelled) => (JobStatus::Cancelled, LogStatus::Cancelled, None),
            Err(e) => (JobStatus::Failed, LogStatus::Failed, Some(e.to_string())),
        };

        let progress = matches!(job_status, JobStatus::Completed).then_some(100);
        if let Err(e) = self
            .jobs
            .finalize(&job.job_id, job_status, ended_at, progress)
            .await
        {
            tracing::error!(job_id = %job.job_id, "failed to finalise job: {}", e);
        }

        let log = IngestionLog {
            tenant_id: job.tenant_id.clone(),
            job_id: job.job_id.clone(),
            status: log_status,
            started_at: job.started_at,
            ended_at,
            new_ingested: totals.new_ingested,
            updated: totals.updated,
            errors: totals.errors,
            error: error.clone(),
        };
        if let Err(e) = self.jobs.append_log(&log).await {
            tracing::error!(job_id = %job.job_id, "failed to write audit log: {}", e);
        }

        if let Err(e) = self.locks.release(resource, &job.job_id).await {
            tracing::error!(resource, "failed to release lock: {}", e);
        }
        refresher.abort();
        self.flags.write().unwrap().remove(&job.job_id);

        tracing::info!(
            tenant_id = %job.tenant_id,
            job_id = %job.job_id,
            status = job_status.as_str(),
            new_ingested = totals.new_ingested,
            updated = totals.updated,
            errors = totals.errors,
            "ingestion finished"
        );

        Ok(RunReport {
            job_id: job.job_id.clone(),
            status: job_status,
            new_ingested: totals.new_ingested,
            updated: totals.updated,
            errors: totals.errors,
        })
    }

    /// Request cancellation of a running job. Not preemptive: the run
    /// notices at the next page boundary. Idempotent.
    pub async fn cancel(&self, job_id: &str) -> Result<(), ServiceError> {
        match self.jobs.get(job_id).await? {
            Some(job) if job.status == JobStatus::Running => {
                if let Some(flag) = self.flags.read().unwrap().get(job_id) {
                    flag.store(true, Ordering::Relaxed);
                }
                Ok(())
            }
            _ => Err(ServiceError::NotFound(format!("running job {job_id}"))),
        }
    }

    pub async fn job_status(&self, job_id: &str) -> Result<Option<IngestionJob>, ServiceError> {
        Ok(self.jobs.get(job_id).await?)
    }

    pub async fn tenant_status(
        &self,
        tenant_id: &str,
    ) -> Result<Option<IngestionJob>, ServiceError> {
        Ok(self.jobs.running_for_tenant(tenant_id).await?)
    }
}
