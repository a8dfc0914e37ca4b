//! Ingestion job rows and the append-only audit log.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::format_timestamp;
use super::pool::{DbPool, DieselError};
use super::records::{JobRecord, LogRecord, NewLogRecord};
use crate::models::{IngestionJob, IngestionLog, JobStatus};
use crate::schema::{ingestion_jobs, ingestion_logs};
use crate::with_conn;

#[derive(Clone)]
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, job: &IngestionJob) -> Result<(), DieselError> {
        let record = JobRecord::from(job);
        with_conn!(self.pool, conn, {
            diesel::insert_into(ingestion_jobs::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<IngestionJob>, DieselError> {
        with_conn!(self.pool, conn, {
            ingestion_jobs::table
                .find(job_id)
                .first::<JobRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(IngestionJob::try_from).transpose())
        })
    }

    /// Latest running job for a tenant, if any.
    pub async fn running_for_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<IngestionJob>, DieselError> {
        with_conn!(self.pool, conn, {
            ingestion_jobs::table
                .filter(ingestion_jobs::tenant_id.eq(tenant_id))
                .filter(ingestion_jobs::status.eq(JobStatus::Running.as_str()))
                .order(ingestion_jobs::started_at.desc())
                .first::<JobRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(IngestionJob::try_from).transpose())
        })
    }

    /// Update page counters and progress while the job is running.
    pub async fn update_progress(
        &self,
        job_id: &str,
        total_pages: u32,
        processed_pages: u32,
        progress: u8,
    ) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::update(
                ingestion_jobs::table
                    .find(job_id)
                    .filter(ingestion_jobs::status.eq(JobStatus::Running.as_str())),
            )
            .set((
                ingestion_jobs::total_pages.eq(Some(total_pages as i32)),
                ingestion_jobs::processed_pages.eq(processed_pages as i32),
                ingestion_jobs::progress.eq(progress as i32),
            ))
            .execute(&mut conn)
            .await?;
            Ok(())
        })
    }

    /// Move a running job to a terminal state. Terminal rows are immutable;
    /// the running-status guard makes a second finalisation a no-op.
    pub async fn finalize(
        &self,
        job_id: &str,
        status: JobStatus,
        ended_at: DateTime<Utc>,
        progress: Option<u8>,
    ) -> Result<(), DieselError> {
        let ended = format_timestamp(ended_at);
        with_conn!(self.pool, conn, {
            let target = ingestion_jobs::table
                .find(job_id)
                .filter(ingestion_jobs::status.eq(JobStatus::Running.as_str()));
            match progress {
                Some(pct) => {
                    diesel::update(target)
                        .set((
                            ingestion_jobs::status.eq(status.as_str()),
                            ingestion_jobs::ended_at.eq(Some(&ended)),
                            ingestion_jobs::progress.eq(pct as i32),
                        ))
                        .execute(&mut conn)
                        .await?;
                }
                None => {
                    diesel::update(target)
                        .set((
                            ingestion_jobs::status.eq(status.as_str()),
                            ingestion_jobs::ended_at.eq(Some(&ended)),
                        ))
                        .execute(&mut conn)
                        .await?;
                }
            }
            Ok(())
        })
    }

    /// Append the run's audit row.
    pub async fn append_log(&self, log: &IngestionLog) -> Result<(), DieselError> {
        let record = NewLogRecord::from(log);
        with_conn!(self.pool, conn, {
            diesel::insert_into(ingestion_logs::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Audit rows for one job. Exactly one is expected per run.
    pub async fn logs_for_job(&self, job_id: &str) -> Result<Vec<IngestionLog>, DieselError> {
        with_conn!(self.pool, conn, {
            ingestion_logs::table
                .filter(ingestion_logs::job_id.eq(job_id))
                .order(ingestion_logs::id.asc())
                .load::<LogRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(IngestionLog::try_from).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogStatus;
    use crate::repository::init::provision_schema;
    use tempfile::tempdir;

    async fn setup() -> (JobRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_url(dir.path().join("test.db").to_str().unwrap(), 1).unwrap();
        provision_schema(&pool).await.unwrap();
        (JobRepository::new(pool), dir)
    }

    #[tokio::test]
    async fn job_lifecycle() {
        let (repo, _dir) = setup().await;
        let job = IngestionJob::new("job-1".to_string(), "t1".to_string());
        repo.insert(&job).await.unwrap();

        let running = repo.running_for_tenant("t1").await.unwrap().unwrap();
        assert_eq!(running.job_id, "job-1");

        repo.update_progress("job-1", 4, 2, 50).await.unwrap();
        let fetched = repo.get("job-1").await.unwrap().unwrap();
        assert_eq!(fetched.total_pages, Some(4));
        assert_eq!(fetched.processed_pages, 2);
        assert_eq!(fetched.progress, 50);

        repo.finalize("job-1", JobStatus::Completed, Utc::now(), Some(100))
            .await
            .unwrap();
        let done = repo.get("job-1").await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.ended_at.is_some());
        assert!(repo.running_for_tenant("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_jobs_are_immutable() {
        let (repo, _dir) = setup().await;
        let job = IngestionJob::new("job-1".to_string(), "t1".to_string());
        repo.insert(&job).await.unwrap();

        repo.finalize("job-1", JobStatus::Cancelled, Utc::now(), None)
            .await
            .unwrap();
        repo.finalize("job-1", JobStatus::Completed, Utc::now(), Some(100))
            .await
            .unwrap();
        repo.update_progress("job-1", 9, 9, 99).await.unwrap();

        let job = repo.get("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.processed_pages, 0);
    }

    #[tokio::test]
    async fn audit_log_round_trip() {
        let (repo, _dir) = setup().await;
        let log = IngestionLog {
            tenant_id: "t1".to_string(),
            job_id: "job-1".to_string(),
            status: LogStatus::PartialSuccess,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            new_ingested: 10,
            updated: 2,
            errors: 1,
            error: None,
        };
        repo.append_log(&log).await.unwrap();

        let rows = repo.logs_for_job("job-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, LogStatus::PartialSuccess);
        assert_eq!(rows[0].new_ingested, 10);
    }
}
