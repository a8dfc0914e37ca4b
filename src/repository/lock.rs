//! Distributed lock manager.
//!
//! Mutual exclusion keyed by resource name, backed by the unique
//! `resource_id` row. All three operations are non-blocking and O(1); the
//! single upsert in [`LockRepository::acquire`] is the only serialization
//! point, so a lost race yields a clean `false` rather than a duplicate
//! lock.

use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::format_timestamp;
use super::pool::{DbPool, DieselError};
use super::records::LockRecord;
use super::parse_timestamp;
use crate::models::LockInfo;
use crate::schema::distributed_locks;
use crate::{with_conn, with_conn_split};

/// Insert the lock row, or take over an expired one. The conflict-update
/// WHERE clause makes takeover atomic: a live lease leaves zero rows
/// affected.
const ACQUIRE_SQLITE: &str = "\
INSERT INTO distributed_locks (resource_id, owner_id, acquired_at, expires_at) \
VALUES (?, ?, ?, ?) \
ON CONFLICT (resource_id) DO UPDATE SET \
    owner_id = excluded.owner_id, \
    acquired_at = excluded.acquired_at, \
    expires_at = excluded.expires_at \
WHERE distributed_locks.expires_at < excluded.acquired_at";

#[cfg(feature = "postgres")]
const ACQUIRE_POSTGRES: &str = "\
INSERT INTO distributed_locks (resource_id, owner_id, acquired_at, expires_at) \
VALUES ($1, $2, $3, $4) \
ON CONFLICT (resource_id) DO UPDATE SET \
    owner_id = excluded.owner_id, \
    acquired_at = excluded.acquired_at, \
    expires_at = excluded.expires_at \
WHERE distributed_locks.expires_at < excluded.acquired_at";

#[derive(Clone)]
pub struct LockRepository {
    pool: DbPool,
}

impl LockRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Try to take the lock for `owner_id` with the given TTL.
    ///
    /// Returns `true` when this owner now holds the lease. Callers must
    /// treat `false` as a conflict; there is no queue or fairness.
    pub async fn acquire(
        &self,
        resource_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, DieselError> {
        let now = Utc::now();
        let acquired_at = format_timestamp(now);
        let expires_at = format_timestamp(now + chrono::Duration::from_std(ttl).unwrap_or_default());

        let rows = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(ACQUIRE_SQLITE)
                    .bind::<diesel::sql_types::Text, _>(resource_id)
                    .bind::<diesel::sql_types::Text, _>(owner_id)
                    .bind::<diesel::sql_types::Text, _>(&acquired_at)
                    .bind::<diesel::sql_types::Text, _>(&expires_at)
                    .execute(&mut conn)
                    .await?
            },
            postgres: conn => {
                diesel::sql_query(ACQUIRE_POSTGRES)
                    .bind::<diesel::sql_types::Text, _>(resource_id)
                    .bind::<diesel::sql_types::Text, _>(owner_id)
                    .bind::<diesel::sql_types::Text, _>(&acquired_at)
                    .bind::<diesel::sql_types::Text, _>(&expires_at)
                    .execute(&mut conn)
                    .await?
            }
        );

        Ok(rows > 0)
    }

    /// Extend the lease iff `owner_id` still holds it. A `false` return
    /// means the lease was lost; the caller must abandon its work.
    pub async fn refresh(
        &self,
        resource_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, DieselError> {
        let expires_at =
            format_timestamp(Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default());
        let rows = with_conn!(self.pool, conn, {
            diesel::update(
                distributed_locks::table
                    .find(resource_id)
                    .filter(distributed_locks::owner_id.eq(owner_id)),
            )
            .set(distributed_locks::expires_at.eq(&expires_at))
            .execute(&mut conn)
            .await
        })?;
        Ok(rows > 0)
    }

    /// Drop the lock iff `owner_id` holds it. Idempotent.
    pub async fn release(&self, resource_id: &str, owner_id: &str) -> Result<bool, DieselError> {
        let rows = with_conn!(self.pool, conn, {
            diesel::delete(
                distributed_locks::table
                    .find(resource_id)
                    .filter(distributed_locks::owner_id.eq(owner_id)),
            )
            .execute(&mut conn)
            .await
        })?;
        Ok(rows > 0)
    }

    /// Inspect the lock row for a resource.
    pub async fn status(&self, resource_id: &str) -> Result<Option<LockInfo>, DieselError> {
        let record = with_conn!(self.pool, conn, {
            distributed_locks::table
                .find(resource_id)
                .first::<LockRecord>(&mut conn)
                .await
                .optional()
        })?;

        Ok(record.map(|r| {
            let expires_at = parse_timestamp(&r.expires_at);
            LockInfo {
                resource_id: r.resource_id,
                owner_id: r.owner_id,
                acquired_at: parse_timestamp(&r.acquired_at),
                expires_at,
                is_expired: Utc::now() > expires_at,
            }
        }))
    }

    /// Remove all expired lock rows. Operator helper; correctness never
    /// depends on it because expired rows are reclaimable in place.
    pub async fn cleanup_expired(&self) -> Result<usize, DieselError> {
        let now = format_timestamp(Utc::now());
        with_conn!(self.pool, conn, {
            diesel::delete(distributed_locks::table.filter(distributed_locks::expires_at.lt(&now)))
                .execute(&mut conn)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::init::provision_schema;
    use tempfile::tempdir;

    const TTL: Duration = Duration::from_secs(60);

    async fn setup() -> (LockRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_url(dir.path().join("test.db").to_str().unwrap(), 1).unwrap();
        provision_schema(&pool).await.unwrap();
        (LockRepository::new(pool), dir)
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let (repo, _dir) = setup().await;

        assert!(repo.acquire("ingest:t1", "job-a", TTL).await.unwrap());
        assert!(!repo.acquire("ingest:t1", "job-b", TTL).await.unwrap());

        // Different resources do not contend
        assert!(repo.acquire("ingest:t2", "job-b", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over() {
        let (repo, _dir) = setup().await;

        assert!(repo
            .acquire("ingest:t1", "job-a", Duration::ZERO)
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(repo.acquire("ingest:t1", "job-b", TTL).await.unwrap());

        let info = repo.status("ingest:t1").await.unwrap().unwrap();
        assert_eq!(info.owner_id, "job-b");
        assert!(!info.is_expired);
    }

    #[tokio::test]
    async fn refresh_requires_ownership() {
        let (repo, _dir) = setup().await;
        repo.acquire("ingest:t1", "job-a", TTL).await.unwrap();

        assert!(repo.refresh("ingest:t1", "job-a", TTL).await.unwrap());
        assert!(!repo.refresh("ingest:t1", "job-b", TTL).await.unwrap());
        assert!(!repo.refresh("ingest:t9", "job-a", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_ownership_and_is_idempotent() {
        let (repo, _dir) = setup().await;
        repo.acquire("ingest:t1", "job-a", TTL).await.unwrap();

        assert!(!repo.release("ingest:t1", "job-b").await.unwrap());
        assert!(repo.status("ingest:t1").await.unwrap().is_some());

        assert!(repo.release("ingest:t1", "job-a").await.unwrap());
        assert!(!repo.release("ingest:t1", "job-a").await.unwrap());
        assert!(repo.status("ingest:t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_drops_only_expired_rows() {
        let (repo, _dir) = setup().await;
        repo.acquire("ingest:t1", "job-a", Duration::ZERO)
            .await
            .unwrap();
        repo.acquire("ingest:t2", "job-b", TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let removed = repo.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.status("ingest:t1").await.unwrap().is_none());
        assert!(repo.status("ingest:t2").await.unwrap().is_some());
    }
}
