//! Store connection pool supporting SQLite and PostgreSQL.
//!
//! The backend is selected at runtime from the database URL. SQLite
//! connections are established on demand (test and single-node use);
//! PostgreSQL connections are pooled through deadpool behind the
//! `postgres` feature.

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::AsyncConnection;

#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::deadpool::Pool as DeadPool;
#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
#[cfg(feature = "postgres")]
use diesel_async::AsyncPgConnection;

use super::util::to_diesel_error;

/// Diesel error type alias used throughout the repository layer.
pub type DieselError = diesel::result::Error;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Pooled async PostgreSQL connection type.
#[cfg(feature = "postgres")]
pub type PgConn = diesel_async::pooled_connection::deadpool::Object<AsyncPgConnection>;

/// SQLite "pool": connections are cheap and created per operation.
#[derive(Clone)]
pub struct SqlitePool {
    database_url: String,
}

impl SqlitePool {
    pub fn new(database_url: &str) -> Self {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    pub async fn get(&self) -> Result<SqliteConn, DieselError> {
        use diesel_async::SimpleAsyncConnection;

        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)?;
        // Writers back off instead of failing fast with SQLITE_BUSY.
        conn.batch_execute("PRAGMA busy_timeout = 5000;").await?;
        Ok(conn)
    }
}

/// PostgreSQL connection pool.
#[cfg(feature = "postgres")]
#[derive(Clone)]
pub struct PgPool {
    pool: DeadPool<AsyncPgConnection>,
}

#[cfg(feature = "postgres")]
impl PgPool {
    pub fn new(database_url: &str, max_size: usize) -> Result<Self, DieselError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = DeadPool::builder(config)
            .max_size(max_size)
            .build()
            .map_err(to_diesel_error)?;
        Ok(Self { pool })
    }

    pub async fn get(&self) -> Result<PgConn, DieselError> {
        self.pool.get().await.map_err(to_diesel_error)
    }
}

/// Unified store pool.
#[derive(Clone)]
pub enum DbPool {
    Sqlite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl DbPool {
    /// Create a pool from a database URL.
    ///
    /// `postgres://` / `postgresql://` select PostgreSQL; everything else is
    /// treated as a SQLite path. `max_size` applies to PostgreSQL only.
    pub fn from_url(url: &str, max_size: usize) -> Result<Self, DieselError> {
        #[cfg(feature = "postgres")]
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(DbPool::Postgres(PgPool::new(url, max_size)?));
        }
        let _ = max_size;

        Ok(DbPool::Sqlite(SqlitePool::new(url)))
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(self, DbPool::Sqlite(_))
    }

    /// Verify the store is reachable. Used by `/health`.
    pub async fn ping(&self) -> Result<(), DieselError> {
        use diesel_async::RunQueryDsl;
        crate::with_conn!(self, conn, {
            diesel::sql_query("SELECT 1").execute(&mut conn).await?;
            Ok(())
        })
    }
}

/// Run a store operation on whichever backend the pool wraps.
///
/// The body is monomorphised per connection type, so the same Diesel DSL
/// runs against SQLite and PostgreSQL.
///
/// ```ignore
/// with_conn!(self.pool, conn, {
///     tickets::table.load::<TicketRecord>(&mut conn).await
/// })
/// ```
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident, $body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut $conn = pool.get().await?;
                $body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                let mut $conn = pool.get().await?;
                $body
            }
        }
    }};
}

/// Run store operations that need different SQL per backend
/// (placeholder syntax, SQL dialect differences).
#[macro_export]
macro_rules! with_conn_split {
    ($pool:expr, sqlite: $sqlite_conn:ident => $sqlite_body:expr, postgres: $pg_conn:ident => $pg_body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut $sqlite_conn = pool.get().await?;
                $sqlite_body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                let mut $pg_conn = pool.get().await?;
                $pg_body
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_detection() {
        assert!(DbPool::from_url("/tmp/db.sqlite", 10).unwrap().is_sqlite());
        assert!(DbPool::from_url("sqlite:/tmp/db", 10).unwrap().is_sqlite());

        #[cfg(feature = "postgres")]
        assert!(!DbPool::from_url("postgres://localhost/test", 10)
            .unwrap()
            .is_sqlite());
    }
}
