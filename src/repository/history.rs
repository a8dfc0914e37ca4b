//! Append-only ticket change log.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{DbPool, DieselError};
use super::records::{HistoryRecord, NewHistoryRecord};
use crate::models::TicketHistory;
use crate::schema::ticket_history;
use crate::with_conn;

#[derive(Clone)]
pub struct HistoryRepository {
    pool: DbPool,
}

impl HistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &TicketHistory) -> Result<(), DieselError> {
        let record = NewHistoryRecord::from(entry);
        with_conn!(self.pool, conn, {
            diesel::insert_into(ticket_history::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Change history for one ticket, newest first.
    pub async fn list(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        limit: u32,
    ) -> Result<Vec<TicketHistory>, DieselError> {
        with_conn!(self.pool, conn, {
            ticket_history::table
                .filter(ticket_history::ticket_id.eq(ticket_id))
                .filter(ticket_history::tenant_id.eq(tenant_id))
                .order(ticket_history::recorded_at.desc())
                .limit(limit as i64)
                .load::<HistoryRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(TicketHistory::try_from).collect())
        })
    }
}
