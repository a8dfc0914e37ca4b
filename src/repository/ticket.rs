//! Ticket repository: idempotent upserts, tenant-scoped reads, soft delete.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{DbPool, DieselError};
use super::records::TicketRecord;
use super::format_timestamp;
use crate::models::Ticket;
use crate::schema::tickets;
use crate::with_conn;

/// Optional filters for the ticket listing endpoint.
#[derive(Debug, Default, Clone)]
pub struct TicketFilter {
    pub status: Option<String>,
    pub urgency: Option<String>,
    pub source: Option<String>,
}

#[derive(Clone)]
pub struct TicketRepository {
    pool: DbPool,
}

impl TicketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Look up a ticket regardless of soft-delete state. Used by the sync
    /// engine, which must see the stored copy even when it is deleted.
    pub async fn get_any(
        &self,
        tenant_id: &str,
        external_id: &str,
    ) -> Result<Option<Ticket>, DieselError> {
        with_conn!(self.pool, conn, {
            tickets::table
                .find((tenant_id, external_id))
                .first::<TicketRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(Ticket::try_from).transpose())
        })
    }

    /// Look up a ticket for the read API; soft-deleted rows are invisible.
    pub async fn get_active(
        &self,
        tenant_id: &str,
        external_id: &str,
    ) -> Result<Option<Ticket>, DieselError> {
        with_conn!(self.pool, conn, {
            tickets::table
                .find((tenant_id, external_id))
                .filter(tickets::deleted_at.is_null())
                .first::<TicketRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(Ticket::try_from).transpose())
        })
    }

    /// Insert or converge a ticket on its `(tenant_id, external_id)` key.
    ///
    /// Unique-key collisions from concurrent writers resolve through the
    /// conflict clause, so repeating the same input never creates a
    /// duplicate. `created_at` and `deleted_at` are only written on first
    /// insert; the sweep owns deletion.
    pub async fn upsert(&self, ticket: &Ticket) -> Result<(), DieselError> {
        let record = TicketRecord::from(ticket);
        with_conn!(self.pool, conn, {
            diesel::insert_into(tickets::table)
                .values(&record)
                .on_conflict((tickets::tenant_id, tickets::external_id))
                .do_update()
                .set((
                    tickets::customer_id.eq(&record.customer_id),
                    tickets::source.eq(&record.source),
                    tickets::subject.eq(&record.subject),
                    tickets::message.eq(&record.message),
                    tickets::status.eq(&record.status),
                    tickets::urgency.eq(&record.urgency),
                    tickets::sentiment.eq(&record.sentiment),
                    tickets::requires_action.eq(record.requires_action),
                    tickets::updated_at.eq(&record.updated_at),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Tenant-scoped paged listing, newest first, soft-deleted excluded.
    pub async fn list(
        &self,
        tenant_id: &str,
        filter: &TicketFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Ticket>, DieselError> {
        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        with_conn!(self.pool, conn, {
            let mut query = tickets::table
                .filter(tickets::tenant_id.eq(tenant_id))
                .filter(tickets::deleted_at.is_null())
                .into_boxed();

            if let Some(status) = &filter.status {
                query = query.filter(tickets::status.eq(status));
            }
            if let Some(urgency) = &filter.urgency {
                query = query.filter(tickets::urgency.eq(urgency));
            }
            if let Some(source) = &filter.source {
                query = query.filter(tickets::source.eq(source));
            }

            query
                .order(tickets::created_at.desc())
                .offset(offset)
                .limit(page_size as i64)
                .load::<TicketRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(Ticket::try_from).collect())
        })
    }

    /// High-urgency tickets for a tenant, newest first.
    pub async fn list_urgent(
        &self,
        tenant_id: &str,
        limit: u32,
    ) -> Result<Vec<Ticket>, DieselError> {
        with_conn!(self.pool, conn, {
            tickets::table
                .filter(tickets::tenant_id.eq(tenant_id))
                .filter(tickets::urgency.eq("high"))
                .filter(tickets::deleted_at.is_null())
                .order(tickets::created_at.desc())
                .limit(limit as i64)
                .load::<TicketRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(Ticket::try_from).collect())
        })
    }

    /// External ids of live tickets whose `created_at` falls in the window.
    /// Feeds the deletion sweep.
    pub async fn active_ids_in_window(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>, DieselError> {
        let from_s = format_timestamp(from);
        let to_s = format_timestamp(to);
        with_conn!(self.pool, conn, {
            tickets::table
                .filter(tickets::tenant_id.eq(tenant_id))
                .filter(tickets::deleted_at.is_null())
                .filter(tickets::created_at.ge(&from_s))
                .filter(tickets::created_at.le(&to_s))
                .select(tickets::external_id)
                .load::<String>(&mut conn)
                .await
        })
    }

    /// Soft-delete the given tickets if they are not already deleted.
    /// Returns how many rows were marked.
    pub async fn soft_delete(
        &self,
        tenant_id: &str,
        external_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize, DieselError> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        let deleted = format_timestamp(now);
        with_conn!(self.pool, conn, {
            diesel::update(
                tickets::table
                    .filter(tickets::tenant_id.eq(tenant_id))
                    .filter(tickets::external_id.eq_any(external_ids))
                    .filter(tickets::deleted_at.is_null()),
            )
            .set(tickets::deleted_at.eq(&deleted))
            .execute(&mut conn)
            .await
        })
    }

    /// Live ticket count for a tenant.
    pub async fn count_active(&self, tenant_id: &str) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            tickets::table
                .filter(tickets::tenant_id.eq(tenant_id))
                .filter(tickets::deleted_at.is_null())
                .count()
                .get_result(&mut conn)
                .await
        })
    }
}
