//! Diesel record structs and their conversions to domain models.

use diesel::prelude::*;

use super::util::invalid_column;
use super::{format_timestamp, parse_timestamp, parse_timestamp_opt};
use crate::models::{
    HistoryAction, IngestionJob, IngestionLog, JobStatus, LogStatus, Sentiment, Ticket,
    TicketHistory, Urgency,
};
use crate::schema::{distributed_locks, ingestion_jobs, ingestion_logs, ticket_history, tickets};

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = tickets)]
pub struct TicketRecord {
    pub tenant_id: String,
    pub external_id: String,
    pub customer_id: String,
    pub source: String,
    pub subject: String,
    pub message: String,
    pub status: String,
    pub urgency: String,
    pub sentiment: String,
    pub requires_action: bool,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl From<&Ticket> for TicketRecord {
    fn from(t: &Ticket) -> Self {
        Self {
            tenant_id: t.tenant_id.clone(),
            external_id: t.external_id.clone(),
            customer_id: t.customer_id.clone(),
            source: t.source.clone(),
            subject: t.subject.clone(),
            message: t.message.clone(),
            status: t.status.clone(),
            urgency: t.urgency.as_str().to_string(),
            sentiment: t.sentiment.as_str().to_string(),
            requires_action: t.requires_action,
            created_at: format_timestamp(t.created_at),
            updated_at: format_timestamp(t.updated_at),
            deleted_at: t.deleted_at.map(format_timestamp),
        }
    }
}

impl TryFrom<TicketRecord> for Ticket {
    type Error = diesel::result::Error;

    fn try_from(r: TicketRecord) -> Result<Self, Self::Error> {
        let urgency =
            Urgency::parse(&r.urgency).ok_or_else(|| invalid_column("urgency", &r.urgency))?;
        let sentiment = Sentiment::parse(&r.sentiment)
            .ok_or_else(|| invalid_column("sentiment", &r.sentiment))?;

        Ok(Ticket {
            external_id: r.external_id,
            tenant_id: r.tenant_id,
            customer_id: r.customer_id,
            source: r.source,
            subject: r.subject,
            message: r.message,
            status: r.status,
            urgency,
            sentiment,
            requires_action: r.requires_action,
            created_at: parse_timestamp(&r.created_at),
            updated_at: parse_timestamp(&r.updated_at),
            deleted_at: parse_timestamp_opt(r.deleted_at),
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = ingestion_jobs)]
pub struct JobRecord {
    pub job_id: String,
    pub tenant_id: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub total_pages: Option<i32>,
    pub processed_pages: i32,
    pub progress: i32,
}

impl From<&IngestionJob> for JobRecord {
    fn from(j: &IngestionJob) -> Self {
        Self {
            job_id: j.job_id.clone(),
            tenant_id: j.tenant_id.clone(),
            status: j.status.as_str().to_string(),
            started_at: format_timestamp(j.started_at),
            ended_at: j.ended_at.map(format_timestamp),
            total_pages: j.total_pages.map(|p| p as i32),
            processed_pages: j.processed_pages as i32,
            progress: j.progress as i32,
        }
    }
}

impl TryFrom<JobRecord> for IngestionJob {
    type Error = diesel::result::Error;

    fn try_from(r: JobRecord) -> Result<Self, Self::Error> {
        let status =
            JobStatus::parse(&r.status).ok_or_else(|| invalid_column("status", &r.status))?;

        Ok(IngestionJob {
            job_id: r.job_id,
            tenant_id: r.tenant_id,
            status,
            started_at: parse_timestamp(&r.started_at),
            ended_at: parse_timestamp_opt(r.ended_at),
            total_pages: r.total_pages.map(|p| p.max(0) as u32),
            processed_pages: r.processed_pages.max(0) as u32,
            progress: r.progress.clamp(0, 100) as u8,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ingestion_logs)]
pub struct NewLogRecord {
    pub tenant_id: String,
    pub job_id: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: String,
    pub new_ingested: i32,
    pub updated: i32,
    pub errors: i32,
    pub error: Option<String>,
}

impl From<&IngestionLog> for NewLogRecord {
    fn from(l: &IngestionLog) -> Self {
        Self {
            tenant_id: l.tenant_id.clone(),
            job_id: l.job_id.clone(),
            status: l.status.as_str().to_string(),
            started_at: format_timestamp(l.started_at),
            ended_at: format_timestamp(l.ended_at),
            new_ingested: l.new_ingested as i32,
            updated: l.updated as i32,
            errors: l.errors as i32,
            error: l.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct LogRecord {
    pub id: i32,
    pub tenant_id: String,
    pub job_id: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: String,
    pub new_ingested: i32,
    pub updated: i32,
    pub errors: i32,
    pub error: Option<String>,
}

impl TryFrom<LogRecord> for IngestionLog {
    type Error = diesel::result::Error;

    fn try_from(r: LogRecord) -> Result<Self, Self::Error> {
        let status =
            LogStatus::parse(&r.status).ok_or_else(|| invalid_column("status", &r.status))?;

        Ok(IngestionLog {
            tenant_id: r.tenant_id,
            job_id: r.job_id,
            status,
            started_at: parse_timestamp(&r.started_at),
            ended_at: parse_timestamp(&r.ended_at),
            new_ingested: r.new_ingested.max(0) as u32,
            updated: r.updated.max(0) as u32,
            errors: r.errors.max(0) as u32,
            error: r.error,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ticket_history)]
pub struct NewHistoryRecord {
    pub ticket_id: String,
    pub tenant_id: String,
    pub action: String,
    pub changes: String,
    pub recorded_at: String,
}

impl From<&TicketHistory> for NewHistoryRecord {
    fn from(h: &TicketHistory) -> Self {
        Self {
            ticket_id: h.ticket_id.clone(),
            tenant_id: h.tenant_id.clone(),
            action: h.action.as_str().to_string(),
            changes: serde_json::to_string(&h.changes).unwrap_or_else(|_| "{}".to_string()),
            recorded_at: format_timestamp(h.recorded_at),
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct HistoryRecord {
    pub id: i32,
    pub ticket_id: String,
    pub tenant_id: String,
    pub action: String,
    pub changes: String,
    pub recorded_at: String,
}

impl TryFrom<HistoryRecord> for TicketHistory {
    type Error = diesel::result::Error;

    fn try_from(r: HistoryRecord) -> Result<Self, Self::Error> {
        let action =
            HistoryAction::parse(&r.action).ok_or_else(|| invalid_column("action", &r.action))?;
        let changes = serde_json::from_str(&r.changes)
            .map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))?;

        Ok(TicketHistory {
            ticket_id: r.ticket_id,
            tenant_id: r.tenant_id,
            action,
            changes,
            recorded_at: parse_timestamp(&r.recorded_at),
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = distributed_locks)]
pub struct LockRecord {
    pub resource_id: String,
    pub owner_id: String,
    pub acquired_at: String,
    pub expires_at: String,
}
