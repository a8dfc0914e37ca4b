//! Ingestion run tracking: jobs and the append-only audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle state of an ingestion job. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One ingestion run. At most one job per tenant is `running` at any
/// instant; that invariant is enforced by the distributed lock, not by the
/// store.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestionJob {
    pub job_id: String,
    pub tenant_id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Unknown until the first page response reports it.
    pub total_pages: Option<u32>,
    pub processed_pages: u32,
    /// 0-100, capped at 99 until the job reaches a terminal state.
    pub progress: u8,
}

impl IngestionJob {
    pub fn new(job_id: String, tenant_id: String) -> Self {
        Self {
            job_id,
            tenant_id,
            status: JobStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            total_pages: None,
            processed_pages: 0,
            progress: 0,
        }
    }

    /// Progress percentage for a non-terminal job.
    pub fn progress_pct(processed_pages: u32, total_pages: Option<u32>) -> u8 {
        let total = total_pages.unwrap_or(0).max(1);
        let pct = (100 * processed_pages) / total;
        pct.min(99) as u8
    }
}

/// Outcome recorded on the audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    /// Run completed but some tickets were skipped with errors.
    PartialSuccess,
    Cancelled,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial_success" => Some(Self::PartialSuccess),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Audit row written exactly once per run that acquired the lock,
/// regardless of how the run ended.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestionLog {
    pub tenant_id: String,
    pub job_id: String,
    pub status: LogStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub new_ingested: u32,
    pub updated: u32,
    pub errors: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
