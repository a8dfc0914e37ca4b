//! Distributed lock inspection model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Snapshot of one lock row. An expired entry is logically free and
/// eligible for takeover by any acquirer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LockInfo {
    pub resource_id: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
}
