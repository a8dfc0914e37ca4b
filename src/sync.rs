//! Ticket synchronization: change detection, history, soft delete.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::classify::classify;
use crate::models::{FieldChange, HistoryAction, Ticket, TicketHistory};
use crate::repository::{DieselError, HistoryRepository, TicketRepository};
use crate::source::ExternalTicket;

/// What a sync did for one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated { changed: Vec<String> },
    Unchanged,
}

#[derive(Clone)]
pub struct SyncEngine {
    tickets: TicketRepository,
    history: HistoryRepository,
}

impl SyncEngine {
    pub fn new(tickets: TicketRepository, history: HistoryRepository) -> Self {
        Self { tickets, history }
    }

    /// Converge one external ticket into the store.
    ///
    /// Uses `updated_at` to decide whether anything happened upstream: an
    /// external copy that is not newer than the stored one is a no-op. A
    /// newer copy is re-classified, diffed field by field, and upserted;
    /// the diff lands in the history log. Returns the outcome together
    /// with the ticket as now stored.
    pub async fn sync_ticket(
        &self,
        tenant_id: &str,
        external: &ExternalTicket,
    ) -> Result<(SyncOutcome, Ticket), DieselError> {
        let classification = classify(&external.subject, &external.message);

        let stored = self.tickets.get_any(tenant_id, &external.id).await?;

        let Some(stored) = stored else {
            let ticket = Ticket {
                external_id: external.id.clone(),
                tenant_id: tenant_id.to_string(),
                customer_id: external.customer_id.clone(),
                source: external.source.clone(),
                subject: external.subject.clone(),
                message: external.message.clone(),
                status: external.status.clone(),
                urgency: classification.urgency,
                sentiment: classification.sentiment,
                requires_action: classification.requires_action,
                created_at: external.created_at,
                updated_at: external.updated_at,
                deleted_at: None,
            };
            self.tickets.upsert(&ticket).await?;
            self.record(tenant_id, &external.id, HistoryAction::Created, BTreeMap::new())
                .await?;
            return Ok((SyncOutcome::Created, ticket));
        };

        if external.updated_at <= stored.updated_at {
            return Ok((SyncOutcome::Unchanged, stored));
        }

        let incoming = Ticket {
            external_id: stored.external_id.clone(),
            tenant_id: stored.tenant_id.clone(),
            customer_id: external.customer_id.clone(),
            source: external.source.clone(),
            subject: external.subject.clone(),
            message: external.message.clone(),
            status: external.status.clone(),
            urgency: classification.urgency,
            sentiment: classification.sentiment,
            requires_action: classification.requires_action,
            created_at: stored.created_at,
            updated_at: external.updated_at,
            deleted_at: stored.deleted_at,
        };

        let changes = compute_changes(&stored, &incoming);
        self.tickets.upsert(&incoming).await?;

        if changes.is_empty() {
            // Timestamp moved but no tracked field did; converge quietly so
            // the next run short-circuits on updated_at.
            return Ok((SyncOutcome::Unchanged, incoming));
        }

        let changed: Vec<String> = changes.keys().cloned().collect();
        self.record(tenant_id, &external.id, HistoryAction::Updated, changes)
            .await?;
        Ok((SyncOutcome::Updated { changed }, incoming))
    }

    /// Soft-delete tickets that disappeared upstream.
    ///
    /// Scope is the `created_at` window actually fetched this run, so an
    /// upstream that pages over a window cannot cause false deletes
    /// outside it. Returns how many tickets were marked.
    pub async fn sweep_deleted(
        &self,
        tenant_id: &str,
        seen: &HashSet<String>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<usize, DieselError> {
        let candidates = self
            .tickets
            .active_ids_in_window(tenant_id, window_start, window_end)
            .await?;

        let missing: Vec<String> = candidates
            .into_iter()
            .filter(|id| !seen.contains(id))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let marked = self
            .tickets
            .soft_delete(tenant_id, &missing, Utc::now())
            .await?;
        for external_id in &missing {
            self.record(tenant_id, external_id, HistoryAction::Deleted, BTreeMap::new())
                .await?;
        }
        tracing::info!(tenant_id, marked, "soft-deleted tickets missing upstream");
        Ok(marked)
    }

    async fn record(
        &self,
        tenant_id: &str,
        external_id: &str,
        action: HistoryAction,
        changes: BTreeMap<String, FieldChange>,
    ) -> Result<(), DieselError> {
        self.history
            .append(&TicketHistory {
                ticket_id: external_id.to_string(),
                tenant_id: tenant_id.to_string(),
                action,
                changes,
                recorded_at: Utc::now(),
            })
            .await
    }
}

/// Field-level diff between the stored and incoming ticket over the
/// tracked field set.
fn compute_changes(old: &Ticket, new: &Ticket) -> BTreeMap<String, FieldChange> {
    let mut changes = BTreeMap::new();

    let mut diff = |field: &str, old_v: serde_json::Value, new_v: serde_json::Value| {
        if old_v != new_v {
            changes.insert(
                field.to_string(),
                FieldChange {
                    old: old_v,
                    new: new_v,
                },
            );
        }
    };

    diff("subject", old.subject.as_str().into(), new.subject.as_str().into());
    diff("message", old.message.as_str().into(), new.message.as_str().into());
    diff("status", old.status.as_str().into(), new.status.as_str().into());
    diff(
        "urgency",
        old.urgency.as_str().into(),
        new.urgency.as_str().into(),
    );
    diff(
        "sentiment",
        old.sentiment.as_str().into(),
        new.sentiment.as_str().into(),
    );
    diff(
        "requires_action",
        old.requires_action.into(),
        new.requires_action.into(),
    );
    diff(
        "customer_id",
        old.customer_id.as_str().into(),
        new.customer_id.as_str().into(),
    );
    diff("source", old.source.as_str().into(), new.source.as_str().into());

    changes
}
