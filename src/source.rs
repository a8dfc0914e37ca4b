//! External ticket source client.
//!
//! The upstream serves paginated JSON (`{tickets, page, total_pages}`) and
//! may answer 429 with a `Retry-After` header. The orchestrator consumes it
//! through the [`TicketSource`] trait so tests can substitute scripted
//! sources.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Network(String),
    #[error("malformed page payload: {0}")]
    Decode(String),
}

impl SourceError {
    /// Transient failures are retried with backoff; everything else fails
    /// the run immediately. 429 is handled separately and is never treated
    /// as a failure.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Network(_) => true,
            SourceError::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

/// One page from the upstream. Tickets stay as raw JSON so a malformed
/// ticket only skips itself, not the page.
#[derive(Debug, Clone)]
pub struct SourcePage {
    pub tickets: Vec<serde_json::Value>,
    pub page: u32,
    pub total_pages: u32,
}

/// A ticket payload that passed validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalTicket {
    pub id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalTicket {
    /// Validate one raw ticket from a page.
    pub fn parse(value: &serde_json::Value) -> Result<Self, SourceError> {
        serde_json::from_value(value.clone()).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    tickets: Vec<serde_json::Value>,
    page: Option<u32>,
    total_pages: Option<u32>,
}

/// Paginated upstream the ingestion run pulls from.
#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Fetch one page for a tenant. Performs a single request; retry policy
    /// lives with the caller.
    async fn fetch_page(&self, tenant_id: &str, page: u32) -> Result<SourcePage, SourceError>;

    /// Cheap reachability probe for `/health`.
    async fn probe(&self) -> Result<(), SourceError>;
}

/// Production source over reqwest.
pub struct HttpTicketSource {
    client: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
}

impl HttpTicketSource {
    pub fn new(base_url: &str, fetch_timeout: Duration, probe_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .gzip(true)
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            base_url: base_url.to_string(),
            probe_timeout,
        }
    }

    /// Health endpoint at the origin of the source URL.
    fn health_url(&self) -> String {
        match reqwest::Url::parse(&self.base_url) {
            Ok(mut url) => {
                url.set_path("/health");
                url.set_query(None);
                url.to_string()
            }
            Err(_) => format!("{}/health", self.base_url),
        }
    }
}

#[async_trait]
impl TicketSource for HttpTicketSource {
    async fn fetch_page(&self, tenant_id: &str, page: u32) -> Result<SourcePage, SourceError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("tenant_id", tenant_id), ("page", &page.to_string())])
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(SourceError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let raw: RawPage = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        Ok(SourcePage {
            tickets: raw.tickets,
            page: raw.page.unwrap_or(page),
            total_pages: raw.total_pages.unwrap_or(1).max(1),
        })
    }

    async fn probe(&self) -> Result<(), SourceError> {
        let response = self
            .client
            .get(self.health_url())
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SourceError::Status(response.status().as_u16()))
        }
    }
}

/// Parse a `Retry-After` header value in seconds, capped at one minute.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?;
    value
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.min(60)))
}

/// Exponential backoff for a retry attempt, capped at one minute.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay_ms.min(60_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after(Some("2")), Some(Duration::from_secs(2)));
        assert_eq!(
            parse_retry_after(Some("500")),
            Some(Duration::from_secs(60))
        );
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0, 1000), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, 1000), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 1000), Duration::from_secs(4));
        assert_eq!(backoff_delay(20, 1000), Duration::from_secs(60));
    }

    #[test]
    fn external_ticket_requires_id_and_dates() {
        let good = json!({
            "id": "ext-1",
            "subject": "s",
            "message": "m",
            "status": "open",
            "created_at": "2025-06-01T10:00:00Z",
            "updated_at": "2025-06-01T10:00:00Z",
        });
        let ticket = ExternalTicket::parse(&good).unwrap();
        assert_eq!(ticket.id, "ext-1");
        assert_eq!(ticket.customer_id, "");

        let missing_id = json!({
            "created_at": "2025-06-01T10:00:00Z",
            "updated_at": "2025-06-01T10:00:00Z",
        });
        assert!(ExternalTicket::parse(&missing_id).is_err());

        let bad_date = json!({
            "id": "ext-2",
            "created_at": "yesterday",
            "updated_at": "2025-06-01T10:00:00Z",
        });
        assert!(ExternalTicket::parse(&bad_date).is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(SourceError::Status(502).is_transient());
        assert!(SourceError::Network("reset".into()).is_transient());
        assert!(!SourceError::Status(404).is_transient());
        assert!(!SourceError::RateLimited { retry_after: None }.is_transient());
        assert!(!SourceError::Decode("bad".into()).is_transient());
    }
}
