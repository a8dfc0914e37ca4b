//! Dashboard analytics computed in a single database round trip.
//!
//! One statement scopes the tenant's live tickets to the requested window
//! and derives every facet (totals, status breakdown, ratios, hourly
//! trend, keywords, at-risk customers) as tagged UNION ALL arms. The
//! application only folds the few dozen aggregate rows into the response;
//! it never iterates ticket rows. Covered by the stats index.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel_async::RunQueryDsl;
use serde::Serialize;
use utoipa::ToSchema;

use crate::repository::pool::{DbPool, DieselError};
use crate::repository::format_timestamp;
use crate::with_conn_split;

/// Tickets per hour over the trailing day.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HourlyBucket {
    pub hour: String,
    pub count: i64,
}

/// Customer with repeated high-urgency tickets in the window.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AtRiskCustomer {
    pub customer_id: String,
    pub high_urgency_count: i64,
    pub ticket_ids: Vec<String>,
}

/// Full dashboard payload for one tenant.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TenantStats {
    pub total_tickets: i64,
    pub by_status: BTreeMap<String, i64>,
    pub urgency_high_ratio: f64,
    pub negative_sentiment_ratio: f64,
    pub hourly_trend: Vec<HourlyBucket>,
    pub top_keywords: Vec<String>,
    pub at_risk_customers: Vec<AtRiskCustomer>,
}

impl TenantStats {
    fn empty() -> Self {
        Self {
            total_tickets: 0,
            by_status: BTreeMap::new(),
            urgency_high_ratio: 0.0,
            negative_sentiment_ratio: 0.0,
            hourly_trend: Vec::new(),
            top_keywords: Vec::new(),
            at_risk_customers: Vec::new(),
        }
    }
}

#[derive(diesel::QueryableByName)]
struct FacetRow {
    #[diesel(sql_type = Text)]
    facet: String,
    #[diesel(sql_type = Text)]
    key: String,
    #[diesel(sql_type = BigInt)]
    count: i64,
    #[diesel(sql_type = Nullable<Text>)]
    extra: Option<String>,
}

/// Word-frequency noise filtered out of `top_keywords`; only tokens of
/// four or more letters survive tokenization anyway.
const STOPWORDS_SQL: &str =
    "('the','a','an','and','or','but','in','on','at','to','for','of','with','is','are','was','were')";

const FACETS_SQLITE: &str = r#"
WITH RECURSIVE scoped AS (
    SELECT customer_id, external_id, status, urgency, sentiment,
           lower(subject || ' ' || message) AS text, created_at
    FROM tickets
    WHERE tenant_id = ? AND deleted_at IS NULL
      AND created_at >= ? AND created_at <= ?
),
toks(word, rest) AS (
    SELECT '', text || ' ' FROM scoped
    UNION ALL
    SELECT substr(rest, 1, instr(rest, ' ') - 1),
           substr(rest, instr(rest, ' ') + 1)
    FROM toks WHERE rest <> ''
)
SELECT 'total' AS facet, '' AS key, COUNT(*) AS count, NULL AS extra FROM scoped
UNION ALL
SELECT 'status', status, COUNT(*), NULL FROM scoped GROUP BY status
UNION ALL
SELECT 'urgency', urgency, COUNT(*), NULL FROM scoped GROUP BY urgency
UNION ALL
SELECT 'sentiment', sentiment, COUNT(*), NULL FROM scoped GROUP BY sentiment
UNION ALL
SELECT 'hour', hour, count, NULL FROM (
    SELECT substr(created_at, 1, 13) AS hour, COUNT(*) AS count
    FROM scoped WHERE created_at >= ?
    GROUP BY substr(created_at, 1, 13)
    ORDER BY hour ASC LIMIT 24
)
UNION ALL
SELECT 'keyword', word, count, NULL FROM (
    SELECT word, COUNT(*) AS count FROM toks
    WHERE length(word) >= 4
      AND word NOT GLOB '*[^a-z]*'
      AND word NOT IN STOPWORDS
    GROUP BY word ORDER BY count DESC LIMIT 10
)
UNION ALL
SELECT 'at_risk', customer_id, count, extra FROM (
    SELECT customer_id, COUNT(*) AS count,
           group_concat(external_id, ',') AS extra
    FROM scoped WHERE urgency = 'high'
    GROUP BY customer_id HAVING COUNT(*) >= 2
    ORDER BY count DESC LIMIT 10
)
"#;

#[cfg(feature = "postgres")]
const FACETS_POSTGRES: &str = r#"
WITH scoped AS (
    SELECT customer_id, external_id, status, urgency, sentiment,
           lower(subject || ' ' || message) AS text, created_at
    FROM tickets
    WHERE tenant_id = $1 AND deleted_at IS NULL
      AND created_at >= $2 AND created_at <= $3
)
SELECT 'total' AS facet, '' AS key, COUNT(*) AS count, NULL::TEXT AS extra FROM scoped
UNION ALL
SELECT 'status', status, COUNT(*), NULL FROM scoped GROUP BY status
UNION ALL
SELECT 'urgency', urgency, COUNT(*), NULL FROM scoped GROUP BY urgency
UNION ALL
SELECT 'sentiment', sentiment, COUNT(*), NULL FROM scoped GROUP BY sentiment
UNION ALL
SELECT 'hour', hour, count, NULL FROM (
    SELECT substr(created_at, 1, 13) AS hour, COUNT(*) AS count
    FROM scoped WHERE created_at >= $4
    GROUP BY substr(created_at, 1, 13)
    ORDER BY hour ASC LIMIT 24
) h
UNION ALL
SELECT 'keyword', word, count, NULL FROM (
    SELECT word, COUNT(*) AS count FROM (
        SELECT regexp_split_to_table(text, '[^a-z]+') AS word FROM scoped
    ) w
    WHERE length(word) >= 4
      AND word NOT IN STOPWORDS
    GROUP BY word ORDER BY count DESC LIMIT 10
) k
UNION ALL
SELECT 'at_risk', customer_id, count, extra FROM (
    SELECT customer_id, COUNT(*) AS count,
           string_agg(external_id, ',') AS extra
    FROM scoped WHERE urgency = 'high'
    GROUP BY customer_id HAVING COUNT(*) >= 2
    ORDER BY count DESC LIMIT 10
) r
"#;

#[derive(Clone)]
pub struct AnalyticsService {
    pool: DbPool,
}

impl AnalyticsService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Compute the dashboard for a tenant over `[from, to]`.
    ///
    /// Defaults to the trailing 60 days; the hourly trend always covers the
    /// trailing 24 hours. Empty windows return zeros.
    pub async fn tenant_stats(
        &self,
        tenant_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<TenantStats, DieselError> {
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - Duration::days(60));

        let from_s = format_timestamp(from);
        let to_s = format_timestamp(to);
        let trail_s = format_timestamp(Utc::now() - Duration::hours(24));

        let rows: Vec<FacetRow> = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(FACETS_SQLITE.replace("STOPWORDS", STOPWORDS_SQL))
                    .bind::<Text, _>(tenant_id)
                    .bind::<Text, _>(&from_s)
                    .bind::<Text, _>(&to_s)
                    .bind::<Text, _>(&trail_s)
                    .load(&mut conn)
                    .await?
            },
            postgres: conn => {
                diesel::sql_query(FACETS_POSTGRES.replace("STOPWORDS", STOPWORDS_SQL))
                    .bind::<Text, _>(tenant_id)
                    .bind::<Text, _>(&from_s)
                    .bind::<Text, _>(&to_s)
                    .bind::<Text, _>(&trail_s)
                    .load(&mut conn)
                    .await?
            }
        );

        Ok(fold_rows(rows))
    }
}

fn fold_rows(rows: Vec<FacetRow>) -> TenantStats {
    let mut stats = TenantStats::empty();
    let mut high_urgency = 0i64;
    let mut negative = 0i64;
    let mut hourly: Vec<(String, i64)> = Vec::new();
    let mut keywords: Vec<(String, i64)> = Vec::new();

    for row in rows {
        match row.facet.as_str() {
            "total" => stats.total_tickets = row.count,
            "status" => {
                stats.by_status.insert(row.key, row.count);
            }
            "urgency" => {
                if row.key == "high" {
                    high_urgency = row.count;
                }
            }
            "sentiment" => {
                if row.key == "negative" {
                    negative = row.count;
                }
            }
            "hour" => hourly.push((row.key, row.count)),
            "keyword" => keywords.push((row.key, row.count)),
            "at_risk" => stats.at_risk_customers.push(AtRiskCustomer {
                customer_id: row.key,
                high_urgency_count: row.count,
                ticket_ids: row
                    .extra
                    .map(|ids| ids.split(',').map(str::to_string).collect())
                    .unwrap_or_default(),
            }),
            other => tracing::warn!(facet = other, "unknown analytics facet"),
        }
    }

    if stats.total_tickets > 0 {
        stats.urgency_high_ratio = round3(high_urgency as f64 / stats.total_tickets as f64);
        stats.negative_sentiment_ratio = round3(negative as f64 / stats.total_tickets as f64);
    }

    hourly.sort_by(|a, b| a.0.cmp(&b.0));
    stats.hourly_trend = hourly
        .into_iter()
        .map(|(hour, count)| HourlyBucket {
            // "2025-06-01T10" -> "2025-06-01 10:00:00"
            hour: if hour.len() == 13 {
                format!("{} {}:00:00", &hour[..10], &hour[11..])
            } else {
                hour
            },
            count,
        })
        .collect();

    keywords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    stats.top_keywords = keywords.into_iter().map(|(word, _)| word).collect();

    stats
        .at_risk_customers
        .sort_by(|a, b| b.high_urgency_count.cmp(&a.high_urgency_count));

    stats
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sentiment, Ticket, Urgency};
    use crate::repository::init::provision_schema;
    use crate::repository::TicketRepository;
    use tempfile::tempdir;

    async fn setup() -> (AnalyticsService, TicketRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_url(dir.path().join("test.db").to_str().unwrap(), 1).unwrap();
        provision_schema(&pool).await.unwrap();
        (
            AnalyticsService::new(pool.clone()),
            TicketRepository::new(pool),
            dir,
        )
    }

    fn ticket(
        id: &str,
        customer: &str,
        status: &str,
        urgency: Urgency,
        sentiment: Sentiment,
        message: &str,
        created_at: DateTime<Utc>,
    ) -> Ticket {
        Ticket {
            external_id: id.to_string(),
            tenant_id: "t1".to_string(),
            customer_id: customer.to_string(),
            source: "email".to_string(),
            subject: "subject".to_string(),
            message: message.to_string(),
            status: status.to_string(),
            urgency,
            sentiment,
            requires_action: urgency == Urgency::High,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn empty_tenant_returns_zeros() {
        let (analytics, _tickets, _dir) = setup().await;
        let stats = analytics.tenant_stats("t1", None, None).await.unwrap();

        assert_eq!(stats.total_tickets, 0);
        assert_eq!(stats.urgency_high_ratio, 0.0);
        assert_eq!(stats.negative_sentiment_ratio, 0.0);
        assert!(stats.by_status.is_empty());
        assert!(stats.hourly_trend.is_empty());
        assert!(stats.top_keywords.is_empty());
        assert!(stats.at_risk_customers.is_empty());
    }

    #[tokio::test]
    async fn facets_cover_the_dashboard() {
        let (analytics, tickets, _dir) = setup().await;
        let now = Utc::now();

        // Customer c1 files two high-urgency tickets -> at risk
        for (id, urgency, sentiment, status, message) in [
            ("a", Urgency::High, Sentiment::Negative, "open", "refund refund chargeback"),
            ("b", Urgency::High, Sentiment::Neutral, "open", "refund please"),
            ("c", Urgency::Low, Sentiment::Positive, "closed", "thanks with everything"),
        ] {
            let customer = if id == "c" { "c2" } else { "c1" };
            tickets
                .upsert(&ticket(id, customer, status, urgency, sentiment, message, now))
                .await
                .unwrap();
        }

        let stats = analytics.tenant_stats("t1", None, None).await.unwrap();

        assert_eq!(stats.total_tickets, 3);
        assert_eq!(stats.by_status.get("open"), Some(&2));
        assert_eq!(stats.by_status.get("closed"), Some(&1));
        assert_eq!(stats.urgency_high_ratio, 0.667);
        assert_eq!(stats.negative_sentiment_ratio, 0.333);

        // All three created within the last 24h -> one bucket with 3
        let total_in_trend: i64 = stats.hourly_trend.iter().map(|b| b.count).sum();
        assert_eq!(total_in_trend, 3);
        assert!(stats.hourly_trend[0].hour.ends_with(":00:00"));

        // "refund" appears three times; stopword "with" is excluded
        assert_eq!(stats.top_keywords.as_slice().first().map(String::as_str), Some("refund"));
        assert!(!stats.top_keywords.iter().any(|w| w == "with"));

        assert_eq!(stats.at_risk_customers.len(), 1);
        let risk = &stats.at_risk_customers[0];
        assert_eq!(risk.customer_id, "c1");
        assert_eq!(risk.high_urgency_count, 2);
        assert_eq!(risk.ticket_ids.len(), 2);
    }

    #[tokio::test]
    async fn window_and_soft_delete_scope_the_pipeline() {
        let (analytics, tickets, _dir) = setup().await;
        let now = Utc::now();

        tickets
            .upsert(&ticket("recent", "c1", "open", Urgency::Low, Sentiment::Neutral, "m", now))
            .await
            .unwrap();
        tickets
            .upsert(&ticket(
                "ancient",
                "c1",
                "open",
                Urgency::Low,
                Sentiment::Neutral,
                "m",
                now - Duration::days(120),
            ))
            .await
            .unwrap();
        tickets
            .upsert(&ticket("gone", "c1", "open", Urgency::Low, Sentiment::Neutral, "m", now))
            .await
            .unwrap();
        tickets
            .soft_delete("t1", &["gone".to_string()], now)
            .await
            .unwrap();

        // Default 60-day window: ancient and soft-deleted are invisible
        let stats = analytics.tenant_stats("t1", None, None).await.unwrap();
        assert_eq!(stats.total_tickets, 1);

        // Explicit wide window picks the ancient one back up
        let stats = analytics
            .tenant_stats("t1", Some(now - Duration::days(365)), Some(now))
            .await
            .unwrap();
        assert_eq!(stats.total_tickets, 2);
    }

    #[tokio::test]
    async fn rounding_is_three_decimals() {
        assert_eq!(round3(1.0 / 3.0), 0.333);
        assert_eq!(round3(2.0 / 3.0), 0.667);
        assert_eq!(round3(0.0), 0.0);
    }
}
