//! Ticketflow - multi-tenant support-ticket ingestion and analytics.
//!
//! Periodically pulls tickets from an external paginated HTTP source,
//! classifies them, persists them with idempotent upserts, notifies on
//! high-urgency items, and serves per-tenant dashboard analytics.

pub mod analytics;
pub mod breaker;
pub mod classify;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod rate_limit;
pub mod repository;
pub mod schema;
pub mod server;
pub mod source;
pub mod sync;
