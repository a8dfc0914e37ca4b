//! Repository layer: typed access to the five persisted collections.
//!
//! All store access goes through Diesel with the dual-backend pool from
//! [`pool`]. Raw rows never cross above this layer; repositories translate
//! between record structs and the domain models in [`crate::models`].

pub mod history;
pub mod init;
pub mod job;
pub mod lock;
pub mod pool;
pub mod records;
pub mod ticket;
pub mod util;

pub use history::HistoryRepository;
pub use job::JobRepository;
pub use lock::LockRepository;
pub use pool::{DbPool, DieselError};
pub use ticket::TicketRepository;

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp in the fixed-width UTC form stored in the database.
///
/// Microsecond precision with a `Z` suffix keeps every value the same
/// length, so lexicographic comparison in SQL equals chronological order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, defaulting to the Unix epoch on error.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional stored timestamp.
pub fn parse_timestamp_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_round_trip() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        let s = format_timestamp(dt);
        assert_eq!(s, "2025-03-14T15:09:26.000000Z");
        assert_eq!(parse_timestamp(&s), dt);
    }

    #[test]
    fn timestamp_order_is_lexicographic() {
        let a = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 1).unwrap();
        assert!(format_timestamp(a) < format_timestamp(b));
    }

    #[test]
    fn bad_timestamp_falls_back_to_epoch() {
        assert_eq!(parse_timestamp("not a date"), DateTime::UNIX_EPOCH);
        assert_eq!(parse_timestamp_opt(Some("nope".into())), None);
        assert_eq!(parse_timestamp_opt(None), None);
    }
}
