//! Shared primitive types.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Server-side primary keys are integer ids.
pub type DbId = i64;

pub type Timestamp = DateTime<Utc>;

/// Laravel serializes timestamps as RFC 3339 in JSON resources but as
/// `Y-m-d H:i:s` in raw model dumps. Both are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_server_formats() {
        let a = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        let b = parse_timestamp("2024-03-01 10:00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
