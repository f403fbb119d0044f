//! Timestamp helpers shared by the stores and the gates.
//!
//! Every timestamp is persisted as RFC 3339 UTC with millisecond precision
//! and a `Z` suffix, so lexicographic order in SQL equals chronological order.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Render a UTC instant in the canonical storage format.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in the canonical storage format.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// Parse a stored timestamp into UTC.
///
/// Offset-carrying values are converted to UTC. Naive values (no offset,
/// e.g. written by an older migration or a foreign tool) are assumed UTC.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn naive_timestamps_are_treated_as_utc() {
        let parsed = parse_utc("2026-03-01 10:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn offsets_are_normalised_to_utc() {
        let parsed = parse_utc("2026-03-01T07:00:00-03:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn storage_format_sorts_chronologically() {
        let a = format_ts(Utc.with_ymd_and_hms(2026, 3, 1, 9, 59, 59).unwrap());
        let b = format_ts(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
        assert!(a < b);
        assert!(a.ends_with('Z'));
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse_utc("").is_none());
        assert!(parse_utc("yesterday").is_none());
    }
}
