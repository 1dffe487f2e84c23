//! Storage time zone helpers
//!
//! Message timestamps are stored in a single fixed zone (UTC+8). Inputs
//! from exports arrive in several shapes; naive values are taken to already
//! be in the storage zone.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

/// Offset of the storage zone in seconds east of UTC
pub const STORAGE_OFFSET_SECS: i32 = 8 * 3600;

/// Format used for plain-text exports
pub const PLAIN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

pub fn storage_offset() -> FixedOffset {
    FixedOffset::east_opt(STORAGE_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn now() -> DateTime<FixedOffset> {
    to_storage(Utc::now())
}

pub fn to_storage<Tz: TimeZone>(dt: DateTime<Tz>) -> DateTime<FixedOffset> {
    dt.with_timezone(&storage_offset())
}

/// Best-effort timestamp parsing. Unparseable or missing input yields `now()`.
pub fn parse_loose(raw: Option<&str>) -> DateTime<FixedOffset> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(parse_strict)
        .unwrap_or_else(now)
}

/// Parse a timestamp with or without an offset; `None` if no format fits.
pub fn parse_strict(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(to_storage(dt));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(to_storage(dt));
    }
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .and_then(|naive| naive.and_local_timezone(storage_offset()).single())
    })
}

/// Read back a value written by `to_rfc3339`
pub fn parse_stored(raw: &str) -> DateTime<FixedOffset> {
    parse_strict(raw).unwrap_or_else(|| {
        log::warn!("[clock] Unreadable stored timestamp '{}', using now", raw);
        now()
    })
}

pub fn format_plain(dt: &DateTime<FixedOffset>) -> String {
    to_storage(*dt).format(PLAIN_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utc_input_is_shifted_to_storage_zone() {
        let dt = parse_strict("2024-03-01T00:30:00Z").unwrap();
        assert_eq!(format_plain(&dt), "2024-03-01 08:30:00");
        assert_eq!(dt.offset().local_minus_utc(), STORAGE_OFFSET_SECS);
    }

    #[test]
    fn test_naive_input_is_taken_as_storage_zone() {
        let dt = parse_strict("2024-03-01 12:00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T12:00:00+08:00");
        let dt = parse_strict("2024-03-01T12:00:00.250").unwrap();
        assert_eq!(format_plain(&dt), "2024-03-01 12:00:00");
    }

    #[test]
    fn test_garbage_falls_back_to_now() {
        let before = now();
        let dt = parse_loose(Some("yesterday-ish"));
        assert!(dt >= before);
        assert!(parse_loose(None) >= before);
    }
}
