//! Zulu time codec
//!
//! The dbserver exchanges every timestamp as an ISO-8601 UTC string with a
//! literal `Z` suffix and no numeric offset ("Zulu string"):
//!
//! ```text
//! 2022-06-09T10:05:21.123456Z   date + time + subsecond
//! 2022-06-09T10:05:21Z          date + time
//! 2022-06-09Z                   bare date (midnight)
//! ```
//!
//! [`from_zulu`] is a soft-failing primitive: it returns `None` for any
//! other shape. Callers that depend on the instant upgrade `None` into
//! [`Error::DataIntegrity`](crate::Error::DataIntegrity).
//!
//! ```rust
//! use mke_client::time::{from_zulu, to_zulu};
//!
//! let t = from_zulu("2022-06-09T10:05:21Z").unwrap();
//! assert_eq!(to_zulu(&t, true), "2022-06-09T10:05:21Z");
//! assert_eq!(from_zulu("2022-06-09Z"), from_zulu("2022-06-09T00:00:00Z"));
//! assert!(from_zulu("not-a-date").is_none());
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};

const ZULU_SECONDS: &str = "%Y-%m-%dT%H:%M:%SZ";
const ZULU_MICROS: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
const PARSE_SUBSECOND: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
const PARSE_DATE: &str = "%Y-%m-%d";

/// Current date and time in UTC.
#[must_use]
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Render an instant as a Zulu string.
///
/// The instant is converted to UTC first. With `drop_subsecond` the
/// fractional part is truncated and omitted (`YYYY-MM-DDTHH:MM:SSZ`),
/// otherwise microseconds are always written (`YYYY-MM-DDTHH:MM:SS.ffffffZ`).
#[must_use]
pub fn to_zulu<Tz: TimeZone>(instant: &DateTime<Tz>, drop_subsecond: bool) -> String {
    let utc = instant.with_timezone(&Utc);
    if drop_subsecond {
        utc.trunc_subsecs(0).format(ZULU_SECONDS).to_string()
    } else {
        utc.format(ZULU_MICROS).to_string()
    }
}

/// Shorthand for `to_zulu(instant, true)`.
#[must_use]
pub fn make_zulu_str<Tz: TimeZone>(instant: &DateTime<Tz>) -> String {
    to_zulu(instant, true)
}

/// Parse one of the three accepted Zulu shapes.
///
/// Never panics; any other shape or an out-of-range field yields `None`.
#[must_use]
pub fn from_zulu(s: &str) -> Option<DateTime<Utc>> {
    let body = s.strip_suffix('Z')?;
    if !has_date_prefix(body) {
        return None;
    }

    let bytes = body.as_bytes();
    let naive = match bytes.len() {
        10 => NaiveDate::parse_from_str(body, PARSE_DATE)
            .ok()?
            .and_hms_opt(0, 0, 0)?,
        19 if has_time_part(bytes) => NaiveDateTime::parse_from_str(s, ZULU_SECONDS).ok()?,
        n if n > 20
            && has_time_part(bytes)
            && bytes[19] == b'.'
            && bytes[20..].iter().all(u8::is_ascii_digit) =>
        {
            NaiveDateTime::parse_from_str(s, PARSE_SUBSECOND).ok()?
        }
        _ => return None,
    };

    Some(Utc.from_utc_datetime(&naive))
}

/// `THH:MM:SS` with ASCII digits, at bytes 10..19.
///
/// chrono skips leading spaces inside numeric fields, so the layout is
/// checked here before parsing.
fn has_time_part(bytes: &[u8]) -> bool {
    bytes.len() >= 19
        && bytes[10..19].iter().enumerate().all(|(i, b)| match i {
            0 => *b == b'T',
            3 | 6 => *b == b':',
            _ => b.is_ascii_digit(),
        })
}

/// `YYYY-MM-DD` with ASCII digits, as the first ten bytes.
fn has_date_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 10
        && bytes[..10].iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}
