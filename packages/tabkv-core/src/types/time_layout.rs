//! Well-known time layouts accepted by `Time` items.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Fixed set of accepted time formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeLayout {
    /// `2006-01-02T15:04:05Z07:00`
    #[serde(rename = "RFC3339")]
    Rfc3339,
    /// `2006-01-02T15:04:05.999999999Z07:00`
    #[serde(rename = "RFC3339Nano")]
    Rfc3339Nano,
    /// `Mon, 02 Jan 2006 15:04:05 -0700`
    #[serde(rename = "RFC1123Z")]
    Rfc1123Z,
    /// `02 Jan 06 15:04 -0700`
    #[serde(rename = "RFC822Z")]
    Rfc822Z,
    /// `Mon Jan _2 15:04:05 2006`, UTC
    #[serde(rename = "ANSIC")]
    Ansic,
    /// `2006-01-02 15:04:05`, UTC
    #[serde(rename = "DateTime")]
    DateTime,
    /// `2006-01-02`, midnight UTC
    #[serde(rename = "DateOnly")]
    DateOnly,
}

impl TimeLayout {
    pub fn name(&self) -> &'static str {
        match self {
            TimeLayout::Rfc3339 => "RFC3339",
            TimeLayout::Rfc3339Nano => "RFC3339Nano",
            TimeLayout::Rfc1123Z => "RFC1123Z",
            TimeLayout::Rfc822Z => "RFC822Z",
            TimeLayout::Ansic => "ANSIC",
            TimeLayout::DateTime => "DateTime",
            TimeLayout::DateOnly => "DateOnly",
        }
    }

    /// Parses `s` in this layout.
    pub fn parse(&self, s: &str) -> Option<DateTime<FixedOffset>> {
        match self {
            TimeLayout::Rfc3339 | TimeLayout::Rfc3339Nano => DateTime::parse_from_rfc3339(s).ok(),
            TimeLayout::Rfc1123Z => DateTime::parse_from_str(s, "%a, %d %b %Y %H:%M:%S %z").ok(),
            TimeLayout::Rfc822Z => DateTime::parse_from_str(s, "%d %b %y %H:%M %z").ok(),
            TimeLayout::Ansic => NaiveDateTime::parse_from_str(s, "%a %b %e %H:%M:%S %Y")
                .ok()
                .map(naive_utc),
            TimeLayout::DateTime => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(naive_utc),
            TimeLayout::DateOnly => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(naive_utc),
        }
    }

    /// Formats `t` in this layout.
    pub fn format(&self, t: &DateTime<FixedOffset>) -> String {
        match self {
            TimeLayout::Rfc3339 => t.to_rfc3339_opts(SecondsFormat::Secs, true),
            TimeLayout::Rfc3339Nano => t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            TimeLayout::Rfc1123Z => t.format("%a, %d %b %Y %H:%M:%S %z").to_string(),
            TimeLayout::Rfc822Z => t.format("%d %b %y %H:%M %z").to_string(),
            TimeLayout::Ansic => t.with_timezone(&Utc).format("%a %b %e %H:%M:%S %Y").to_string(),
            TimeLayout::DateTime => t.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string(),
            TimeLayout::DateOnly => t.with_timezone(&Utc).format("%Y-%m-%d").to_string(),
        }
    }
}

fn naive_utc(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    Utc.from_utc_datetime(&naive).fixed_offset()
}

/// Formats `t` in the lossless form written to partition files.
pub fn format_stored(t: &DateTime<FixedOffset>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses the form produced by [`format_stored`].
pub fn parse_stored(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

/// Unix epoch, the default for `Time` items without one configured.
pub fn epoch() -> DateTime<FixedOffset> {
    DateTime::<Utc>::UNIX_EPOCH.fixed_offset()
}
