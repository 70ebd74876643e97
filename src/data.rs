use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Wall-clock format used when a timestamp is rendered or stored.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A typed cell value. Absence is always `None` on the surrounding `Option`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Text(String),
    Timestamp(NaiveDateTime),
}

pub type Cell = Option<Value>;

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Text(s) => s.clone(),
            Value::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Loosely typed input to coercion: a CSV field or a stored SQLite value.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RawValue {
    /// Empty CSV fields are absent values.
    pub fn from_field(field: &str) -> Self {
        if field.is_empty() {
            RawValue::Null
        } else {
            RawValue::Text(field.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::from_field(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Integer(value)
    }
}

/// How timezone-aware timestamps become naive values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum TimezonePolicy {
    /// Keep the local wall-clock time and discard the offset.
    #[default]
    Strip,
    /// Shift to UTC, then discard the offset.
    Utc,
}

/// Integral numbers only. `"12.0"` is 12, `"12.5"` is not an integer.
pub fn parse_integer(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = trimmed.parse::<i64>() {
        return Some(parsed);
    }
    trimmed.parse::<f64>().ok().and_then(integral_float)
}

pub fn integral_float(value: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
    if value.is_finite() && value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64
    {
        Some(value as i64)
    } else {
        None
    }
}

pub fn render_real(value: f64) -> String {
    match integral_float(value) {
        Some(i) => i.to_string(),
        None => value.to_string(),
    }
}

/// Ambiguous slash dates are month-first: `05/01/2021` is 1 May.
pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%d-%m-%Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Tolerant timestamp parser. Offsets are handled according to `policy`;
/// bare dates resolve to midnight.
pub fn parse_timestamp(value: &str, policy: TimezonePolicy) -> Option<NaiveDateTime> {
    const OFFSET_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M%:z",
        "%Y-%m-%d %H:%M:%S%.f%#z",
        "%Y-%m-%dT%H:%M:%S%.f%#z",
        "%Y-%m-%d %H:%M:%S%.f %#z",
    ];
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%d/%m/%Y %H:%M",
    ];

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let aware = DateTime::parse_from_rfc3339(trimmed).ok().or_else(|| {
        OFFSET_FORMATS
            .iter()
            .find_map(|fmt| DateTime::parse_from_str(trimmed, fmt).ok())
    });
    if let Some(parsed) = aware {
        return Some(match policy {
            TimezonePolicy::Strip => parsed.naive_local(),
            TimezonePolicy::Utc => parsed.naive_utc(),
        });
    }

    // `Z` without seconds or with a space separator slips past RFC 3339.
    let without_zulu = trimmed
        .strip_suffix('Z')
        .or_else(|| trimmed.strip_suffix('z'))
        .unwrap_or(trimmed);

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(without_zulu, fmt).ok())
        .or_else(|| parse_naive_date(without_zulu).map(|date| date.and_time(NaiveTime::MIN)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn parse_integer_accepts_integral_floats_only() {
        assert_eq!(parse_integer("12"), Some(12));
        assert_eq!(parse_integer(" 12.0 "), Some(12));
        assert_eq!(parse_integer("-3"), Some(-3));
        assert_eq!(parse_integer("12.5"), None);
        assert_eq!(parse_integer("abc"), None);
        assert_eq!(parse_integer(""), None);
        assert_eq!(parse_integer("1e30"), None);
    }

    #[test]
    fn parse_timestamp_strips_offsets_by_default() {
        let expected = ts("2021-05-01 10:00:00");
        assert_eq!(
            parse_timestamp("2021-05-01T10:00:00+02:00", TimezonePolicy::Strip),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp("2021-05-01T10:00:00", TimezonePolicy::Strip),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp("2021-05-01T10:00:00Z", TimezonePolicy::Strip),
            Some(expected)
        );
    }

    #[test]
    fn parse_timestamp_converts_offsets_under_utc_policy() {
        assert_eq!(
            parse_timestamp("2021-05-01T10:00:00+02:00", TimezonePolicy::Utc),
            Some(ts("2021-05-01 08:00:00"))
        );
        assert_eq!(
            parse_timestamp("2021-05-01 10:00:00", TimezonePolicy::Utc),
            Some(ts("2021-05-01 10:00:00"))
        );
    }

    #[test]
    fn parse_timestamp_supports_dates_and_loose_formats() {
        assert_eq!(
            parse_timestamp("2021-01-05", TimezonePolicy::Strip),
            Some(ts("2021-01-05 00:00:00"))
        );
        assert_eq!(
            parse_timestamp("2021-01-05 08:15", TimezonePolicy::Strip),
            Some(ts("2021-01-05 08:15:00"))
        );
    }

    #[test]
    fn ambiguous_slash_dates_read_month_first() {
        assert_eq!(
            parse_timestamp("05/01/2021 08:15:00", TimezonePolicy::Strip),
            Some(ts("2021-05-01 08:15:00"))
        );
        assert_eq!(
            parse_timestamp("05/01/2021", TimezonePolicy::Strip),
            Some(ts("2021-05-01 00:00:00"))
        );
        assert_eq!(
            parse_timestamp("05/01/2021 08:15", TimezonePolicy::Strip),
            Some(ts("2021-05-01 08:15:00"))
        );
        // No thirteenth month, so only the day-first reading fits.
        assert_eq!(
            parse_timestamp("25/12/2021", TimezonePolicy::Strip),
            Some(ts("2021-12-25 00:00:00"))
        );
    }

    #[test]
    fn parse_timestamp_accepts_hour_only_and_spaced_offsets() {
        assert_eq!(
            parse_timestamp("2021-05-01 10:00:00+02", TimezonePolicy::Strip),
            Some(ts("2021-05-01 10:00:00"))
        );
        assert_eq!(
            parse_timestamp("2021-05-01 10:00:00+02", TimezonePolicy::Utc),
            Some(ts("2021-05-01 08:00:00"))
        );
        assert_eq!(
            parse_timestamp("2021-05-01T10:00:00.250-03", TimezonePolicy::Utc),
            Some(ts("2021-05-01 13:00:00") + chrono::Duration::milliseconds(250))
        );
        assert_eq!(
            parse_timestamp("2021-05-01 10:00:00 +02:00", TimezonePolicy::Utc),
            Some(ts("2021-05-01 08:00:00"))
        );
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp("not a date", TimezonePolicy::Strip), None);
        assert_eq!(parse_timestamp("   ", TimezonePolicy::Strip), None);
    }

    #[test]
    fn timestamp_display_round_trips_through_parser() {
        let value = Value::Timestamp(ts("2021-11-07 02:48:42"));
        assert_eq!(value.as_display(), "2021-11-07 02:48:42");
        assert_eq!(
            parse_timestamp(&value.as_display(), TimezonePolicy::Strip),
            Some(ts("2021-11-07 02:48:42"))
        );
    }

    #[test]
    fn render_real_drops_integral_fraction() {
        assert_eq!(render_real(4.0), "4");
        assert_eq!(render_real(4.25), "4.25");
    }
}
