use crate::error::CoreError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Period used when a timeframe string carries no recognised unit suffix.
pub const FALLBACK_PERIOD_SECS: i64 = 60;

/// Longest accepted period. Anything longer is treated as unrecognised.
pub const MAX_PERIOD_SECS: i64 = 366 * 86_400;

/// A fixed bucket duration such as `"5s"`, `"1m"` or `"4h"`.
///
/// The label is always the trimmed, lowercase form of whatever the caller passed
/// in, so `"5M"` and `"5m"` address the same bucket series.
///
/// Parsing is lenient: a string whose trailing unit is not one of `s`, `m`, `h`,
/// `d` (or whose numeric prefix does not parse, or whose period exceeds
/// [`MAX_PERIOD_SECS`]) falls back to a 60 second period instead of failing.
/// Use [`Timeframe::parse_strict`] to reject such input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Timeframe {
    label: String,
    period_secs: i64,
}

impl Timeframe {
    /// Parses a timeframe, defaulting the period to one minute when unrecognised.
    pub fn parse(raw: &str) -> Self {
        let label = raw.trim().to_lowercase();
        let period_secs = period_of(&label).unwrap_or(FALLBACK_PERIOD_SECS);
        Self { label, period_secs }
    }

    /// Parses a timeframe, rejecting anything that would hit the lenient fallback.
    pub fn parse_strict(raw: &str) -> Result<Self, CoreError> {
        let label = raw.trim().to_lowercase();
        match period_of(&label) {
            Some(period_secs) => Ok(Self { label, period_secs }),
            None => Err(CoreError::InvalidTimeframe(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.label
    }

    pub fn period_secs(&self) -> i64 {
        self.period_secs
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.period_secs)
    }

    /// `floor(epoch_seconds(ts) / period) * period`.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let epoch = ts.timestamp();
        let start = epoch.div_euclid(self.period_secs) * self.period_secs;
        DateTime::from_timestamp(start, 0).unwrap_or(ts)
    }

    /// Exclusive end of the bucket that opened at `bucket_start`, saturating
    /// at the last representable instant.
    pub fn bucket_end(&self, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
        bucket_start
            .checked_add_signed(self.duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

fn period_of(label: &str) -> Option<i64> {
    let unit = label.chars().last()?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        _ => return None,
    };
    let amount: i64 = label[..label.len() - unit.len_utf8()].parse().ok()?;
    if amount <= 0 {
        return None;
    }
    amount
        .checked_mul(multiplier)
        .filter(|secs| *secs <= MAX_PERIOD_SECS)
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl From<&str> for Timeframe {
    fn from(raw: &str) -> Self {
        Timeframe::parse(raw)
    }
}

impl From<String> for Timeframe {
    fn from(raw: String) -> Self {
        Timeframe::parse(&raw)
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_every_unit() {
        assert_eq!(Timeframe::parse("5s").period_secs(), 5);
        assert_eq!(Timeframe::parse("2m").period_secs(), 120);
        assert_eq!(Timeframe::parse("1h").period_secs(), 3_600);
        assert_eq!(Timeframe::parse("1d").period_secs(), 86_400);
    }

    #[test]
    fn normalises_to_lowercase() {
        let tf = Timeframe::parse(" 15M ");
        assert_eq!(tf.as_str(), "15m");
        assert_eq!(tf, Timeframe::parse("15m"));
    }

    #[test]
    fn unknown_suffix_falls_back_to_one_minute() {
        let tf = Timeframe::parse("3w");
        assert_eq!(tf.period_secs(), FALLBACK_PERIOD_SECS);
        assert_eq!(tf.as_str(), "3w");
        assert_eq!(Timeframe::parse("xm").period_secs(), FALLBACK_PERIOD_SECS);
        assert_eq!(Timeframe::parse("").period_secs(), FALLBACK_PERIOD_SECS);
    }

    #[test]
    fn strict_parse_rejects_fallback_cases() {
        assert!(Timeframe::parse_strict("3w").is_err());
        assert!(Timeframe::parse_strict("0m").is_err());
        assert_eq!(Timeframe::parse_strict("30S").unwrap().as_str(), "30s");
    }

    #[test]
    fn oversized_periods_fall_back_to_one_minute() {
        assert_eq!(Timeframe::parse("366d").period_secs(), MAX_PERIOD_SECS);
        for raw in ["367d", "100000000d", "9223372036854775807s"] {
            assert_eq!(Timeframe::parse(raw).period_secs(), FALLBACK_PERIOD_SECS, "{raw}");
            assert!(Timeframe::parse_strict(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn bucket_end_saturates_at_the_end_of_time() {
        let tf = Timeframe::parse("366d");
        let last = DateTime::<Utc>::MAX_UTC;
        assert_eq!(tf.bucket_end(last), last);
    }

    #[test]
    fn bucket_start_floors_to_period() {
        let tf = Timeframe::parse("5m");
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 14, 37, 12).unwrap();
        let start = tf.bucket_start(ts);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 4, 14, 35, 0).unwrap());
        assert_eq!(tf.bucket_end(start), Utc.with_ymd_and_hms(2024, 3, 4, 14, 40, 0).unwrap());
    }

    #[test]
    fn serde_uses_the_label() {
        let tf: Timeframe = serde_json::from_str("\"1H\"").unwrap();
        assert_eq!(tf.period_secs(), 3_600);
        assert_eq!(serde_json::to_string(&tf).unwrap(), "\"1h\"");
    }
}
