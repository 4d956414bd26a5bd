//! Time range and granularity resolution
//!
//! Validates the `(from, to, granularity)` triple every query needs.
//! Timestamps are RFC 3339 with an offset; the caller's text is kept as-is
//! so payloads echo exactly what was asked for.

use crate::error::{MetricsError, MetricsResult};
use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Pattern every granularity must match after lower-casing
pub const GRANULARITY_PATTERN: &str = r"^\d+(s|m|h|d|w|mo|q|y)$";

static GRANULARITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(GRANULARITY_PATTERN).unwrap_or_else(|e| panic!("invalid granularity pattern: {}", e))
});

/// Fallback when a source declares nothing usable
pub const FALLBACK_GRANULARITY: &str = "1h";

const PREFERRED_GRANULARITIES: [&str; 2] = ["1h", "1d"];

/// A resolved, validated time range
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    /// Start as supplied (or generated)
    pub from: String,
    /// End as supplied (or generated)
    pub to: String,
    from_at: DateTime<FixedOffset>,
    to_at: DateTime<FixedOffset>,
}

impl TimeRange {
    pub fn from_at(&self) -> DateTime<FixedOffset> {
        self.from_at
    }

    pub fn to_at(&self) -> DateTime<FixedOffset> {
        self.to_at
    }
}

/// Granularity defaults declared by a data source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_granularity: Option<String>,

    #[serde(default)]
    pub available_granularities: Vec<String>,
}

impl SourceInfo {
    /// Pick a default: declared default, then `1h`, then `1d`, then the
    /// first available one, then the literal fallback.
    pub fn pick_default(&self) -> String {
        if let Some(value) = self
            .default_granularity
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return value.to_string();
        }

        for candidate in PREFERRED_GRANULARITIES {
            if self.available_granularities.iter().any(|g| g == candidate) {
                return candidate.to_string();
            }
        }

        self.available_granularities
            .first()
            .cloned()
            .unwrap_or_else(|| FALLBACK_GRANULARITY.to_string())
    }
}

/// Resolve a time range; both empty means the last 24 hours.
pub fn resolve_time_range(from: Option<&str>, to: Option<&str>) -> MetricsResult<TimeRange> {
    resolve_time_range_at(from, to, Utc::now())
}

/// Same as [`resolve_time_range`] with an explicit clock.
pub fn resolve_time_range_at(
    from: Option<&str>,
    to: Option<&str>,
    now: DateTime<Utc>,
) -> MetricsResult<TimeRange> {
    let from = from.map(str::trim).unwrap_or_default();
    let to = to.map(str::trim).unwrap_or_default();

    if from.is_empty() && to.is_empty() {
        let end = now.fixed_offset();
        let start = end - Duration::hours(24);
        return Ok(TimeRange {
            from: start.to_rfc3339_opts(SecondsFormat::Secs, true),
            to: end.to_rfc3339_opts(SecondsFormat::Secs, true),
            from_at: start,
            to_at: end,
        });
    }

    if from.is_empty() || to.is_empty() {
        return Err(MetricsError::invalid(
            "from and to are required together (RFC3339, e.g. 2024-01-02T15:04:05Z)",
        ));
    }

    let from_at = validate_timestamp("from", from)?;
    let to_at = validate_timestamp("to", to)?;

    Ok(TimeRange {
        from: from.to_string(),
        to: to.to_string(),
        from_at,
        to_at,
    })
}

/// Parse an RFC 3339 timestamp, naming the offending argument on failure.
pub fn validate_timestamp(label: &str, value: &str) -> MetricsResult<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value.trim()).map_err(|_| {
        MetricsError::InvalidInput(format!(
            "{} must be RFC3339 (e.g. 2024-01-02T15:04:05Z or 2024-01-02T15:04:05+00:00)",
            label
        ))
    })
}

/// Lower-case and check a granularity string.
pub fn validate_granularity(value: &str) -> MetricsResult<String> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(MetricsError::invalid("granularity is required"));
    }
    if !GRANULARITY_RE.is_match(&normalized) {
        return Err(MetricsError::invalid(
            "granularity must be <number><unit> using s, m, h, d, w, mo, q, y (e.g. 1h, 15m, 1d)",
        ));
    }
    Ok(normalized)
}

/// Use the explicit granularity when given, otherwise the source's default.
pub fn resolve_granularity(explicit: Option<&str>, source: &SourceInfo) -> MetricsResult<String> {
    match explicit.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => validate_granularity(value),
        None => Ok(source.pick_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_range_is_last_day() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 15, 4, 5).unwrap();
        let range = resolve_time_range_at(None, None, now).unwrap();
        assert_eq!(range.from, "2024-01-01T15:04:05Z");
        assert_eq!(range.to, "2024-01-02T15:04:05Z");
        assert_eq!(range.to_at() - range.from_at(), Duration::hours(24));
    }

    #[test]
    fn test_explicit_range_is_preserved() {
        let range = resolve_time_range(
            Some("2024-01-02T00:00:00+02:00"),
            Some("2024-01-03T00:00:00+02:00"),
        )
        .unwrap();
        assert_eq!(range.from, "2024-01-02T00:00:00+02:00");
        assert_eq!(range.to, "2024-01-03T00:00:00+02:00");
    }

    #[test]
    fn test_inverted_range_is_not_rejected() {
        let range = resolve_time_range(Some("2024-01-03T00:00:00Z"), Some("2024-01-02T00:00:00Z"));
        assert!(range.is_ok());

        let same = resolve_time_range(Some("2024-01-02T00:00:00Z"), Some("2024-01-02T00:00:00Z"));
        assert!(same.is_ok());
    }

    #[test]
    fn test_single_bound_is_rejected() {
        let err = resolve_time_range(Some("2024-01-02T00:00:00Z"), None).unwrap_err();
        assert!(matches!(err, MetricsError::InvalidInput(_)));
        assert!(err.to_string().contains("required together"));

        let err = resolve_time_range(Some("  "), Some("2024-01-02T00:00:00Z")).unwrap_err();
        assert!(matches!(err, MetricsError::InvalidInput(_)));
    }

    #[test]
    fn test_unparseable_bound_names_label() {
        let err = resolve_time_range(Some("2024-01-02"), Some("2024-01-03T00:00:00Z")).unwrap_err();
        assert!(err.to_string().starts_with("from must be RFC3339"));

        let err = resolve_time_range(Some("2024-01-02T00:00:00Z"), Some("tomorrow")).unwrap_err();
        assert!(err.to_string().starts_with("to must be RFC3339"));
    }

    #[test]
    fn test_validate_granularity() {
        assert_eq!(validate_granularity("1H").unwrap(), "1h");
        assert_eq!(validate_granularity(" 15m ").unwrap(), "15m");
        assert_eq!(validate_granularity("3mo").unwrap(), "3mo");
        assert_eq!(validate_granularity("1q").unwrap(), "1q");

        for bad in ["", "h", "1", "1hour", "-1h", "1.5h", "1 h", "mo1"] {
            let err = validate_granularity(bad).unwrap_err();
            assert!(matches!(err, MetricsError::InvalidInput(_)), "{}", bad);
        }
    }

    #[test]
    fn test_validate_granularity_is_idempotent() {
        for value in ["1s", "5m", "12h", "7d", "2w", "1mo", "1q", "10y"] {
            let once = validate_granularity(value).unwrap();
            assert_eq!(validate_granularity(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_pick_default_granularity() {
        let declared = SourceInfo {
            default_granularity: Some("15m".to_string()),
            available_granularities: vec!["1h".to_string()],
        };
        assert_eq!(declared.pick_default(), "15m");

        let prefers_hour = SourceInfo {
            default_granularity: None,
            available_granularities: vec!["1m".to_string(), "1d".to_string(), "1h".to_string()],
        };
        assert_eq!(prefers_hour.pick_default(), "1h");

        let day_only = SourceInfo {
            default_granularity: Some(String::new()),
            available_granularities: vec!["1w".to_string(), "1d".to_string()],
        };
        assert_eq!(day_only.pick_default(), "1d");

        let first = SourceInfo {
            default_granularity: None,
            available_granularities: vec!["1w".to_string(), "1mo".to_string()],
        };
        assert_eq!(first.pick_default(), "1w");

        assert_eq!(SourceInfo::default().pick_default(), "1h");
    }

    #[test]
    fn test_resolve_granularity_prefers_explicit() {
        let source = SourceInfo::default();
        assert_eq!(resolve_granularity(Some("1D"), &source).unwrap(), "1d");
        assert_eq!(resolve_granularity(Some(""), &source).unwrap(), "1h");
        assert!(resolve_granularity(Some("daily"), &source).is_err());
    }
}
