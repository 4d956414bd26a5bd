//! Storage library configuration
//!
//! Zone, week start, identifier layout, granularity set and write
//! buffering policy shared by every local driver.

use super::driver::JoinedIdentifier;
use super::error::{StatsError, StatsResult};
use chrono::{FixedOffset, Offset, Utc, Weekday};
use std::time::Duration;

/// Granularities tracked when none are configured
pub const DEFAULT_GRANULARITIES: [&str; 7] = ["1m", "1h", "1d", "1w", "1mo", "1q", "1y"];

/// Default key separator used when joining identifiers
pub const DEFAULT_SEPARATOR: &str = "::";

/// Drivers whose engines benefit from batched writes
pub const BUFFERED_BY_DEFAULT: [&str; 3] = ["sqlite", "postgres", "mysql"];

/// Library configuration
#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub time_zone: FixedOffset,
    pub beginning_of_week: Weekday,
    pub separator: String,
    pub joined: JoinedIdentifier,
    /// Explicit granularities; empty means [`DEFAULT_GRANULARITIES`]
    pub granularities: Vec<String>,
    pub buffer: BufferOptions,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            time_zone: utc(),
            beginning_of_week: Weekday::Mon,
            separator: DEFAULT_SEPARATOR.to_string(),
            joined: JoinedIdentifier::Full,
            granularities: Vec::new(),
            buffer: BufferOptions::default(),
        }
    }
}

impl StatsConfig {
    /// Granularities every write is recorded at
    pub fn effective_granularities(&self) -> Vec<String> {
        if self.granularities.is_empty() {
            DEFAULT_GRANULARITIES.iter().map(|g| g.to_string()).collect()
        } else {
            self.granularities.clone()
        }
    }
}

/// Write buffering policy
#[derive(Debug, Clone, PartialEq)]
pub struct BufferOptions {
    pub enabled: bool,
    /// Flush once this much time has passed since the last flush
    pub duration: Duration,
    /// Flush once this many operations are queued
    pub size: usize,
    /// Merge queued operations targeting the same buckets
    pub aggregate: bool,
    /// Recorded for compatibility; flushes are always awaited inline
    pub async_flush: bool,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: Duration::from_secs(1),
            size: 256,
            aggregate: true,
            async_flush: true,
        }
    }
}

/// Decide whether `driver` buffers writes.
///
/// `mode` forces buffering on or off; `auto` (or anything unrecognized)
/// enables it for the relational and embedded drivers. A non-empty
/// `allowed` list further restricts which drivers may buffer.
pub fn buffer_enabled(mode: &str, allowed: &[String], driver: &str) -> bool {
    let enabled = match mode.trim().to_lowercase().as_str() {
        "always" | "on" | "enabled" | "true" | "yes" => true,
        "never" | "off" | "disabled" | "false" | "no" => false,
        _ => BUFFERED_BY_DEFAULT.contains(&driver),
    };

    let allowed: Vec<String> = allowed
        .iter()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .map(|d| if d == "mongodb" { "mongo".to_string() } else { d })
        .collect();

    if allowed.is_empty() {
        enabled
    } else {
        enabled && allowed.iter().any(|d| d == driver)
    }
}

pub(crate) fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parse a week start day (`monday`..`sunday` or three-letter forms).
pub fn parse_weekday(input: &str) -> StatsResult<Weekday> {
    match input.trim().to_lowercase().as_str() {
        "monday" | "mon" => Ok(Weekday::Mon),
        "tuesday" | "tue" => Ok(Weekday::Tue),
        "wednesday" | "wed" => Ok(Weekday::Wed),
        "thursday" | "thu" => Ok(Weekday::Thu),
        "friday" | "fri" => Ok(Weekday::Fri),
        "saturday" | "sat" => Ok(Weekday::Sat),
        "sunday" | "sun" => Ok(Weekday::Sun),
        _ => Err(StatsError::Config(format!("invalid week-start: {}", input))),
    }
}

/// Parse an identifier layout name.
pub fn parse_joined(input: &str) -> StatsResult<JoinedIdentifier> {
    match input.trim().to_lowercase().as_str() {
        "full" | "" => Ok(JoinedIdentifier::Full),
        "partial" => Ok(JoinedIdentifier::Partial),
        "separated" | "none" | "null" => Ok(JoinedIdentifier::Separated),
        _ => Err(StatsError::Config(format!("invalid joined mode: {}", input))),
    }
}

/// Parse a fixed-offset zone: `UTC`, `GMT`, `Z`, or `±HH:MM`.
pub fn parse_time_zone(input: &str) -> StatsResult<FixedOffset> {
    let value = input.trim().to_uppercase();
    match value.as_str() {
        "" | "UTC" | "GMT" | "Z" | "ETC/UTC" | "ETC/GMT" => return Ok(utc()),
        _ => {}
    }

    let invalid = || {
        StatsError::Config(format!(
            "invalid timezone: {} (expected UTC, GMT or an offset like +02:00)",
            input
        ))
    };

    let stripped = value
        .strip_prefix("UTC")
        .or_else(|| value.strip_prefix("GMT"))
        .unwrap_or(value.as_str());
    let (sign, rest) = match stripped.chars().next() {
        Some('+') => (1, &stripped[1..]),
        Some('-') => (-1, &stripped[1..]),
        _ => return Err(invalid()),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = if digits.len() <= 2 {
        (digits.parse::<i32>().map_err(|_| invalid())?, 0)
    } else {
        let (h, m) = digits.split_at(digits.len() - 2);
        (
            h.parse::<i32>().map_err(|_| invalid())?,
            m.parse::<i32>().map_err(|_| invalid())?,
        )
    };
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Split a comma-separated granularity list, dropping blanks.
pub fn parse_granularities(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|g| g.trim().to_lowercase())
        .filter(|g| !g.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_buffer_auto_mode() {
        assert!(buffer_enabled("auto", &[], "sqlite"));
        assert!(buffer_enabled("", &[], "postgres"));
        assert!(buffer_enabled("default", &[], "mysql"));
        assert!(!buffer_enabled("auto", &[], "redis"));
        assert!(!buffer_enabled("auto", &[], "mongo"));
        assert!(buffer_enabled("whatever", &[], "sqlite"));
    }

    #[test]
    fn test_buffer_forced_modes() {
        assert!(buffer_enabled("on", &[], "redis"));
        assert!(buffer_enabled("YES", &[], "mongo"));
        assert!(!buffer_enabled("off", &[], "sqlite"));
        assert!(!buffer_enabled("never", &[], "postgres"));
    }

    #[test]
    fn test_buffer_allow_list() {
        let allowed = list(&["sqlite", " MongoDB "]);
        assert!(buffer_enabled("on", &allowed, "sqlite"));
        assert!(buffer_enabled("on", &allowed, "mongo"));
        assert!(!buffer_enabled("on", &allowed, "redis"));
        assert!(!buffer_enabled("auto", &allowed, "postgres"));
        assert!(!buffer_enabled("off", &allowed, "sqlite"));
    }

    #[test]
    fn test_parse_weekday() {
        assert_eq!(parse_weekday("Sunday").unwrap(), Weekday::Sun);
        assert_eq!(parse_weekday("wed").unwrap(), Weekday::Wed);
        assert!(parse_weekday("someday").is_err());
    }

    #[test]
    fn test_parse_joined() {
        assert_eq!(parse_joined("").unwrap(), JoinedIdentifier::Full);
        assert_eq!(parse_joined("Partial").unwrap(), JoinedIdentifier::Partial);
        assert_eq!(parse_joined("null").unwrap(), JoinedIdentifier::Separated);
        assert!(parse_joined("halfway").is_err());
    }

    #[test]
    fn test_parse_time_zone() {
        assert_eq!(parse_time_zone("GMT").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_time_zone("+02:00").unwrap().local_minus_utc(), 7200);
        assert_eq!(parse_time_zone("-0530").unwrap().local_minus_utc(), -19800);
        assert_eq!(parse_time_zone("UTC+3").unwrap().local_minus_utc(), 10800);
        assert!(parse_time_zone("Europe/Berlin").is_err());
        assert!(parse_time_zone("+02:75").is_err());
    }

    #[test]
    fn test_effective_granularities() {
        let config = StatsConfig::default();
        assert_eq!(config.effective_granularities().len(), DEFAULT_GRANULARITIES.len());

        let config = StatsConfig {
            granularities: parse_granularities(" 1H, ,1d "),
            ..StatsConfig::default()
        };
        assert_eq!(config.effective_granularities(), list(&["1h", "1d"]));
    }
}
