//! Time bucketing
//!
//! Floors instants to granularity boundaries in the configured zone and
//! walks bucket timelines between two instants.

use super::error::{StatsError, StatsResult};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, TimeZone,
    Timelike, Weekday,
};

/// Upper bound on buckets produced for a single read
pub const MAX_TIMELINE_POINTS: usize = 100_000;

/// Calendar unit of a granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

/// A parsed granularity such as `15m` or `1mo`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Granularity {
    pub amount: u32,
    pub unit: Unit,
}

impl Granularity {
    /// Parse `<number><unit>`; the amount must be positive.
    pub fn parse(value: &str) -> StatsResult<Self> {
        let normalized = value.trim().to_lowercase();
        let split = normalized
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| StatsError::InvalidGranularity(value.to_string()))?;
        let (digits, suffix) = normalized.split_at(split);

        let amount: u32 = digits
            .parse()
            .map_err(|_| StatsError::InvalidGranularity(value.to_string()))?;
        if amount == 0 {
            return Err(StatsError::InvalidGranularity(value.to_string()));
        }

        let unit = match suffix {
            "s" => Unit::Second,
            "m" => Unit::Minute,
            "h" => Unit::Hour,
            "d" => Unit::Day,
            "w" => Unit::Week,
            "mo" => Unit::Month,
            "q" => Unit::Quarter,
            "y" => Unit::Year,
            _ => return Err(StatsError::InvalidGranularity(value.to_string())),
        };

        Ok(Self { amount, unit })
    }

    /// Start of the bucket containing `at`, expressed in `tz`.
    pub fn floor(
        &self,
        at: DateTime<FixedOffset>,
        tz: FixedOffset,
        week_start: Weekday,
    ) -> StatsResult<DateTime<FixedOffset>> {
        let local = at.with_timezone(&tz).naive_local();
        let date = local.date();
        let n = self.amount;

        let floored: Option<NaiveDateTime> = match self.unit {
            Unit::Second => {
                date.and_hms_opt(local.hour(), local.minute(), local.second() - local.second() % n)
            }
            Unit::Minute => {
                date.and_hms_opt(local.hour(), local.minute() - local.minute() % n, 0)
            }
            Unit::Hour => date.and_hms_opt(local.hour() - local.hour() % n, 0, 0),
            Unit::Day => date.and_hms_opt(0, 0, 0),
            Unit::Week => {
                let back = (date.weekday().num_days_from_monday() + 7
                    - week_start.num_days_from_monday())
                    % 7;
                (date - Duration::days(i64::from(back))).and_hms_opt(0, 0, 0)
            }
            Unit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            Unit::Quarter => {
                let month = (date.month() - 1) / 3 * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
            Unit::Year => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
        };

        floored
            .and_then(|naive| tz.from_local_datetime(&naive).single())
            .ok_or_else(|| StatsError::Range(format!("cannot floor {} to {:?}", at, self.unit)))
    }

    /// Start of the bucket following the one starting at `at`.
    ///
    /// `None` when the next bucket lies outside the representable range.
    pub fn advance(&self, at: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let n = i64::from(self.amount);
        let step = match self.unit {
            Unit::Second => Duration::try_seconds(n),
            Unit::Minute => Duration::try_minutes(n),
            Unit::Hour => Duration::try_hours(n),
            Unit::Day => Duration::try_days(n),
            Unit::Week => Duration::try_weeks(n),
            Unit::Month => return at.checked_add_months(Months::new(self.amount)),
            Unit::Quarter => {
                let months = self.amount.checked_mul(3)?;
                return at.checked_add_months(Months::new(months));
            }
            Unit::Year => {
                let months = self.amount.checked_mul(12)?;
                return at.checked_add_months(Months::new(months));
            }
        };
        step.and_then(|step| at.checked_add_signed(step))
    }
}

/// Bucket starts from the bucket containing `from` up to `to` inclusive.
///
/// An inverted range yields an empty timeline.
pub fn timeline(
    from: DateTime<FixedOffset>,
    to: DateTime<FixedOffset>,
    granularity: &Granularity,
    tz: FixedOffset,
    week_start: Weekday,
) -> StatsResult<Vec<DateTime<FixedOffset>>> {
    let mut points = Vec::new();
    if from > to {
        return Ok(points);
    }

    let mut current = granularity.floor(from, tz, week_start)?;
    while current <= to {
        points.push(current);
        if points.len() > MAX_TIMELINE_POINTS {
            return Err(StatsError::Range(format!(
                "time range spans more than {} buckets; use a coarser granularity",
                MAX_TIMELINE_POINTS
            )));
        }
        current = match granularity.advance(current) {
            Some(next) => next,
            None => break,
        };
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(value).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            Granularity::parse("15m").unwrap(),
            Granularity { amount: 15, unit: Unit::Minute }
        );
        assert_eq!(Granularity::parse("1mo").unwrap().unit, Unit::Month);
        assert!(Granularity::parse("0h").is_err());
        assert!(Granularity::parse("h").is_err());
        assert!(Granularity::parse("1x").is_err());
        assert!(Granularity::parse("12").is_err());
    }

    #[test]
    fn test_floor_minutes_and_hours() {
        let g = Granularity::parse("15m").unwrap();
        let floored = g.floor(at("2024-01-02T15:44:05Z"), utc(), Weekday::Mon).unwrap();
        assert_eq!(floored, at("2024-01-02T15:30:00Z"));

        let g = Granularity::parse("1h").unwrap();
        let floored = g.floor(at("2024-01-02T15:44:05Z"), utc(), Weekday::Mon).unwrap();
        assert_eq!(floored, at("2024-01-02T15:00:00Z"));
    }

    #[test]
    fn test_floor_day_uses_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let g = Granularity::parse("1d").unwrap();
        // 23:30 UTC is already the next day at +02:00
        let floored = g.floor(at("2024-01-02T23:30:00Z"), tz, Weekday::Mon).unwrap();
        assert_eq!(floored, at("2024-01-03T00:00:00+02:00"));
    }

    #[test]
    fn test_floor_week_start() {
        let g = Granularity::parse("1w").unwrap();
        // 2024-01-04 is a Thursday
        let monday = g.floor(at("2024-01-04T10:00:00Z"), utc(), Weekday::Mon).unwrap();
        assert_eq!(monday, at("2024-01-01T00:00:00Z"));
        let sunday = g.floor(at("2024-01-04T10:00:00Z"), utc(), Weekday::Sun).unwrap();
        assert_eq!(sunday, at("2023-12-31T00:00:00Z"));
    }

    #[test]
    fn test_floor_calendar_units() {
        let moment = at("2024-08-17T10:00:00Z");
        let month = Granularity::parse("1mo").unwrap();
        let quarter = Granularity::parse("1q").unwrap();
        let year = Granularity::parse("1y").unwrap();
        assert_eq!(month.floor(moment, utc(), Weekday::Mon).unwrap(), at("2024-08-01T00:00:00Z"));
        assert_eq!(quarter.floor(moment, utc(), Weekday::Mon).unwrap(), at("2024-07-01T00:00:00Z"));
        assert_eq!(year.floor(moment, utc(), Weekday::Mon).unwrap(), at("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_advance_calendar_units() {
        let g = Granularity::parse("1mo").unwrap();
        assert_eq!(g.advance(at("2024-01-01T00:00:00Z")), Some(at("2024-02-01T00:00:00Z")));
        let q = Granularity::parse("1q").unwrap();
        assert_eq!(q.advance(at("2024-10-01T00:00:00Z")), Some(at("2025-01-01T00:00:00Z")));
    }

    #[test]
    fn test_advance_past_range_ends() {
        let start = at("2024-01-01T00:00:00Z");
        for value in ["400000000y", "2000000000q", "4000000000mo", "4000000000w", "4000000000d"] {
            let g = Granularity::parse(value).unwrap();
            assert_eq!(g.advance(start), None, "{}", value);
        }
    }

    #[test]
    fn test_timeline_with_huge_granularity() {
        let g = Granularity::parse("400000000y").unwrap();
        let points = timeline(
            at("2024-01-02T00:30:00Z"),
            at("2024-03-02T03:00:00Z"),
            &g,
            utc(),
            Weekday::Mon,
        )
        .unwrap();
        assert_eq!(points, vec![at("2024-01-01T00:00:00Z")]);
    }

    #[test]
    fn test_timeline_inclusive() {
        let g = Granularity::parse("1h").unwrap();
        let points = timeline(
            at("2024-01-02T00:30:00Z"),
            at("2024-01-02T03:00:00Z"),
            &g,
            utc(),
            Weekday::Mon,
        )
        .unwrap();
        assert_eq!(points.len(), 4);
        assert_eq!(points[0], at("2024-01-02T00:00:00Z"));
        assert_eq!(points[3], at("2024-01-02T03:00:00Z"));
    }

    #[test]
    fn test_timeline_inverted_is_empty() {
        let g = Granularity::parse("1h").unwrap();
        let points = timeline(
            at("2024-01-03T00:00:00Z"),
            at("2024-01-02T00:00:00Z"),
            &g,
            utc(),
            Weekday::Mon,
        )
        .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_timeline_rejects_huge_ranges() {
        let g = Granularity::parse("1s").unwrap();
        let result = timeline(
            at("2020-01-01T00:00:00Z"),
            at("2024-01-01T00:00:00Z"),
            &g,
            utc(),
            Weekday::Mon,
        );
        assert!(matches!(result, Err(StatsError::Range(_))));
    }
}
