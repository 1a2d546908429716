//! Backup cadence parsing.
//!
//! Accepted forms (case-insensitive, UTC):
//! `daily at HH:MM`, `hourly`, `every N minutes`, `every N hours`
//! (`min`/`m` and `h` suffixes are also accepted, e.g. `every 30m`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupSchedule {
    /// Once per day at a fixed wall-clock time.
    DailyAt(NaiveTime),
    /// Fixed period measured from the previous firing.
    Every(Duration),
}

impl BackupSchedule {
    /// First firing strictly after `now`.
    #[must_use]
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::DailyAt(time) => {
                let today = now.date_naive().and_time(time).and_utc();
                if today > now { today } else { today + Duration::days(1) }
            },
            Self::Every(period) => now + period,
        }
    }
}

fn parse_period(amount: &str, unit: &str) -> Option<Duration> {
    let n: i64 = amount.parse().ok().filter(|n| *n > 0)?;
    match unit {
        "m" | "min" | "mins" | "minute" | "minutes" => Some(Duration::minutes(n)),
        "h" | "hour" | "hours" => Some(Duration::hours(n)),
        _ => None,
    }
}

impl FromStr for BackupSchedule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let words: Vec<&str> = normalized.split_whitespace().collect();
        let invalid = || ConfigError::Invalid(format!("unrecognized backup schedule {s:?}"));

        match words.as_slice() {
            ["daily", "at", time] => NaiveTime::parse_from_str(time, "%H:%M")
                .map(Self::DailyAt)
                .map_err(|_| invalid()),
            ["daily"] => Ok(Self::DailyAt(NaiveTime::MIN)),
            ["hourly"] => Ok(Self::Every(Duration::hours(1))),
            ["every", amount, unit] => parse_period(amount, unit).map(Self::Every).ok_or_else(invalid),
            ["every", compact] => {
                let split = compact.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
                let (amount, unit) = compact.split_at(split);
                parse_period(amount, unit).map(Self::Every).ok_or_else(invalid)
            },
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for BackupSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyAt(time) => write!(f, "daily at {}", time.format("%H:%M")),
            Self::Every(period) if period.num_minutes() % 60 == 0 => {
                write!(f, "every {} hours", period.num_hours())
            },
            Self::Every(period) => write!(f, "every {} minutes", period.num_minutes()),
        }
    }
}

impl Serialize for BackupSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BackupSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_default_daily_schedule() {
        let schedule: BackupSchedule = "daily at 02:00".parse().unwrap();
        assert_eq!(schedule, BackupSchedule::DailyAt(NaiveTime::from_hms_opt(2, 0, 0).unwrap()));
        assert_eq!(schedule.to_string(), "daily at 02:00");
    }

    #[test]
    fn parses_periodic_forms() {
        assert_eq!("hourly".parse::<BackupSchedule>().unwrap(), BackupSchedule::Every(Duration::hours(1)));
        assert_eq!(
            "every 15 minutes".parse::<BackupSchedule>().unwrap(),
            BackupSchedule::Every(Duration::minutes(15))
        );
        assert_eq!("Every 6h".parse::<BackupSchedule>().unwrap(), BackupSchedule::Every(Duration::hours(6)));
    }

    #[test]
    fn rejects_garbage() {
        assert!("daily at 25:00".parse::<BackupSchedule>().is_err());
        assert!("every 0 hours".parse::<BackupSchedule>().is_err());
        assert!("weekly".parse::<BackupSchedule>().is_err());
        assert!("every h".parse::<BackupSchedule>().is_err());
    }

    #[test]
    fn daily_rolls_over_to_tomorrow() {
        let schedule: BackupSchedule = "daily at 02:00".parse().unwrap();
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        assert_eq!(schedule.next_after(before), at);
        assert_eq!(schedule.next_after(at), Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap());
    }
}
