//! Working-hours interpretation
//!
//! Resolves a [`WorkingHoursConfig`] into concrete UTC bounds for a given
//! calendar day, honoring the configured IANA timezone.

use crate::models::WorkingHoursConfig;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// UTC bounds of one working day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayBounds {
    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Compute the UTC working-hours bounds for `date`, or `None` when the date
/// falls outside the configured working days.
pub fn day_bounds(date: NaiveDate, config: &WorkingHoursConfig) -> Option<DayBounds> {
    let weekday = date.weekday().number_from_monday() as u8;
    if !config.days.contains(&weekday) {
        return None;
    }
    if config.end_minute <= config.start_minute {
        return None;
    }

    let tz: Tz = config.timezone.parse().unwrap_or(chrono_tz::UTC);
    let at_minute = |minute: u32| {
        let time = date.and_hms_opt(minute / 60, minute % 60, 0)?;
        tz.from_local_datetime(&time)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    };

    Some(DayBounds {
        start: at_minute(config.start_minute)?,
        end: at_minute(config.end_minute)?,
    })
}

/// Number of working days in the half-open date range `[start, end)`
pub fn working_days_between(start: NaiveDate, end: NaiveDate, config: &WorkingHoursConfig) -> u32 {
    let mut count = 0;
    let mut day = start;
    while day < end {
        let weekday = day.weekday().number_from_monday() as u8;
        if config.days.contains(&weekday) {
            count += 1;
        }
        day += chrono::Duration::days(1);
    }
    count
}
