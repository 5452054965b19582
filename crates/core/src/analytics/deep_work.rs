//! Deep-work detection
//!
//! Finds maximal free blocks inside working hours and proposes meeting
//! consolidation when a day's schedule scatters short meetings across what
//! could be protected time.

use crate::analytics::working_hours::{day_bounds, working_days_between};
use crate::models::{CanonicalEvent, WorkingHoursConfig};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use utoipa::ToSchema;

const DEEP_WORK_MIN_MINUTES: i64 = 120;
const SHORT_MEETING_MAX_MINUTES: i64 = 60;
const CONSOLIDATION_MIN_MEETINGS: usize = 3;
/// Weekly protected-hours target per working day
const PROTECTED_HOURS_PER_DAY: f64 = 4.0;

/// One protected block of uninterrupted time
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeepWorkBlock {
    #[schema(value_type = String)]
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub minutes: i64,
}

/// Suggestion to consolidate scattered short meetings into one block
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConsolidationSuggestion {
    #[schema(value_type = String)]
    pub date: NaiveDate,
    pub meeting_titles: Vec<String>,
    /// Between-meeting minutes freed into a qualifying block
    pub estimated_gain_minutes: i64,
}

/// Deep-work analysis over a date range
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct DeepWorkAnalysis {
    pub blocks: Vec<DeepWorkBlock>,
    pub total_minutes: i64,
    /// `4 h × working days` in the analyzed range
    pub protected_hours_target: f64,
    pub suggestions: Vec<ConsolidationSuggestion>,
}

/// Analyze deep work over the half-open date range `[start, end)`.
pub fn analyze_deep_work(
    events: &[CanonicalEvent],
    start: NaiveDate,
    end: NaiveDate,
    config: &WorkingHoursConfig,
) -> DeepWorkAnalysis {
    let mut analysis = DeepWorkAnalysis {
        protected_hours_target: PROTECTED_HOURS_PER_DAY
            * f64::from(working_days_between(start, end, config)),
        ..DeepWorkAnalysis::default()
    };

    let mut day = start;
    while day < end {
        if let Some(bounds) = day_bounds(day, config) {
            analyze_day(events, day, bounds.start, bounds.end, &mut analysis);
        }
        day += chrono::Duration::days(1);
    }

    analysis.total_minutes = analysis.blocks.iter().map(|b| b.minutes).sum();
    analysis
}

fn analyze_day(
    events: &[CanonicalEvent],
    date: NaiveDate,
    bounds_start: DateTime<Utc>,
    bounds_end: DateTime<Utc>,
    analysis: &mut DeepWorkAnalysis,
) {
    // Busy meetings clipped to the day's working hours, in time order
    let mut meetings: Vec<(DateTime<Utc>, DateTime<Utc>, &str)> = events
        .iter()
        .filter(|e| e.is_busy())
        .filter_map(|e| {
            let start = e.sort_instant()?;
            let end = e.end_instant()?;
            if end <= bounds_start || start >= bounds_end {
                return None;
            }
            Some((
                start.max(bounds_start),
                end.min(bounds_end),
                e.title.as_str(),
            ))
        })
        .collect();
    meetings.sort_by_key(|(start, _, _)| *start);

    // Walk the free gaps, including leading and trailing time
    let mut cursor = bounds_start;
    let mut push_gap = |gap_start: DateTime<Utc>, gap_end: DateTime<Utc>| {
        let minutes = (gap_end - gap_start).num_minutes();
        if minutes >= DEEP_WORK_MIN_MINUTES {
            analysis.blocks.push(DeepWorkBlock {
                date,
                start: gap_start,
                end: gap_end,
                minutes,
            });
        }
    };

    for (start, end, _) in &meetings {
        if *start > cursor {
            push_gap(cursor, *start);
        }
        cursor = cursor.max(*end);
    }
    if bounds_end > cursor {
        push_gap(cursor, bounds_end);
    }

    // Consolidation: three or more short meetings whose in-between gaps would
    // add up to a qualifying block if the meetings ran back to back.
    let short: Vec<&(DateTime<Utc>, DateTime<Utc>, &str)> = meetings
        .iter()
        .filter(|(start, end, _)| (*end - *start).num_minutes() <= SHORT_MEETING_MAX_MINUTES)
        .collect();

    if short.len() >= CONSOLIDATION_MIN_MEETINGS {
        let gained: i64 = short
            .windows(2)
            .map(|pair| ((pair[1].0 - pair[0].1).num_minutes()).max(0))
            .sum();
        if gained >= DEEP_WORK_MIN_MINUTES {
            analysis.suggestions.push(ConsolidationSuggestion {
                date,
                meeting_titles: short.iter().map(|(_, _, t)| (*t).to_string()).collect(),
                estimated_gain_minutes: gained,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::test_event;
    use chrono::TimeZone;

    fn meeting(title: &str, day: u32, hour: u32, minute: u32, len_minutes: i64) -> CanonicalEvent {
        let mut event = test_event();
        event.title = title.to_string();
        event.start = Some(Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap());
        event.end = Some(event.start.unwrap() + chrono::Duration::minutes(len_minutes));
        event
    }

    fn range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
        )
    }

    #[test]
    fn test_free_day_is_one_block() {
        let (start, end) = range();
        let analysis = analyze_deep_work(&[], start, end, &WorkingHoursConfig::default());

        assert_eq!(analysis.blocks.len(), 1);
        assert_eq!(analysis.blocks[0].minutes, 480);
        assert_eq!(analysis.total_minutes, 480);
        assert_eq!(analysis.protected_hours_target, 4.0);
    }

    #[test]
    fn test_midday_meeting_splits_blocks() {
        let (start, end) = range();
        let events = vec![meeting("Team 1:1", 2, 12, 0, 60)];
        let analysis = analyze_deep_work(&events, start, end, &WorkingHoursConfig::default());

        assert_eq!(analysis.blocks.len(), 2);
        assert_eq!(analysis.blocks[0].minutes, 180); // 09:00-12:00
        assert_eq!(analysis.blocks[1].minutes, 240); // 13:00-17:00
    }

    #[test]
    fn test_short_gaps_do_not_qualify() {
        let (start, end) = range();
        // Meetings every 90 minutes leave only sub-2h gaps
        let events = vec![
            meeting("Standup", 2, 9, 0, 30),
            meeting("Sync", 2, 11, 0, 30),
            meeting("Review", 2, 13, 0, 30),
            meeting("Check-in", 2, 15, 0, 30),
            meeting("Wrap", 2, 16, 45, 15),
        ];
        let analysis = analyze_deep_work(&events, start, end, &WorkingHoursConfig::default());
        assert!(analysis.blocks.is_empty());
    }

    #[test]
    fn test_consolidation_suggested_for_scattered_short_meetings() {
        let (start, end) = range();
        // Three 30-minute meetings with 90-minute gaps: 180 minutes of
        // in-between time would fuse into a qualifying block.
        let events = vec![
            meeting("Standup", 2, 9, 0, 30),
            meeting("Sync", 2, 11, 0, 30),
            meeting("Check-in", 2, 13, 0, 30),
        ];
        let analysis = analyze_deep_work(&events, start, end, &WorkingHoursConfig::default());

        assert_eq!(analysis.suggestions.len(), 1);
        let suggestion = &analysis.suggestions[0];
        assert_eq!(suggestion.meeting_titles.len(), 3);
        assert_eq!(suggestion.estimated_gain_minutes, 180);
    }

    #[test]
    fn test_weekly_target_scales_with_working_days() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let analysis = analyze_deep_work(&[], start, end, &WorkingHoursConfig::default());
        assert_eq!(analysis.protected_hours_target, 20.0);
    }
}
