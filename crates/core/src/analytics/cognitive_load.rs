//! Cognitive load scoring
//!
//! Scores one working day from meeting density, context switches,
//! fragmentation and available deep-work blocks.

use crate::analytics::working_hours::day_bounds;
use crate::classify::classify_title;
use crate::models::{CanonicalEvent, WorkingHoursConfig};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use utoipa::ToSchema;

const DEEP_WORK_GAP_MINUTES: i64 = 120;
const FRAGMENT_GAP_MINUTES: i64 = 60;

/// Cognitive load result for one day
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct CognitiveLoad {
    /// Composite score in `[0, 100]`
    pub score: u32,
    /// Percentage of working minutes occupied by busy events
    pub meeting_density: f64,
    /// Adjacent meeting pairs resolving to different categories
    pub context_switches: u32,
    /// Gaps ≥ 120 min inside working hours
    pub deep_work_blocks: u32,
    /// Gaps under 60 min between meetings
    pub fragmentation: u32,
}

/// Busy intervals clipped to the day bounds, sorted by start
fn busy_intervals(
    events: &[CanonicalEvent],
    bounds_start: DateTime<Utc>,
    bounds_end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>, String)> {
    let mut intervals: Vec<(DateTime<Utc>, DateTime<Utc>, String)> = events
        .iter()
        .filter(|e| e.is_busy())
        .filter_map(|e| {
            let start = e.sort_instant()?;
            let end = e.end_instant()?;
            if end <= bounds_start || start >= bounds_end {
                return None;
            }
            Some((start.max(bounds_start), end.min(bounds_end), e.title.clone()))
        })
        .collect();
    intervals.sort_by_key(|(start, _, _)| *start);
    intervals
}

/// Minutes covered by the union of the intervals
fn occupied_minutes(intervals: &[(DateTime<Utc>, DateTime<Utc>, String)]) -> i64 {
    let mut total = 0;
    let mut cursor: Option<DateTime<Utc>> = None;
    for (start, end, _) in intervals {
        let effective_start = match cursor {
            Some(c) if *start < c => c,
            _ => *start,
        };
        if *end > effective_start {
            total += (*end - effective_start).num_minutes();
        }
        cursor = Some(cursor.map_or(*end, |c| c.max(*end)));
    }
    total
}

/// Score one working day.
///
/// `score = 0.40·density + 0.25·switch_load + 0.15·fragment_load +
/// 0.20·deep_work_penalty`, each term normalized to 100. A day with no
/// events scores 0.
pub fn daily_cognitive_load(
    events: &[CanonicalEvent],
    date: NaiveDate,
    config: &WorkingHoursConfig,
) -> CognitiveLoad {
    let Some(bounds) = day_bounds(date, config) else {
        return CognitiveLoad::default();
    };

    let intervals = busy_intervals(events, bounds.start, bounds.end);
    if intervals.is_empty() {
        return CognitiveLoad::default();
    }

    let working_minutes = bounds.minutes().max(1);
    let meeting_density = occupied_minutes(&intervals) as f64 / working_minutes as f64 * 100.0;

    let mut context_switches = 0u32;
    let mut fragmentation = 0u32;
    let mut deep_work_blocks = 0u32;

    for pair in intervals.windows(2) {
        let (_, prev_end, prev_title) = &pair[0];
        let (next_start, _, next_title) = &pair[1];

        if classify_title(prev_title) != classify_title(next_title) {
            context_switches += 1;
        }

        let gap = (*next_start - *prev_end).num_minutes();
        if gap > 0 && gap < FRAGMENT_GAP_MINUTES {
            fragmentation += 1;
        }
        if gap >= DEEP_WORK_GAP_MINUTES {
            deep_work_blocks += 1;
        }
    }

    // Leading and trailing free time also counts toward deep work
    if let (Some((first_start, _, _)), Some((_, last_end, _))) =
        (intervals.first(), intervals.last())
    {
        if (*first_start - bounds.start).num_minutes() >= DEEP_WORK_GAP_MINUTES {
            deep_work_blocks += 1;
        }
        if (bounds.end - *last_end).num_minutes() >= DEEP_WORK_GAP_MINUTES {
            deep_work_blocks += 1;
        }
    }

    let switch_load = f64::from(context_switches.min(15)) * (100.0 / 15.0);
    let fragment_load = f64::from(fragmentation.min(10)) * (100.0 / 10.0);
    let deep_work_penalty = 100.0 - f64::from((deep_work_blocks * 33).min(100));

    let score = (0.40 * meeting_density
        + 0.25 * switch_load
        + 0.15 * fragment_load
        + 0.20 * deep_work_penalty)
        .round()
        .clamp(0.0, 100.0) as u32;

    CognitiveLoad {
        score,
        meeting_density,
        context_switches,
        deep_work_blocks,
        fragmentation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::test_event;
    use chrono::TimeZone;

    fn meeting(title: &str, hour: u32, duration_minutes: i64) -> CanonicalEvent {
        let mut event = test_event();
        event.title = title.to_string();
        event.start = Some(Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap());
        event.end =
            Some(event.start.unwrap() + chrono::Duration::minutes(duration_minutes));
        event
    }

    fn march_2() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn test_empty_day_scores_zero() {
        let load = daily_cognitive_load(&[], march_2(), &WorkingHoursConfig::default());
        assert_eq!(load.score, 0);
        assert_eq!(load.meeting_density, 0.0);
    }

    #[test]
    fn test_packed_day() {
        // Seven back-to-back one-hour meetings 09:00-16:00 with alternating
        // categories, working hours 09-17.
        let titles = [
            "Sprint standup",
            "Acme demo",
            "Candidate interview",
            "Deep work: write-up",
            "Team 1:1",
            "Incident review",
            "Pipeline sync",
        ];
        let events: Vec<CanonicalEvent> = titles
            .iter()
            .enumerate()
            .map(|(i, title)| meeting(title, 9 + i as u32, 60))
            .collect();

        let load = daily_cognitive_load(&events, march_2(), &WorkingHoursConfig::default());

        assert_eq!(load.context_switches, 6);
        assert!(load.deep_work_blocks <= 1);
        assert!(load.meeting_density >= 75.0 && load.meeting_density <= 90.0);
        assert!(load.score >= 60, "score was {}", load.score);
    }

    #[test]
    fn test_light_day_scores_low() {
        let events = vec![meeting("Team 1:1", 11, 30)];
        let load = daily_cognitive_load(&events, march_2(), &WorkingHoursConfig::default());

        assert_eq!(load.context_switches, 0);
        assert!(load.meeting_density < 10.0);
        // Two deep-work blocks flank the single meeting, zeroing the penalty
        assert_eq!(load.deep_work_blocks, 2);
        assert!(load.score < 30);
    }

    #[test]
    fn test_fragmented_day() {
        // Meetings with 30-minute gaps between them
        let events = vec![
            meeting("Standup", 9, 60),
            {
                let mut e = meeting("Sync", 10, 60);
                e.start = Some(Utc.with_ymd_and_hms(2026, 3, 2, 10, 30, 0).unwrap());
                e.end = Some(Utc.with_ymd_and_hms(2026, 3, 2, 11, 30, 0).unwrap());
                e
            },
            {
                let mut e = meeting("Budget review", 12, 60);
                e.start = Some(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap());
                e.end = Some(Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap());
                e
            },
        ];
        let load = daily_cognitive_load(&events, march_2(), &WorkingHoursConfig::default());
        assert_eq!(load.fragmentation, 2);
    }

    #[test]
    fn test_cancelled_and_transparent_events_ignored() {
        let mut cancelled = meeting("Standup", 9, 60);
        cancelled.status = crate::models::EventStatus::Cancelled;
        let mut transparent = meeting("Focus block", 10, 60);
        transparent.transparency = crate::models::Transparency::Transparent;

        let load = daily_cognitive_load(
            &[cancelled, transparent],
            march_2(),
            &WorkingHoursConfig::default(),
        );
        assert_eq!(load.score, 0);
    }
}
