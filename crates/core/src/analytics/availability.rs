//! Probabilistic availability
//!
//! Treats each event as an independent busy signal and derives per-slot
//! free probabilities. Recurring series with a cancellation history count
//! proportionally less.

use crate::models::{CanonicalEvent, EventStatus};
use crate::recurrence::expand_rrule;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

const P_BUSY_CONFIRMED: f64 = 0.95;
const P_BUSY_TENTATIVE: f64 = 0.50;
const MAX_EXPANDED_OCCURRENCES: usize = 512;

/// One slot of the availability grid
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AvailabilitySlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Probability that the slot is entirely free, in `[0, 1]`
    pub p_free: f64,
}

/// Cancellation rate per recurring series (keyed by `ical_uid`)
///
/// Only series with more than one observed instance contribute; a series
/// that was cancelled half the time halves its busy weight.
pub fn cancellation_rates(events: &[CanonicalEvent]) -> HashMap<String, f64> {
    let mut totals: HashMap<&str, (u32, u32)> = HashMap::new();
    for event in events {
        let Some(uid) = event.ical_uid.as_deref() else {
            continue;
        };
        if event.recurrence_rule.is_none() {
            continue;
        }
        let entry = totals.entry(uid).or_default();
        entry.0 += 1;
        if event.status == EventStatus::Cancelled {
            entry.1 += 1;
        }
    }

    totals
        .into_iter()
        .filter(|(_, (total, _))| *total > 1)
        .map(|(uid, (total, cancelled))| (uid.to_string(), f64::from(cancelled) / f64::from(total)))
        .collect()
}

/// Busy probability of a single event
pub fn busy_probability(event: &CanonicalEvent, cancel_rates: &HashMap<String, f64>) -> f64 {
    let base = match event.status {
        EventStatus::Confirmed => P_BUSY_CONFIRMED,
        EventStatus::Tentative => P_BUSY_TENTATIVE,
        EventStatus::Cancelled => return 0.0,
    };

    let cancel_rate = event
        .ical_uid
        .as_deref()
        .filter(|_| event.recurrence_rule.is_some())
        .and_then(|uid| cancel_rates.get(uid))
        .copied()
        .unwrap_or(0.0);

    base * (1.0 - cancel_rate)
}

/// Compute the availability grid over `[range_start, range_end)`.
///
/// For each slot, `p_free = Π (1 − p_busy)` over the events overlapping it;
/// events are assumed independent.
pub fn availability_grid(
    events: &[CanonicalEvent],
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    granularity_minutes: u32,
) -> Vec<AvailabilitySlot> {
    if granularity_minutes == 0 || range_end <= range_start {
        return Vec::new();
    }

    let cancel_rates = cancellation_rates(events);
    let step = Duration::minutes(i64::from(granularity_minutes));

    // Pre-resolve the busy windows once, not per slot; recurring events
    // project their future occurrences into the range.
    let mut busy: Vec<(DateTime<Utc>, DateTime<Utc>, f64)> = Vec::new();
    for event in events {
        let (Some(start), Some(end)) = (event.sort_instant(), event.end_instant()) else {
            continue;
        };
        let p = busy_probability(event, &cancel_rates);
        if p == 0.0 {
            continue;
        }

        if start < range_end && end > range_start {
            busy.push((start, end, p));
        }

        if let Some(rule) = event.recurrence_rule.as_deref() {
            let duration = end - start;
            let occurrences = expand_rrule(
                rule,
                start,
                range_start,
                range_end,
                MAX_EXPANDED_OCCURRENCES,
            )
            .unwrap_or_default();
            for occurrence in occurrences {
                if occurrence == start {
                    continue;
                }
                busy.push((occurrence, occurrence + duration, p));
            }
        }
    }

    let mut slots = Vec::new();
    let mut slot_start = range_start;
    while slot_start < range_end {
        let slot_end = (slot_start + step).min(range_end);
        let p_free = busy
            .iter()
            .filter(|(start, end, _)| *start < slot_end && *end > slot_start)
            .map(|(_, _, p)| 1.0 - p)
            .product();

        slots.push(AvailabilitySlot {
            start: slot_start,
            end: slot_end,
            p_free,
        });
        slot_start = slot_end;
    }

    slots
}

/// Combined free probability across participants, assuming independence
pub fn combined_free_probability(per_participant: &[f64]) -> f64 {
    per_participant.iter().product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::test_event;
    use chrono::TimeZone;

    fn timed_event(hour: u32, len_minutes: i64, status: EventStatus) -> CanonicalEvent {
        let mut event = test_event();
        event.status = status;
        event.start = Some(Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap());
        event.end = Some(event.start.unwrap() + Duration::minutes(len_minutes));
        event
    }

    #[test]
    fn test_busy_probability_by_status() {
        let rates = HashMap::new();
        assert_eq!(
            busy_probability(&timed_event(9, 60, EventStatus::Confirmed), &rates),
            0.95
        );
        assert_eq!(
            busy_probability(&timed_event(9, 60, EventStatus::Tentative), &rates),
            0.50
        );
        assert_eq!(
            busy_probability(&timed_event(9, 60, EventStatus::Cancelled), &rates),
            0.0
        );
    }

    #[test]
    fn test_recurring_cancellation_history_discounts() {
        let mut events = Vec::new();
        for i in 0..4 {
            let mut e = timed_event(9, 60, if i < 2 { EventStatus::Cancelled } else { EventStatus::Confirmed });
            e.ical_uid = Some("weekly@example.com".to_string());
            e.recurrence_rule = Some("FREQ=WEEKLY".to_string());
            events.push(e);
        }

        let rates = cancellation_rates(&events);
        assert_eq!(rates.get("weekly@example.com"), Some(&0.5));

        // 0.95 × (1 − 0.5)
        let p = busy_probability(&events[3], &rates);
        assert!((p - 0.475).abs() < 1e-9);
    }

    #[test]
    fn test_grid_free_and_busy_slots() {
        let events = vec![timed_event(10, 60, EventStatus::Confirmed)];
        let range_start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let range_end = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();

        let grid = availability_grid(&events, range_start, range_end, 60);
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[0].p_free, 1.0); // 09:00
        assert!((grid[1].p_free - 0.05).abs() < 1e-9); // 10:00, confirmed event
        assert_eq!(grid[2].p_free, 1.0); // 11:00
    }

    #[test]
    fn test_grid_overlapping_events_multiply() {
        let events = vec![
            timed_event(10, 60, EventStatus::Confirmed),
            timed_event(10, 30, EventStatus::Tentative),
        ];
        let range_start = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let range_end = Utc.with_ymd_and_hms(2026, 3, 2, 11, 0, 0).unwrap();

        let grid = availability_grid(&events, range_start, range_end, 30);
        // (1−0.95) × (1−0.5) in the first half hour
        assert!((grid[0].p_free - 0.025).abs() < 1e-9);
        assert!((grid[1].p_free - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_grid_expands_recurring_events() {
        // Daily 10:00 meeting observed once; the grid two days later still
        // shows the slot as busy.
        let mut event = timed_event(10, 60, EventStatus::Confirmed);
        event.recurrence_rule = Some("FREQ=DAILY".to_string());

        let range_start = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let range_end = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();

        let grid = availability_grid(&[event], range_start, range_end, 60);
        assert_eq!(grid[0].p_free, 1.0); // 09:00
        assert!((grid[1].p_free - 0.05).abs() < 1e-9); // 10:00 occurrence
        assert_eq!(grid[2].p_free, 1.0); // 11:00
    }

    #[test]
    fn test_grid_edge_cases() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        assert!(availability_grid(&[], now, now, 30).is_empty());
        assert!(availability_grid(&[], now, now + Duration::hours(1), 0).is_empty());
    }

    #[test]
    fn test_combined_free_probability() {
        let combined = combined_free_probability(&[0.9, 0.8, 0.5]);
        assert!((combined - 0.36).abs() < 1e-9);
        assert_eq!(combined_free_probability(&[]), 1.0);
    }
}
