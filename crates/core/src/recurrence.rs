//! Recurrence rule handling and validation
//!
//! Canonical events keep the raw RRULE string from their origin; this module
//! validates rules on ingest and expands them for availability analysis.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rrule::{RRuleError, RRuleSet, Tz};

/// Parse an RRULE string and validate its format
pub fn validate_rrule(rrule_str: &str) -> Result<(), CoreError> {
    // The rrule crate requires a DTSTART for strict parsing, so validation
    // runs against a fixed dummy start.
    let full_str = format!("DTSTART:20240101T000000Z\nRRULE:{rrule_str}");

    full_str
        .parse::<RRuleSet>()
        .map_err(|e: RRuleError| CoreError::InvalidArgument(format!("invalid RRULE: {e}")))?;

    Ok(())
}

/// Validate an optional incoming RRULE, dropping invalid rules
///
/// Provider feeds occasionally carry malformed rules; the event itself is
/// still worth keeping, so the rule is discarded with a warning instead of
/// rejecting the upsert.
pub fn sanitize_rrule(rrule: Option<String>) -> Option<String> {
    let rule = rrule?;
    match validate_rrule(&rule) {
        Ok(()) => Some(rule),
        Err(e) => {
            tracing::warn!("dropping malformed recurrence rule {rule:?}: {e}");
            None
        }
    }
}

/// Expand a recurrence rule into occurrence instants within a range
pub fn expand_rrule(
    rrule_str: &str,
    dtstart: DateTime<Utc>,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    max_occurrences: usize,
) -> Result<Vec<DateTime<Utc>>, CoreError> {
    let dtstart_str = dtstart.format("%Y%m%dT%H%M%SZ").to_string();
    let full_str = format!("DTSTART:{dtstart_str}\nRRULE:{rrule_str}");

    let rrule_set: RRuleSet = full_str
        .parse()
        .map_err(|e: RRuleError| CoreError::InvalidArgument(format!("invalid RRULE: {e}")))?;

    // Seek to just before the range start instead of iterating from DTSTART
    let rrule_tz = rrule_set.get_dt_start().timezone();
    let search_start = range_start
        .with_timezone(&rrule_tz)
        .checked_sub_signed(chrono::Duration::seconds(1))
        .unwrap_or_else(|| range_start.with_timezone(&rrule_tz));

    // The rrule crate limits occurrence counts to u16
    let limit = max_occurrences.min(u16::MAX as usize) as u16;
    let occurrences = rrule_set
        .after(search_start)
        .all(limit)
        .dates
        .into_iter()
        .take_while(|d: &DateTime<Tz>| *d <= range_end)
        .map(|d: DateTime<Tz>| d.with_timezone(&Utc))
        .collect();

    Ok(occurrences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_rrule_valid() {
        assert!(validate_rrule("FREQ=DAILY;COUNT=5").is_ok());
        assert!(validate_rrule("FREQ=WEEKLY;BYDAY=MO,FR").is_ok());
    }

    #[test]
    fn test_validate_rrule_invalid() {
        assert!(validate_rrule("INVALID=TRUE").is_err());
    }

    #[test]
    fn test_sanitize_rrule_drops_invalid() {
        assert_eq!(
            sanitize_rrule(Some("FREQ=DAILY".to_string())),
            Some("FREQ=DAILY".to_string())
        );
        assert_eq!(sanitize_rrule(Some("NOT-A-RULE".to_string())), None);
        assert_eq!(sanitize_rrule(None), None);
    }

    #[test]
    fn test_expand_rrule_daily() {
        let dtstart = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let range_start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let range_end = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();

        let occurrences =
            expand_rrule("FREQ=DAILY;COUNT=3", dtstart, range_start, range_end, 10).unwrap();

        assert_eq!(occurrences.len(), 3);
        assert_eq!(occurrences[0], dtstart);
        assert_eq!(occurrences[1], dtstart + chrono::Duration::days(1));
    }

    #[test]
    fn test_expand_rrule_respects_range() {
        let dtstart = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let range_start = Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap();
        let range_end = Utc.with_ymd_and_hms(2026, 1, 4, 23, 0, 0).unwrap();

        let occurrences =
            expand_rrule("FREQ=DAILY;COUNT=30", dtstart, range_start, range_end, 100).unwrap();

        assert_eq!(occurrences.len(), 2);
        assert!(occurrences.iter().all(|d| *d >= range_start && *d <= range_end));
    }
}
