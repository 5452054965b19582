//! ICS feed parsing, diffing and lifecycle classification
//!
//! Parses the RFC 5545 minimum subset served by public calendar feeds
//! (VEVENT: UID, DTSTART, DTEND, SUMMARY, DESCRIPTION, LOCATION, STATUS,
//! TRANSP, SEQUENCE, RRULE, ORGANIZER, ATTENDEE) and computes per-UID diffs
//! between a stored snapshot and a freshly fetched body.
//!
//! Floating times (no `Z`, no `TZID`) are interpreted as UTC.

use crate::error::CoreError;
use crate::models::{
    Attendee, CanonicalEvent, EventPayload, EventStatus, EventUpsert, Organizer, Transparency,
};
use crate::security::sha256_hex;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use utoipa::ToSchema;

/// A single VEVENT parsed from a feed body
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub uid: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_all_day: bool,
    pub timezone: String,
    pub status: EventStatus,
    pub transparency: Transparency,
    pub sequence: i64,
    pub rrule: Option<String>,
    pub organizer: Option<Organizer>,
    pub attendees: Vec<Attendee>,
}

impl FeedEvent {
    /// Content fingerprint used for modified-detection across refreshes.
    ///
    /// Hashes the body fields only; SEQUENCE is compared separately so a
    /// bumped sequence with identical content still counts as modified.
    pub fn content_hash(&self) -> String {
        sha256_hex(self.fingerprint_source().as_bytes())
    }

    fn fingerprint_source(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{:?}\n{:?}\n{}",
            self.summary,
            self.description.as_deref().unwrap_or(""),
            self.location.as_deref().unwrap_or(""),
            self.start.map(|t| t.to_rfc3339()).unwrap_or_default(),
            self.end.map(|t| t.to_rfc3339()).unwrap_or_default(),
            self.start_date.map(|d| d.to_string()).unwrap_or_default(),
            self.end_date.map(|d| d.to_string()).unwrap_or_default(),
            self.status,
            self.transparency,
            self.rrule.as_deref().unwrap_or(""),
        )
    }

    /// Convert into a delta upsert; the provider version is derived from the
    /// SEQUENCE so that re-published events with a higher sequence overwrite.
    pub fn into_upsert(self) -> EventUpsert {
        EventUpsert {
            origin_event_id: self.uid.clone(),
            version: Some(self.sequence + 1),
            payload: EventPayload {
                ical_uid: Some(self.uid),
                title: Some(self.summary),
                description: self.description,
                location: self.location,
                start: self.start,
                end: self.end,
                start_date: self.start_date,
                end_date: self.end_date,
                is_all_day: self.is_all_day,
                timezone: Some(self.timezone),
                status: self.status,
                visibility: Default::default(),
                transparency: self.transparency,
                recurrence_rule: self.rrule,
                sequence: self.sequence,
                attendees: self.attendees,
                organizer: self.organizer,
                conference_data: None,
            },
        }
    }
}

/// Fingerprint of a stored canonical event, comparable with
/// [`FeedEvent::content_hash`]
pub fn event_content_hash(event: &CanonicalEvent) -> String {
    let source = format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{:?}\n{:?}\n{}",
        event.title,
        event.description.as_deref().unwrap_or(""),
        event.location.as_deref().unwrap_or(""),
        event.start.map(|t| t.to_rfc3339()).unwrap_or_default(),
        event.end.map(|t| t.to_rfc3339()).unwrap_or_default(),
        event.start_date.map(|d| d.to_string()).unwrap_or_default(),
        event.end_date.map(|d| d.to_string()).unwrap_or_default(),
        event.status,
        event.transparency,
        event.recurrence_rule.as_deref().unwrap_or(""),
    );
    sha256_hex(source.as_bytes())
}

/// Parse a feed body into its VEVENTs
///
/// Folded lines (continuation lines starting with space or tab) are unfolded
/// first. Events without a UID or a parseable DTSTART are skipped rather than
/// failing the whole feed.
pub fn parse_ics(body: &str) -> Result<Vec<FeedEvent>, CoreError> {
    if !body.contains("BEGIN:VCALENDAR") {
        return Err(CoreError::InvalidArgument(
            "response body is not an iCalendar document".to_string(),
        ));
    }

    let unfolded = unfold_lines(body);
    let mut events = Vec::new();
    let mut current: Option<VEventBuilder> = None;

    for line in &unfolded {
        match line.as_str() {
            "BEGIN:VEVENT" => {
                current = Some(VEventBuilder::default());
                continue;
            }
            "END:VEVENT" => {
                if let Some(builder) = current.take() {
                    match builder.build() {
                        Ok(event) => events.push(event),
                        Err(e) => tracing::warn!("skipping malformed VEVENT: {e}"),
                    }
                }
                continue;
            }
            _ => {}
        }

        let Some(builder) = current.as_mut() else {
            continue;
        };

        if let Some((key, value)) = line.split_once(':') {
            let (name, params) = match key.split_once(';') {
                Some((name, params)) => (name, Some(params)),
                None => (key, None),
            };
            builder.apply(name, params, value);
        }
    }

    Ok(events)
}

/// Unfold RFC 5545 folded lines: a line starting with space or tab continues
/// the previous one.
fn unfold_lines(body: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in body.lines() {
        if (raw.starts_with(' ') || raw.starts_with('\t')) && !lines.is_empty() {
            if let Some(last) = lines.last_mut() {
                last.push_str(&raw[1..]);
            }
        } else {
            lines.push(raw.trim_end().to_string());
        }
    }
    lines
}

#[derive(Default)]
struct VEventBuilder {
    uid: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    dtstart: Option<(String, Option<String>)>,
    dtend: Option<(String, Option<String>)>,
    status: EventStatus,
    transparency: Transparency,
    sequence: i64,
    rrule: Option<String>,
    organizer: Option<Organizer>,
    attendees: Vec<Attendee>,
}

impl VEventBuilder {
    fn apply(&mut self, name: &str, params: Option<&str>, value: &str) {
        match name {
            "UID" => self.uid = Some(value.to_string()),
            "SUMMARY" => self.summary = Some(unescape_text(value)),
            "DESCRIPTION" => self.description = Some(unescape_text(value)),
            "LOCATION" => self.location = Some(unescape_text(value)),
            "DTSTART" => self.dtstart = Some((value.to_string(), params.map(str::to_string))),
            "DTEND" => self.dtend = Some((value.to_string(), params.map(str::to_string))),
            "RRULE" => self.rrule = Some(value.to_string()),
            "SEQUENCE" => self.sequence = value.parse().unwrap_or(0),
            "STATUS" => {
                self.status = match value.to_uppercase().as_str() {
                    "TENTATIVE" => EventStatus::Tentative,
                    "CANCELLED" => EventStatus::Cancelled,
                    _ => EventStatus::Confirmed,
                };
            }
            "TRANSP" => {
                self.transparency = if value.eq_ignore_ascii_case("TRANSPARENT") {
                    Transparency::Transparent
                } else {
                    Transparency::Opaque
                };
            }
            "ORGANIZER" => {
                self.organizer = Some(Organizer {
                    email: strip_mailto(value),
                    display_name: param_value(params, "CN"),
                });
            }
            "ATTENDEE" => {
                self.attendees.push(Attendee {
                    email: strip_mailto(value),
                    display_name: param_value(params, "CN"),
                    response_status: param_value(params, "PARTSTAT"),
                });
            }
            _ => {}
        }
    }

    fn build(self) -> Result<FeedEvent, CoreError> {
        let uid = self
            .uid
            .ok_or_else(|| CoreError::InvalidArgument("VEVENT without UID".to_string()))?;
        let (start_raw, start_params) = self
            .dtstart
            .ok_or_else(|| CoreError::InvalidArgument("VEVENT without DTSTART".to_string()))?;

        let is_all_day = start_params
            .as_deref()
            .map(|p| p.contains("VALUE=DATE") && !p.contains("VALUE=DATE-TIME"))
            .unwrap_or(false);
        let timezone = param_value(start_params.as_deref(), "TZID").unwrap_or_else(|| "UTC".into());

        let (start, start_date) = parse_ics_time(&start_raw, is_all_day, &timezone)?;
        let (end, end_date) = match self.dtend {
            Some((raw, _)) => parse_ics_time(&raw, is_all_day, &timezone)?,
            // RFC 5545: a missing DTEND means one hour for timed events and
            // one day for all-day events.
            None if is_all_day => (None, start_date.map(|d| d + chrono::Duration::days(1))),
            None => (start.map(|t| t + chrono::Duration::hours(1)), None),
        };

        Ok(FeedEvent {
            uid,
            summary: self.summary.unwrap_or_else(|| "Untitled Event".to_string()),
            description: self.description,
            location: self.location,
            start,
            end,
            start_date,
            end_date,
            is_all_day,
            timezone,
            status: self.status,
            transparency: self.transparency,
            sequence: self.sequence,
            rrule: self.rrule,
            organizer: self.organizer,
            attendees: self.attendees,
        })
    }
}

/// Parse a DTSTART/DTEND value, handling DATE and DATE-TIME forms.
///
/// `Z`-suffixed values are UTC; naive values with a known TZID are converted
/// from that zone; floating times (no `Z`, no TZID) are read as UTC.
fn parse_ics_time(
    value: &str,
    is_all_day: bool,
    tzid: &str,
) -> Result<(Option<DateTime<Utc>>, Option<NaiveDate>), CoreError> {
    if is_all_day {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|e| CoreError::InvalidArgument(format!("invalid DATE {value:?}: {e}")))?;
        return Ok((None, Some(date)));
    }

    let is_utc = value.ends_with('Z');
    let trimmed = value.trim_end_matches('Z');
    let dt = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%S")
        .map_err(|e| CoreError::InvalidArgument(format!("invalid DATE-TIME {value:?}: {e}")))?;

    if !is_utc {
        if let Ok(tz) = tzid.parse::<chrono_tz::Tz>() {
            if let Some(local) = dt.and_local_timezone(tz).earliest() {
                return Ok((Some(local.with_timezone(&Utc)), None));
            }
        }
    }

    Ok((Some(dt.and_utc()), None))
}

/// Extract a parameter value from a `;`-separated parameter list
fn param_value(params: Option<&str>, name: &str) -> Option<String> {
    let params = params?;
    for part in params.split(';') {
        if let Some((key, value)) = part.split_once('=') {
            if key.eq_ignore_ascii_case(name) {
                return Some(value.trim_matches('"').to_string());
            }
        }
    }
    None
}

fn strip_mailto(value: &str) -> Option<String> {
    let addr = value.strip_prefix("mailto:").unwrap_or(value).trim();
    if addr.is_empty() {
        None
    } else {
        Some(addr.to_string())
    }
}

fn unescape_text(value: &str) -> String {
    value
        .replace("\\n", "\n")
        .replace("\\N", "\n")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

/// Snapshot entry of a stored feed event, input to [`diff_feeds`]
#[derive(Debug, Clone)]
pub struct FeedSnapshotEntry {
    pub uid: String,
    pub sequence: i64,
    pub content_hash: String,
}

/// Per-UID diff between a stored snapshot and a freshly parsed feed
#[derive(Debug, Default)]
pub struct FeedDiff {
    pub added: Vec<FeedEvent>,
    pub modified: Vec<FeedEvent>,
    /// UIDs present before and absent now
    pub deleted: Vec<String>,
}

impl FeedDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Compute the per-UID feed diff.
///
/// An event counts as modified when its SEQUENCE increased or its body
/// content changed; an unchanged sequence with identical content is a no-op.
pub fn diff_feeds(existing: &[FeedSnapshotEntry], incoming: Vec<FeedEvent>) -> FeedDiff {
    let known: HashMap<&str, &FeedSnapshotEntry> =
        existing.iter().map(|e| (e.uid.as_str(), e)).collect();
    let seen: HashSet<&str> = incoming.iter().map(|e| e.uid.as_str()).collect();

    let mut diff = FeedDiff {
        deleted: existing
            .iter()
            .filter(|e| !seen.contains(e.uid.as_str()))
            .map(|e| e.uid.clone())
            .collect(),
        ..FeedDiff::default()
    };

    for event in incoming {
        match known.get(event.uid.as_str()) {
            None => diff.added.push(event),
            Some(prev) => {
                if event.sequence > prev.sequence || event.content_hash() != prev.content_hash {
                    diff.modified.push(event);
                }
            }
        }
    }

    diff
}

/// Feed failure category derived from the HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeedErrorCategory {
    Dead,
    AuthRequired,
    RateLimited,
    ServerError,
    Timeout,
}

/// Classified feed failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct FeedErrorClass {
    pub category: FeedErrorCategory,
    pub retryable: bool,
    pub user_action_required: bool,
}

/// Classify a feed fetch status. `None` means success (`2xx` or `304`);
/// status `0` stands for a transport failure or timeout.
pub fn classify_feed_status(status: u16) -> Option<FeedErrorClass> {
    use FeedErrorCategory::*;

    let class = match status {
        200..=299 | 304 => return None,
        404 | 410 => FeedErrorClass {
            category: Dead,
            retryable: false,
            user_action_required: true,
        },
        401 | 403 => FeedErrorClass {
            category: AuthRequired,
            retryable: false,
            user_action_required: true,
        },
        429 => FeedErrorClass {
            category: RateLimited,
            retryable: true,
            user_action_required: false,
        },
        0 => FeedErrorClass {
            category: Timeout,
            retryable: true,
            user_action_required: false,
        },
        _ => FeedErrorClass {
            category: ServerError,
            retryable: true,
            user_action_required: false,
        },
    };
    Some(class)
}

/// Feed freshness classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Staleness {
    Fresh,
    Stale,
    Dead,
}

const DEAD_AFTER_HOURS: i64 = 24;

/// Classify feed freshness from the last successful refresh.
///
/// `fresh` while the age is under the refresh interval, `stale` from the
/// interval up to 24 h, `dead` at 24 h or when the feed never succeeded.
pub fn classify_staleness(
    now: DateTime<Utc>,
    last_success: Option<DateTime<Utc>>,
    refresh_interval_ms: i64,
) -> Staleness {
    let Some(last) = last_success else {
        return Staleness::Dead;
    };

    let age = now - last;
    if age >= chrono::Duration::hours(DEAD_AFTER_HOURS) {
        Staleness::Dead
    } else if age >= chrono::Duration::milliseconds(refresh_interval_ms) {
        Staleness::Stale
    } else {
        Staleness::Fresh
    }
}
