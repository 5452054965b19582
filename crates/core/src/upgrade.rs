//! ICS↔OAuth account upgrade planning
//!
//! When a user attaches an OAuth account for a provider they previously
//! followed through a public ICS feed, the two event sets are merged by
//! `ical_uid` so the feed-era canonical ids survive. Provider data wins for
//! base fields; feed data fills the gaps. Unmatched feed events are never
//! dropped.

use crate::models::CanonicalEvent;
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

/// How an event pair was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    IcalUid,
}

/// One matched pair and its merge result
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventMerge {
    /// Merged record: the OAuth body under the feed event's canonical id
    pub merged: CanonicalEvent,
    /// Canonical id of the OAuth duplicate superseded by the merge
    pub superseded: crate::types::EventId,
    /// Fields the merge filled beyond what the feed row carried
    pub enriched_fields: Vec<String>,
    pub matched_by: MatchedBy,
    pub confidence: f64,
}

/// Full upgrade plan for one ICS account and one OAuth account
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct UpgradePlan {
    pub merges: Vec<EventMerge>,
    /// Feed events with no OAuth counterpart; preserved untouched
    pub orphans: Vec<CanonicalEvent>,
    /// OAuth events with no feed counterpart; plain additions
    pub additions: Vec<CanonicalEvent>,
}

impl UpgradePlan {
    pub fn merged_count(&self) -> usize {
        self.merges.len()
    }
}

/// Plan the merge of an ICS account's events with an OAuth account's events.
///
/// Matching is by exact `ical_uid` (confidence 1.0). Every ICS event appears
/// in the plan exactly once, merged or orphaned.
pub fn plan_upgrade(
    ics_events: &[CanonicalEvent],
    oauth_events: &[CanonicalEvent],
) -> UpgradePlan {
    let mut by_uid: HashMap<&str, &CanonicalEvent> = HashMap::new();
    for event in oauth_events {
        if let Some(uid) = event.ical_uid.as_deref() {
            by_uid.insert(uid, event);
        }
    }

    let mut plan = UpgradePlan::default();
    let mut matched_oauth_ids = std::collections::HashSet::new();

    for ics_event in ics_events {
        let oauth_event = ics_event
            .ical_uid
            .as_deref()
            .and_then(|uid| by_uid.get(uid).copied());

        match oauth_event {
            Some(oauth_event) => {
                matched_oauth_ids.insert(oauth_event.id);
                let (merged, enriched_fields) = merge_pair(ics_event, oauth_event);
                plan.merges.push(EventMerge {
                    merged,
                    superseded: oauth_event.id,
                    enriched_fields,
                    matched_by: MatchedBy::IcalUid,
                    confidence: 1.0,
                });
            }
            None => plan.orphans.push(ics_event.clone()),
        }
    }

    plan.additions = oauth_events
        .iter()
        .filter(|e| !matched_oauth_ids.contains(&e.id))
        .cloned()
        .collect();

    plan
}

/// Merge one matched pair: provider wins for base fields, the feed row's
/// canonical id survives, and feed values backfill attendee/organizer/
/// conference data the provider left empty.
fn merge_pair(
    ics_event: &CanonicalEvent,
    oauth_event: &CanonicalEvent,
) -> (CanonicalEvent, Vec<String>) {
    let mut merged = oauth_event.clone();
    merged.id = ics_event.id;
    merged.created_at = ics_event.created_at;

    let mut enriched = Vec::new();

    if merged.attendees.is_empty() && !ics_event.attendees.is_empty() {
        merged.attendees = ics_event.attendees.clone();
    }
    if !merged.attendees.is_empty() && ics_event.attendees.is_empty() {
        enriched.push("attendees".to_string());
    }

    if merged.organizer.is_none() && ics_event.organizer.is_some() {
        merged.organizer = ics_event.organizer.clone();
    }
    if merged.organizer.is_some() && ics_event.organizer.is_none() {
        enriched.push("organizer".to_string());
    }

    if merged.conference_data.is_none() && ics_event.conference_data.is_some() {
        merged.conference_data = ics_event.conference_data.clone();
    }
    if merged.conference_data.is_some() && ics_event.conference_data.is_none() {
        enriched.push("conference_data".to_string());
    }

    (merged, enriched)
}
