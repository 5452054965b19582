//! Delta applicator
//!
//! Applies one account's batch of upserts and deletes to the canonical
//! event graph inside a single partition transaction, then emits mirror
//! intents for write-capable accounts after the commit.
//!
//! Merge rules, per upsert:
//! 1. no existing row → insert at the incoming version (default 1)
//! 2. stored version newer → drop the upsert (provider out-of-order)
//! 3. stored version newer-or-equal but the upsert strictly extends empty
//!    enrichment fields → merge those fields only, version unchanged
//! 4. otherwise → overwrite body fields at the incoming version
//! 5. a provider upsert whose `ical_uid` matches a feed-sourced row takes
//!    that row over in place, preserving its canonical id and enrichment

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tempo_core::error::CoreResult;
use tempo_core::models::{
    Account, CanonicalEvent, DeltaSummary, EventDelta, EventPayload, EventSource, EventUpsert,
    MirrorIntent, MirrorOperation, Provider,
};
use tempo_core::recurrence::sanitize_rrule;
use tempo_core::types::{EventId, UserId};

use crate::db::events;

/// Cap on collected non-fatal errors in one delta summary
const MAX_DELTA_ERRORS: usize = 16;

/// Outcome of applying a delta inside the transaction; mirror intents are
/// dispatched by the caller after the commit.
pub(crate) struct AppliedDelta {
    pub summary: DeltaSummary,
    pub intents: Vec<MirrorIntent>,
}

pub(crate) async fn apply(
    conn: &mut SqliteConnection,
    user_id: UserId,
    account: &Account,
    delta: EventDelta,
    now: DateTime<Utc>,
) -> CoreResult<AppliedDelta> {
    let mut summary = DeltaSummary::default();
    let mut intents = Vec::new();

    for upsert in delta.upserts {
        let outcome = apply_upsert(conn, account, &upsert, now).await?;
        match outcome {
            UpsertOutcome::Created(event) => {
                summary.created += 1;
                push_intent(&mut intents, user_id, account, &event, MirrorOperation::Upsert);
            }
            UpsertOutcome::Updated(event) => {
                summary.updated += 1;
                push_intent(&mut intents, user_id, account, &event, MirrorOperation::Upsert);
            }
            UpsertOutcome::Dropped => {}
        }
    }

    for origin_event_id in delta.deletes {
        if let Some(existing) = events::get_by_origin(conn, account.id, &origin_event_id).await? {
            if events::cancel(conn, existing.id, now).await? {
                summary.deleted += 1;
                push_intent(&mut intents, user_id, account, &existing, MirrorOperation::Delete);
            }
        }
    }

    Ok(AppliedDelta { summary, intents })
}

enum UpsertOutcome {
    Created(CanonicalEvent),
    Updated(CanonicalEvent),
    Dropped,
}

async fn apply_upsert(
    conn: &mut SqliteConnection,
    account: &Account,
    upsert: &EventUpsert,
    now: DateTime<Utc>,
) -> CoreResult<UpsertOutcome> {
    let incoming_version = upsert.version.unwrap_or(1);

    if let Some(existing) = events::get_by_origin(conn, account.id, &upsert.origin_event_id).await?
    {
        if existing.version > incoming_version {
            if strictly_extends(&existing, &upsert.payload) {
                let merged = merge_enrichment(existing, &upsert.payload, now);
                events::update(conn, &merged).await?;
                return Ok(UpsertOutcome::Updated(merged));
            }
            return Ok(UpsertOutcome::Dropped);
        }

        let updated = overwrite_body(existing, &upsert.payload, incoming_version, now);
        events::update(conn, &updated).await?;
        return Ok(UpsertOutcome::Updated(updated));
    }

    // Provider-wins takeover: a provider upsert carrying an ical_uid already
    // known from a feed row replaces that row in place.
    if account.provider != Provider::IcsFeed {
        if let Some(uid) = upsert.payload.ical_uid.as_deref() {
            if let Some(feed_row) = events::find_feed_event_by_ical_uid(conn, uid).await? {
                let mut taken = overwrite_body(feed_row, &upsert.payload, incoming_version, now);
                taken.origin_account_id = account.id;
                taken.origin_event_id = upsert.origin_event_id.clone();
                taken.source = EventSource::Provider;
                events::update(conn, &taken).await?;
                return Ok(UpsertOutcome::Updated(taken));
            }
        }
    }

    let event = new_event(account, upsert, incoming_version, now);
    events::insert(conn, &event).await?;
    Ok(UpsertOutcome::Created(event))
}

/// True when the payload fills enrichment fields the stored row lacks
fn strictly_extends(existing: &CanonicalEvent, payload: &EventPayload) -> bool {
    (existing.attendees.is_empty() && !payload.attendees.is_empty())
        || (existing.organizer.is_none() && payload.organizer.is_some())
        || (existing.conference_data.is_none() && payload.conference_data.is_some())
}

/// Merge only the enrichment fields; body and version stay untouched
fn merge_enrichment(
    mut existing: CanonicalEvent,
    payload: &EventPayload,
    now: DateTime<Utc>,
) -> CanonicalEvent {
    if existing.attendees.is_empty() && !payload.attendees.is_empty() {
        existing.attendees = payload.attendees.clone();
    }
    if existing.organizer.is_none() {
        existing.organizer = payload.organizer.clone();
    }
    if existing.conference_data.is_none() {
        existing.conference_data = payload.conference_data.clone();
    }
    existing.updated_at = now;
    existing
}

/// Overwrite body fields at the incoming version, preserving enrichment the
/// payload does not carry.
fn overwrite_body(
    mut existing: CanonicalEvent,
    payload: &EventPayload,
    version: i64,
    now: DateTime<Utc>,
) -> CanonicalEvent {
    if let Some(title) = &payload.title {
        existing.title = title.clone();
    }
    existing.description = payload.description.clone();
    existing.location = payload.location.clone();
    existing.start = payload.start;
    existing.end = payload.end;
    existing.start_date = payload.start_date;
    existing.end_date = payload.end_date;
    existing.is_all_day = payload.is_all_day;
    if let Some(timezone) = &payload.timezone {
        existing.timezone = timezone.clone();
    }
    existing.status = payload.status;
    existing.visibility = payload.visibility;
    existing.transparency = payload.transparency;
    existing.recurrence_rule = sanitize_rrule(payload.recurrence_rule.clone());
    existing.sequence = payload.sequence;
    if let Some(uid) = &payload.ical_uid {
        existing.ical_uid = Some(uid.clone());
    }
    if !payload.attendees.is_empty() {
        existing.attendees = payload.attendees.clone();
    }
    if payload.organizer.is_some() {
        existing.organizer = payload.organizer.clone();
    }
    if payload.conference_data.is_some() {
        existing.conference_data = payload.conference_data.clone();
    }
    existing.version = version;
    existing.updated_at = now;
    existing
}

fn new_event(
    account: &Account,
    upsert: &EventUpsert,
    version: i64,
    now: DateTime<Utc>,
) -> CanonicalEvent {
    let payload = &upsert.payload;
    CanonicalEvent {
        id: EventId::new(),
        origin_account_id: account.id,
        origin_event_id: upsert.origin_event_id.clone(),
        ical_uid: payload.ical_uid.clone(),
        title: payload.title.clone().unwrap_or_default(),
        description: payload.description.clone(),
        location: payload.location.clone(),
        start: payload.start,
        end: payload.end,
        start_date: payload.start_date,
        end_date: payload.end_date,
        is_all_day: payload.is_all_day,
        timezone: payload.timezone.clone().unwrap_or_else(|| "UTC".to_string()),
        status: payload.status,
        visibility: payload.visibility,
        transparency: payload.transparency,
        recurrence_rule: sanitize_rrule(payload.recurrence_rule.clone()),
        source: if account.provider == Provider::IcsFeed {
            EventSource::IcsFeed
        } else {
            EventSource::Provider
        },
        version,
        sequence: payload.sequence,
        attendees: payload.attendees.clone(),
        organizer: payload.organizer.clone(),
        conference_data: payload.conference_data.clone(),
        created_at: now,
        updated_at: now,
    }
}

fn push_intent(
    intents: &mut Vec<MirrorIntent>,
    user_id: UserId,
    account: &Account,
    event: &CanonicalEvent,
    operation: MirrorOperation,
) {
    if !account.write_capable {
        return;
    }
    intents.push(MirrorIntent {
        user_id,
        target_account_id: account.id,
        canonical_event_id: event.id,
        version: event.version,
        operation,
        payload: serde_json::to_value(event).unwrap_or_default(),
    });
}

/// Best-effort dispatch of mirror intents after the commit; failures land in
/// the bounded `errors` list and never fail the delta.
pub(crate) fn dispatch_intents(
    mirrors: &crate::mirror::MirrorSender,
    intents: Vec<MirrorIntent>,
    summary: &mut DeltaSummary,
) {
    for intent in intents {
        match mirrors.try_send(intent) {
            Ok(()) => summary.mirrors_enqueued += 1,
            Err(err) => {
                if summary.errors.len() < MAX_DELTA_ERRORS {
                    summary.errors.push(format!("mirror enqueue failed: {err}"));
                }
            }
        }
    }
}
