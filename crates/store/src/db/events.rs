//! Canonical event repository

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::SqliteConnection;
use tempo_core::error::CoreResult;
use tempo_core::models::{CanonicalEvent, EventSource, EventStatus};
use tempo_core::types::{AccountId, EventId};

/// Effective ordering instant stored in the `sort_ts` column
fn sort_ts(event: &CanonicalEvent) -> Option<String> {
    event.sort_instant().map(|t| t.to_rfc3339())
}

/// Insert a new canonical event row
pub async fn insert(conn: &mut SqliteConnection, event: &CanonicalEvent) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO events (
            id, origin_account_id, origin_event_id, ical_uid,
            title, description, location,
            start, "end", start_date, end_date, is_all_day, timezone,
            status, visibility, transparency, recurrence_rule, source,
            version, sequence, attendees, organizer, conference_data,
            sort_ts, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id)
    .bind(event.origin_account_id)
    .bind(&event.origin_event_id)
    .bind(&event.ical_uid)
    .bind(&event.title)
    .bind(&event.description)
    .bind(&event.location)
    .bind(event.start)
    .bind(event.end)
    .bind(event.start_date)
    .bind(event.end_date)
    .bind(event.is_all_day)
    .bind(&event.timezone)
    .bind(event.status)
    .bind(event.visibility)
    .bind(event.transparency)
    .bind(&event.recurrence_rule)
    .bind(event.source)
    .bind(event.version)
    .bind(event.sequence)
    .bind(Json(&event.attendees))
    .bind(event.organizer.as_ref().map(Json))
    .bind(event.conference_data.as_ref().map(Json))
    .bind(sort_ts(event))
    .bind(event.created_at)
    .bind(event.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Overwrite an existing row (matched by id), including identity fields.
/// Used by the delta applicator and the upgrade planner.
pub async fn update(conn: &mut SqliteConnection, event: &CanonicalEvent) -> CoreResult<()> {
    sqlx::query(
        r#"
        UPDATE events SET
            origin_account_id = ?, origin_event_id = ?, ical_uid = ?,
            title = ?, description = ?, location = ?,
            start = ?, "end" = ?, start_date = ?, end_date = ?,
            is_all_day = ?, timezone = ?,
            status = ?, visibility = ?, transparency = ?,
            recurrence_rule = ?, source = ?,
            version = ?, sequence = ?,
            attendees = ?, organizer = ?, conference_data = ?,
            sort_ts = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(event.origin_account_id)
    .bind(&event.origin_event_id)
    .bind(&event.ical_uid)
    .bind(&event.title)
    .bind(&event.description)
    .bind(&event.location)
    .bind(event.start)
    .bind(event.end)
    .bind(event.start_date)
    .bind(event.end_date)
    .bind(event.is_all_day)
    .bind(&event.timezone)
    .bind(event.status)
    .bind(event.visibility)
    .bind(event.transparency)
    .bind(&event.recurrence_rule)
    .bind(event.source)
    .bind(event.version)
    .bind(event.sequence)
    .bind(Json(&event.attendees))
    .bind(event.organizer.as_ref().map(Json))
    .bind(event.conference_data.as_ref().map(Json))
    .bind(sort_ts(event))
    .bind(event.updated_at)
    .bind(event.id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Get an event by its canonical id
pub async fn get(
    conn: &mut SqliteConnection,
    event_id: EventId,
) -> CoreResult<Option<CanonicalEvent>> {
    let event = sqlx::query_as::<_, CanonicalEvent>("SELECT * FROM events WHERE id = ?")
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(event)
}

/// Get an event by its external identity `(account, origin_event_id)`
pub async fn get_by_origin(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    origin_event_id: &str,
) -> CoreResult<Option<CanonicalEvent>> {
    let event = sqlx::query_as::<_, CanonicalEvent>(
        "SELECT * FROM events WHERE origin_account_id = ? AND origin_event_id = ?",
    )
    .bind(account_id)
    .bind(origin_event_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(event)
}

/// Find a feed-sourced event carrying this `ical_uid`, used by the
/// provider-wins takeover rule.
pub async fn find_feed_event_by_ical_uid(
    conn: &mut SqliteConnection,
    ical_uid: &str,
) -> CoreResult<Option<CanonicalEvent>> {
    let event = sqlx::query_as::<_, CanonicalEvent>(
        "SELECT * FROM events WHERE ical_uid = ? AND source = 'ics_feed' LIMIT 1",
    )
    .bind(ical_uid)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(event)
}

/// Mark an event cancelled and blank its body
pub async fn cancel(
    conn: &mut SqliteConnection,
    event_id: EventId,
    now: DateTime<Utc>,
) -> CoreResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE events SET
            status = ?, title = '', description = NULL, location = NULL,
            attendees = '[]', organizer = NULL, conference_data = NULL,
            updated_at = ?
        WHERE id = ? AND status != ?
        "#,
    )
    .bind(EventStatus::Cancelled)
    .bind(now)
    .bind(event_id)
    .bind(EventStatus::Cancelled)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List events in `[start, end]` (end inclusive), ordered by effective
/// start then id, keyset-paginated from `(after_ts, after_id)`.
///
/// Cancelled events whose body was blanked are excluded.
pub async fn list_range(
    conn: &mut SqliteConnection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    after: Option<(String, EventId)>,
    limit: i64,
) -> CoreResult<Vec<CanonicalEvent>> {
    let (after_ts, after_id) = match after {
        Some((ts, id)) => (Some(ts), Some(id)),
        None => (None, None),
    };

    let events = sqlx::query_as::<_, CanonicalEvent>(
        r#"
        SELECT * FROM events
        WHERE sort_ts IS NOT NULL
          AND sort_ts >= ?
          AND sort_ts <= ?
          AND NOT (status = 'cancelled' AND title = '')
          AND (? IS NULL OR (sort_ts > ? OR (sort_ts = ? AND id > ?)))
        ORDER BY sort_ts ASC, id ASC
        LIMIT ?
        "#,
    )
    .bind(start.to_rfc3339())
    .bind(end.to_rfc3339())
    .bind(&after_ts)
    .bind(&after_ts)
    .bind(&after_ts)
    .bind(after_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(events)
}

/// All events belonging to one account
pub async fn account_events(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> CoreResult<Vec<CanonicalEvent>> {
    let events = sqlx::query_as::<_, CanonicalEvent>(
        "SELECT * FROM events WHERE origin_account_id = ? ORDER BY sort_ts ASC, id ASC",
    )
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(events)
}

/// Count events belonging to one account
pub async fn count_for_account(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> CoreResult<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE origin_account_id = ?")
            .bind(account_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count)
}

/// Re-point all of one account's events at another account, switching their
/// source. Canonical ids are preserved; used by the downgrade path.
pub async fn move_to_account(
    conn: &mut SqliteConnection,
    from: AccountId,
    to: AccountId,
    new_source: EventSource,
    now: DateTime<Utc>,
) -> CoreResult<u64> {
    let result = sqlx::query(
        "UPDATE events SET origin_account_id = ?, source = ?, updated_at = ? \
         WHERE origin_account_id = ?",
    )
    .bind(to)
    .bind(new_source)
    .bind(now)
    .bind(from)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Hard-delete a single event row (upgrade supersedes duplicates)
pub async fn delete(conn: &mut SqliteConnection, event_id: EventId) -> CoreResult<bool> {
    let result = sqlx::query("DELETE FROM events WHERE id = ?")
        .bind(event_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
