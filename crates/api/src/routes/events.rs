//! Canonical event endpoints: range listing, ICS export and per-event
//! time allocations.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Duration, Utc};
use icalendar::{Calendar, Component, Event as IcalEvent, EventLike};
use serde::Deserialize;
use tempo_core::models::{BillingCategory, CanonicalEvent, EventStatus};
use tempo_core::types::EventId;
use utoipa::ToSchema;

use crate::envelope::{ok, ok_with_meta};
use crate::error::ApiError;
use crate::middleware::bearer_auth::AuthenticatedUser;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct ListEventsQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub cursor: Option<String>,
    #[schema(default = 100)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AllocationRequest {
    pub billing_category: BillingCategory,
    pub client_id: Option<String>,
    pub rate: Option<f64>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub locked: bool,
}

fn default_confidence() -> f64 {
    1.0
}

fn default_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    let start = start.unwrap_or(now - Duration::days(30));
    let end = end.unwrap_or(now + Duration::days(90));
    (start, end)
}

/// List canonical events in a range
#[utoipa::path(
    get,
    path = "/events",
    params(ListEventsQuery),
    responses(
        (status = 200, description = "Events ordered by start", body = Vec<CanonicalEvent>),
        (status = 400, description = "Invalid range or cursor"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "events",
    security(("bearer_auth" = []))
)]
async fn list_events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Response, ApiError> {
    let (start, end) = default_range(query.start, query.end);
    if end < start {
        return Err(ApiError::invalid("end must not precede start"));
    }

    let partition = state.ces.partition(user.user_id).await?;
    let page = partition
        .list_events(start, end, query.cursor.as_deref(), query.limit.unwrap_or(100))
        .await?;

    Ok(ok_with_meta(
        page.items,
        serde_json::json!({
            "next_cursor": page.next_cursor,
            "has_more": page.has_more,
        }),
    ))
}

/// Export the canonical graph as an iCalendar document
#[utoipa::path(
    get,
    path = "/events/export.ics",
    params(ListEventsQuery),
    responses(
        (status = 200, description = "RFC 5545 calendar", content_type = "text/calendar"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "events",
    security(("bearer_auth" = []))
)]
async fn export_ics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Response, ApiError> {
    let (start, end) = default_range(query.start, query.end);
    let partition = state.ces.partition(user.user_id).await?;
    let events = partition.events_between(start, end).await?;

    let mut calendar = Calendar::new();
    calendar.name("Tempo canonical events");
    for event in &events {
        calendar.push(event_to_ical(event));
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/calendar; charset=utf-8")],
        calendar.to_string(),
    )
        .into_response())
}

/// Convert a canonical event to an iCalendar VEVENT
fn event_to_ical(event: &CanonicalEvent) -> IcalEvent {
    let mut ical_event = IcalEvent::new();

    ical_event.uid(event.ical_uid.as_deref().unwrap_or(&event.origin_event_id));
    ical_event.summary(&event.title);

    if let Some(description) = &event.description {
        ical_event.description(description);
    }
    if let Some(location) = &event.location {
        ical_event.location(location);
    }

    if event.is_all_day {
        if let Some(date) = event.start_date {
            ical_event.all_day(date);
        }
    } else {
        if let Some(start) = event.start {
            ical_event.starts(start);
        }
        if let Some(end) = event.end {
            ical_event.ends(end);
        }
    }

    let status = match event.status {
        EventStatus::Confirmed => "CONFIRMED",
        EventStatus::Tentative => "TENTATIVE",
        EventStatus::Cancelled => "CANCELLED",
    };
    ical_event.add_property("STATUS", status);

    if let Some(rrule) = &event.recurrence_rule {
        ical_event.add_property("RRULE", rrule);
    }
    ical_event.sequence(event.sequence.max(0) as u32);

    ical_event
}

/// Classify an event's time
#[utoipa::path(
    post,
    path = "/events/{id}/allocation",
    params(("id" = String, Path, description = "Canonical event id")),
    request_body = AllocationRequest,
    responses(
        (status = 200, description = "Stored allocation"),
        (status = 404, description = "Unknown event"),
        (status = 409, description = "Allocation is locked"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "events",
    security(("bearer_auth" = []))
)]
async fn put_allocation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(event_id): Path<EventId>,
    Json(req): Json<AllocationRequest>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let allocation = partition
        .upsert_allocation(
            event_id,
            req.billing_category,
            req.client_id,
            req.rate,
            req.confidence,
            req.locked,
        )
        .await?;
    Ok(ok(allocation))
}

/// Current allocation of an event
#[utoipa::path(
    get,
    path = "/events/{id}/allocation",
    params(("id" = String, Path, description = "Canonical event id")),
    responses(
        (status = 200, description = "Allocation or null"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "events",
    security(("bearer_auth" = []))
)]
async fn get_allocation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(event_id): Path<EventId>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let allocation = partition.get_allocation(event_id).await?;
    Ok(ok(allocation))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_events))
        .route("/events/export.ics", get(export_ics))
        .route("/events/{id}/allocation", post(put_allocation))
        .route("/events/{id}/allocation", get(get_allocation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempo_core::models::{EventSource, Transparency, Visibility};
    use tempo_core::types::AccountId;

    fn sample_event() -> CanonicalEvent {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        CanonicalEvent {
            id: EventId::new(),
            origin_account_id: AccountId::new(),
            origin_event_id: "g-1".to_string(),
            ical_uid: Some("uid-1@example.com".to_string()),
            title: "Design review".to_string(),
            description: None,
            location: Some("Room 4".to_string()),
            start: Some(start),
            end: Some(start + Duration::hours(1)),
            start_date: None,
            end_date: None,
            is_all_day: false,
            timezone: "UTC".to_string(),
            status: EventStatus::Confirmed,
            visibility: Visibility::Default,
            transparency: Transparency::Opaque,
            recurrence_rule: Some("FREQ=WEEKLY;BYDAY=MO".to_string()),
            source: EventSource::Provider,
            version: 2,
            sequence: 1,
            attendees: vec![],
            organizer: None,
            conference_data: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn test_event_to_ical_fields() {
        let ical = event_to_ical(&sample_event()).to_string();
        assert!(ical.contains("UID:uid-1@example.com"));
        assert!(ical.contains("SUMMARY:Design review"));
        assert!(ical.contains("STATUS:CONFIRMED"));
        assert!(ical.contains("RRULE:FREQ=WEEKLY;BYDAY=MO"));
        assert!(ical.contains("LOCATION:Room 4"));
    }

    #[test]
    fn test_allocation_request_defaults() {
        let req: AllocationRequest =
            serde_json::from_str(r#"{"billing_category": "BILLABLE"}"#).unwrap();
        assert_eq!(req.billing_category, BillingCategory::Billable);
        assert_eq!(req.confidence, 1.0);
        assert!(!req.locked);
    }
}
