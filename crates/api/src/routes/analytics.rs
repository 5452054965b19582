//! Analytics endpoints
//!
//! Handlers assemble a snapshot (events, constraints, allocations) from
//! the caller's partition and hand it to the pure kernel functions; `now`
//! is sampled once per request so a response is internally consistent.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Deserialize;
use tempo_core::analytics::{
    analyze_context_switches, analyze_deep_work, availability_grid, daily_cognitive_load,
    temporal_risk, working_days_between, AllocationShares, RiskInputs,
};
use tempo_core::models::{BillingCategory, CanonicalEvent, TimeAllocation, WorkingHoursConfig};
use utoipa::ToSchema;

use crate::envelope::ok;
use crate::error::ApiError;
use crate::middleware::bearer_auth::AuthenticatedUser;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct DayQuery {
    /// Day to analyze, `YYYY-MM-DD`; defaults to today (UTC)
    #[schema(value_type = Option<String>)]
    pub date: Option<NaiveDate>,
    /// `day` (default) or `week`
    pub range: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct RiskQuery {
    /// History window in weeks, default 4
    pub weeks: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct AvailabilityQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[schema(default = 30)]
    pub granularity_minutes: Option<u32>,
}

/// Events overlapping the whole-day span `[from, to)`
async fn day_span_events(
    state: &AppState,
    user: &AuthenticatedUser,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<(Vec<CanonicalEvent>, WorkingHoursConfig), ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let start = from
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(Utc::now)
        - Duration::days(1);
    let end = to
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(Utc::now)
        + Duration::days(1);

    let events = partition.events_between(start, end).await?;
    let config = partition.working_hours(Utc::now()).await?;
    Ok((events, config))
}

/// Cognitive load for a day or week
#[utoipa::path(
    get,
    path = "/cognitive-load",
    params(DayQuery),
    responses(
        (status = 200, description = "Load score and components"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "analytics",
    security(("bearer_auth" = []))
)]
async fn cognitive_load(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<DayQuery>,
) -> Result<Response, ApiError> {
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());

    match query.range.as_deref().unwrap_or("day") {
        "day" => {
            let (events, config) = day_span_events(&state, &user, date, date + Duration::days(1)).await?;
            let load = daily_cognitive_load(&events, date, &config);
            Ok(ok(load))
        }
        "week" => {
            let week_start = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
            let (events, config) =
                day_span_events(&state, &user, week_start, week_start + Duration::days(7)).await?;

            let days: Vec<serde_json::Value> = (0..7)
                .map(|offset| {
                    let day = week_start + Duration::days(offset);
                    let load = daily_cognitive_load(&events, day, &config);
                    serde_json::json!({"date": day, "load": load})
                })
                .collect();
            let average = days
                .iter()
                .filter_map(|d| d["load"]["score"].as_u64())
                .sum::<u64>() as f64
                / 7.0;

            Ok(ok(serde_json::json!({
                "week_start": week_start,
                "days": days,
                "average_score": average,
            })))
        }
        other => Err(ApiError::invalid(format!(
            "range must be day or week, got {other:?}"
        ))),
    }
}

/// Context-switch costs for one day
#[utoipa::path(
    get,
    path = "/context-switches",
    params(DayQuery),
    responses(
        (status = 200, description = "Transitions, total cost, clustering suggestions"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "analytics",
    security(("bearer_auth" = []))
)]
async fn context_switches(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<DayQuery>,
) -> Result<Response, ApiError> {
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let (events, _) = day_span_events(&state, &user, date, date + Duration::days(1)).await?;

    // Only the requested day's meetings feed the analysis
    let day_events: Vec<CanonicalEvent> = events
        .into_iter()
        .filter(|e| e.sort_instant().map(|t| t.date_naive()) == Some(date))
        .collect();

    let analysis = analyze_context_switches(&day_events);
    Ok(ok(analysis))
}

/// Deep-work blocks and consolidation suggestions
#[utoipa::path(
    get,
    path = "/deep-work",
    params(RangeQuery),
    responses(
        (status = 200, description = "Protected blocks and targets"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "analytics",
    security(("bearer_auth" = []))
)]
async fn deep_work(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<RangeQuery>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let start = query.start.unwrap_or(now).date_naive();
    let end = query
        .end
        .map(|e| e.date_naive())
        .unwrap_or(start + Duration::days(7));
    if end <= start {
        return Err(ApiError::invalid("end must be after start"));
    }

    let (events, config) = day_span_events(&state, &user, start, end).await?;
    let analysis = analyze_deep_work(&events, start, end, &config);
    Ok(ok(analysis))
}

/// Temporal risk profile over recent weeks
#[utoipa::path(
    get,
    path = "/risk-scores",
    params(RiskQuery),
    responses(
        (status = 200, description = "Burnout, travel, drift and overall risk"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "analytics",
    security(("bearer_auth" = []))
)]
async fn risk_scores(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<RiskQuery>,
) -> Result<Response, ApiError> {
    let weeks = query.weeks.unwrap_or(4).clamp(1, 26);
    let now = Utc::now();
    let today = now.date_naive();
    let window_start = today - Duration::weeks(weeks);

    let partition = state.ces.partition(user.user_id).await?;
    let config = partition.working_hours(now).await?;
    let (events, _) = day_span_events(&state, &user, window_start, today).await?;

    // Daily load history, oldest first
    let mut daily_scores = Vec::new();
    let mut day = window_start;
    while day < today {
        daily_scores.push(daily_cognitive_load(&events, day, &config).score);
        day += Duration::days(1);
    }

    let window_start_ts = window_start.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).unwrap_or(now);
    let trip_days = partition.trip_days(window_start_ts, now).await?;
    let working_days = working_days_between(window_start, today, &config);

    // Strategic share, current half of the window vs the previous half
    let allocations = partition.list_allocations().await?;
    let midpoint = window_start_ts + (now - window_start_ts) / 2;
    let (current, previous) = allocation_shares(&events, &allocations, midpoint);

    let scores = temporal_risk(&RiskInputs {
        daily_scores,
        trip_days,
        working_days,
        current_allocation: current,
        previous_allocation: previous,
    });
    Ok(ok(scores))
}

/// Split allocated hours at `midpoint` and derive strategic shares for the
/// two halves.
fn allocation_shares(
    events: &[CanonicalEvent],
    allocations: &[TimeAllocation],
    midpoint: DateTime<Utc>,
) -> (AllocationShares, AllocationShares) {
    let mut current = (0.0, 0.0); // (strategic, total)
    let mut previous = (0.0, 0.0);

    for allocation in allocations {
        let Some(event) = events.iter().find(|e| e.id == allocation.event_id) else {
            continue;
        };
        let Some(hours) = event.duration_minutes().map(|m| m as f64 / 60.0) else {
            continue;
        };
        let bucket = if event.sort_instant().is_some_and(|t| t >= midpoint) {
            &mut current
        } else {
            &mut previous
        };
        bucket.1 += hours;
        if allocation.billing_category == BillingCategory::Strategic {
            bucket.0 += hours;
        }
    }

    (
        AllocationShares::from_hours(current.0, current.1),
        AllocationShares::from_hours(previous.0, previous.1),
    )
}

/// Probabilistic availability grid
#[utoipa::path(
    get,
    path = "/probabilistic-availability",
    params(AvailabilityQuery),
    responses(
        (status = 200, description = "Per-slot free probabilities"),
        (status = 400, description = "Invalid range or granularity"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "analytics",
    security(("bearer_auth" = []))
)]
async fn probabilistic_availability(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let start = query.start.unwrap_or(now);
    let end = query.end.unwrap_or(start + Duration::days(1));
    let granularity = query.granularity_minutes.unwrap_or(30);

    if end <= start {
        return Err(ApiError::invalid("end must be after start"));
    }
    if granularity == 0 || granularity > 24 * 60 {
        return Err(ApiError::invalid("granularity_minutes must be in 1..=1440"));
    }
    if end - start > Duration::days(31) {
        return Err(ApiError::invalid("availability ranges are limited to 31 days"));
    }

    let partition = state.ces.partition(user.user_id).await?;
    let events = partition.events_between(start, end).await?;
    let grid = availability_grid(&events, start, end, granularity);
    Ok(ok(grid))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cognitive-load", get(cognitive_load))
        .route("/context-switches", get(context_switches))
        .route("/deep-work", get(deep_work))
        .route("/risk-scores", get(risk_scores))
        .route("/probabilistic-availability", get(probabilistic_availability))
}
