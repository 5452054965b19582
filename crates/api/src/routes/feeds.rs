//! ICS feed endpoints
//!
//! Zero-auth feed attachment, health, manual refresh, and the
//! upgrade/downgrade lifecycle between feed and OAuth accounts.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempo_core::error::CoreError;
use tempo_core::models::Provider;
use tempo_core::types::AccountId;
use tempo_store::account_health;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::envelope::{created, ok};
use crate::error::ApiError;
use crate::middleware::bearer_auth::AuthenticatedUser;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddFeedRequest {
    /// Public https URL serving `text/calendar`
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddFeedResponse {
    pub account_id: AccountId,
    pub events_imported: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpgradeRequest {
    pub oauth_account_id: AccountId,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DowngradeRequest {
    pub oauth_account_id: AccountId,
    pub provider: Provider,
    pub feed_url: Option<String>,
}

/// Attach a public ICS feed
#[utoipa::path(
    post,
    path = "/feeds",
    request_body = AddFeedRequest,
    responses(
        (status = 201, description = "Feed attached", body = AddFeedResponse),
        (status = 400, description = "Invalid or unreachable feed URL"),
        (status = 409, description = "Feed already attached"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "feeds",
    security(("bearer_auth" = []))
)]
async fn add_feed(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<AddFeedRequest>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let cancel = CancellationToken::new();
    let outcome = tempo_ingest::attach_feed(&partition, &state.fetcher, &req.url, &cancel).await?;

    Ok(created(AddFeedResponse {
        account_id: outcome.account.id,
        events_imported: outcome.events_imported,
    }))
}

/// List attached feeds
#[utoipa::path(
    get,
    path = "/feeds",
    responses(
        (status = 200, description = "Feed accounts"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "feeds",
    security(("bearer_auth" = []))
)]
async fn list_feeds(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let feeds = partition.list_accounts(Some(Provider::IcsFeed)).await?;
    Ok(ok(feeds))
}

/// Feed freshness and failure state
#[utoipa::path(
    get,
    path = "/feeds/{id}/health",
    params(("id" = String, Path, description = "Feed account id")),
    responses(
        (status = 200, description = "Feed health"),
        (status = 404, description = "Unknown account"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "feeds",
    security(("bearer_auth" = []))
)]
async fn feed_health(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(account_id): Path<AccountId>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let account = partition
        .get_account(account_id)
        .await?
        .filter(|a| a.is_feed())
        .ok_or(ApiError(CoreError::UnknownAccount(account_id)))?;

    let health = account_health(&account, 0, Utc::now());
    Ok(ok(serde_json::json!({
        "staleness": health.staleness,
        "is_dead": health.is_dead,
        "last_refresh_at": account.feed_last_refresh_at,
        "consecutive_failures": account.feed_consecutive_failures,
        "refresh_interval_ms": account.feed_refresh_interval_ms,
    })))
}

/// Refresh a feed now, honoring the five-minute window
#[utoipa::path(
    post,
    path = "/feeds/{id}/refresh",
    params(("id" = String, Path, description = "Feed account id")),
    responses(
        (status = 200, description = "Refresh outcome"),
        (status = 429, description = "Refreshed less than five minutes ago"),
        (status = 404, description = "Unknown account"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "feeds",
    security(("bearer_auth" = []))
)]
async fn refresh_feed(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(account_id): Path<AccountId>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let cancel = CancellationToken::new();
    let outcome =
        tempo_ingest::refresh_feed(&partition, &state.fetcher, account_id, Utc::now(), &cancel)
            .await?;

    use tempo_ingest::RefreshOutcome;
    match outcome {
        RefreshOutcome::Skipped { retry_after_secs } => Err(ApiError(CoreError::RateLimited {
            retry_after_secs,
        })),
        RefreshOutcome::Unchanged => Ok(ok(serde_json::json!({"outcome": "unchanged"}))),
        RefreshOutcome::Updated(summary) => Ok(ok(serde_json::json!({
            "outcome": "updated",
            "summary": summary,
        }))),
        RefreshOutcome::Failed(class) => Ok(ok(serde_json::json!({
            "outcome": "failed",
            "category": class.category,
            "retryable": class.retryable,
            "user_action_required": class.user_action_required,
        }))),
    }
}

/// Upgrade a feed account to a connected OAuth account
#[utoipa::path(
    post,
    path = "/feeds/{id}/upgrade",
    params(("id" = String, Path, description = "Feed account id")),
    request_body = UpgradeRequest,
    responses(
        (status = 200, description = "Upgrade summary"),
        (status = 400, description = "Account pair is not upgradeable"),
        (status = 404, description = "Unknown account"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "feeds",
    security(("bearer_auth" = []))
)]
async fn upgrade_feed(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<UpgradeRequest>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let outcome =
        tempo_ingest::upgrade_feed_account(&partition, account_id, req.oauth_account_id).await?;

    Ok(ok(serde_json::json!({
        "detected_provider": outcome.detected_provider,
        "merged_count": outcome.merged_count,
        "new_count": outcome.new_count,
        "orphaned_count": outcome.orphaned_count,
        "ics_account_removed": outcome.ics_account_removed,
        "oauth_account_activated": outcome.oauth_account_activated,
    })))
}

/// Downgrade a revoked OAuth account to a read-only feed
#[utoipa::path(
    post,
    path = "/feeds/downgrade",
    request_body = DowngradeRequest,
    responses(
        (status = 200, description = "Downgrade summary"),
        (status = 404, description = "Unknown account"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "feeds",
    security(("bearer_auth" = []))
)]
async fn downgrade(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<DowngradeRequest>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let outcome =
        tempo_ingest::downgrade_account(&partition, req.oauth_account_id, req.feed_url).await?;

    Ok(ok(serde_json::json!({
        "new_feed_account_id": outcome.new_feed_account_id,
        "feed_url": outcome.feed_url,
        "preserved_event_count": outcome.preserved_event_count,
        "mode": outcome.mode,
        "warning": outcome.warning,
    })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/feeds", post(add_feed))
        .route("/feeds", get(list_feeds))
        .route("/feeds/{id}/health", get(feed_health))
        .route("/feeds/{id}/refresh", post(refresh_feed))
        .route("/feeds/{id}/upgrade", post(upgrade_feed))
        .route("/feeds/downgrade", post(downgrade))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downgrade_request_parses() {
        let req: DowngradeRequest = serde_json::from_str(
            r#"{
                "oauth_account_id": "0bd7a1f2-8a4e-4f0e-b0cb-2f6f3a1b9c4d",
                "provider": "google",
                "feed_url": "https://calendar.google.com/public/basic.ics"
            }"#,
        )
        .unwrap();
        assert_eq!(req.provider, Provider::Google);
        assert!(req.feed_url.is_some());
    }

    #[test]
    fn test_add_feed_request_parses() {
        let req: AddFeedRequest =
            serde_json::from_str(r#"{"url": "https://example.com/cal.ics"}"#).unwrap();
        assert_eq!(req.url, "https://example.com/cal.ics");
    }
}
