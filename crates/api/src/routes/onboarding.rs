//! Progressive onboarding endpoints
//!
//! A resumable, cross-tab account-attach flow. All reads and writes go
//! through the caller's single partition writer, so concurrent tabs
//! converge on the same account set regardless of ordering.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tempo_core::models::{OnboardingStep, Provider, SessionAccountStatus};
use tempo_core::onboarding::{OnboardingErrorClass, OnboardingTelemetry};
use tempo_core::security::generate_session_token;
use tempo_core::types::SessionId;
use utoipa::ToSchema;

use crate::envelope::{created, ok};
use crate::error::ApiError;
use crate::middleware::bearer_auth::AuthenticatedUser;
use crate::AppState;

#[derive(Debug, Default, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct CreateSessionQuery {
    /// Discard an unfinished session instead of failing `session_exists`
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddAccountRequest {
    /// Caller-chosen identifier of this connection attempt
    pub account_id: String,
    pub provider: Provider,
    pub email: Option<String>,
    #[serde(default = "default_account_status")]
    pub status: SessionAccountStatus,
    pub calendar_count: Option<i64>,
    /// Raw provider error, classified server-side
    pub error: Option<String>,
}

fn default_account_status() -> SessionAccountStatus {
    SessionAccountStatus::Connecting
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateAccountRequest {
    pub account_id: String,
    pub status: SessionAccountStatus,
    pub calendar_count: Option<i64>,
    pub error: Option<String>,
}

/// Classify a raw provider error and emit PII-free telemetry
fn classify_error(provider: Provider, raw: Option<&str>) -> Option<OnboardingErrorClass> {
    let class = OnboardingErrorClass::from_provider_error(raw?);
    let telemetry = OnboardingTelemetry::new(provider, class, Utc::now());
    tracing::info!(
        provider = ?telemetry.provider,
        error_type = class.as_str(),
        severity = ?telemetry.severity,
        transient = class.is_transient(),
        "onboarding connection error"
    );
    Some(class)
}

/// Start an onboarding session
#[utoipa::path(
    post,
    path = "/onboarding/session",
    params(CreateSessionQuery),
    responses(
        (status = 201, description = "Session created"),
        (status = 409, description = "An unfinished session exists"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "onboarding",
    security(("bearer_auth" = []))
)]
async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<CreateSessionQuery>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let session = partition
        .create_onboarding_session(SessionId::new(), &generate_session_token(), query.replace)
        .await?;
    Ok(created(session))
}

/// Current session, if any
#[utoipa::path(
    get,
    path = "/onboarding/session",
    responses(
        (status = 200, description = "Current session or null"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "onboarding",
    security(("bearer_auth" = []))
)]
async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let session = partition.onboarding_session().await?;
    Ok(ok(session))
}

/// Attach an account to the session (idempotent by `account_id`)
#[utoipa::path(
    post,
    path = "/onboarding/session/account",
    request_body = AddAccountRequest,
    responses(
        (status = 200, description = "Session with the account attached"),
        (status = 404, description = "No active session"),
        (status = 409, description = "Session already complete"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "onboarding",
    security(("bearer_auth" = []))
)]
async fn add_account(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<AddAccountRequest>,
) -> Result<Response, ApiError> {
    if req.account_id.trim().is_empty() {
        return Err(ApiError::invalid("account_id must not be empty"));
    }

    let error_class = classify_error(req.provider, req.error.as_deref());
    let status = if error_class.is_some() {
        SessionAccountStatus::Error
    } else {
        req.status
    };

    let partition = state.ces.partition(user.user_id).await?;
    let session = partition
        .add_onboarding_account(
            &req.account_id,
            req.provider,
            req.email,
            status,
            req.calendar_count.unwrap_or(0),
            error_class.map(|c| c.as_str().to_string()),
        )
        .await?;
    Ok(ok(session))
}

/// Update one attached account's status
#[utoipa::path(
    patch,
    path = "/onboarding/session/account",
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "Session after the update"),
        (status = 404, description = "No active session"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "onboarding",
    security(("bearer_auth" = []))
)]
async fn update_account(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;

    // The provider is looked up from the session for telemetry; fall back
    // to classifying without emitting when the account is unknown.
    let provider = partition
        .onboarding_session()
        .await?
        .and_then(|s| {
            s.accounts
                .iter()
                .find(|a| a.account_id == req.account_id)
                .map(|a| a.provider)
        });
    let error_class = match provider {
        Some(provider) => classify_error(provider, req.error.as_deref()),
        None => req
            .error
            .as_deref()
            .map(OnboardingErrorClass::from_provider_error),
    };

    let session = partition
        .update_onboarding_account_status(
            &req.account_id,
            req.status,
            req.calendar_count,
            error_class.map(|c| c.as_str().to_string()),
        )
        .await?;
    Ok(ok(session))
}

/// Complete the session (idempotent)
#[utoipa::path(
    post,
    path = "/onboarding/session/complete",
    responses(
        (status = 200, description = "Completed session"),
        (status = 404, description = "No session"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "onboarding",
    security(("bearer_auth" = []))
)]
async fn complete_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let session = partition.complete_onboarding_session().await?;
    Ok(ok(session))
}

/// Compact onboarding status
#[utoipa::path(
    get,
    path = "/onboarding/status",
    responses(
        (status = 200, description = "Onboarding progress summary"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "onboarding",
    security(("bearer_auth" = []))
)]
async fn status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let session = partition.onboarding_session().await?;

    let body = match &session {
        Some(session) => {
            // Error classes carry a plain-language message for the UI
            let accounts: Vec<serde_json::Value> = session
                .accounts
                .iter()
                .map(|account| {
                    let mut entry = serde_json::to_value(account).unwrap_or_default();
                    let message = account
                        .error_class
                        .as_deref()
                        .and_then(|slug| {
                            serde_json::from_value::<OnboardingErrorClass>(slug.into()).ok()
                        })
                        .map(|class| class.user_message());
                    if let (Some(object), Some(message)) = (entry.as_object_mut(), message) {
                        object.insert("error_message".to_string(), message.into());
                    }
                    entry
                })
                .collect();

            serde_json::json!({
                "active": session.step != OnboardingStep::Complete,
                "session_id": session.id,
                "step": session.step,
                "account_count": accounts.len(),
                "accounts": accounts,
            })
        }
        None => serde_json::json!({
            "active": false,
            "account_count": 0,
            "accounts": [],
        }),
    };
    Ok(ok(body))
}

/// Resume a session by its opaque token (cross-tab continuation)
#[utoipa::path(
    get,
    path = "/onboarding/resume/{token}",
    responses(
        (status = 200, description = "Resumed session"),
        (status = 404, description = "Unknown or expired token"),
        (status = 401, description = "Unauthorized")
    ),
    params(("token" = String, Path, description = "Opaque session token")),
    tag = "onboarding",
    security(("bearer_auth" = []))
)]
async fn resume(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let session = partition
        .onboarding_session_by_token(&token, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("session not found"))?;
    Ok(ok(session))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/onboarding/session", post(create_session))
        .route("/onboarding/session", get(get_session))
        .route("/onboarding/session/account", post(add_account))
        .route("/onboarding/session/account", patch(update_account))
        .route("/onboarding/session/complete", post(complete_session))
        .route("/onboarding/status", get(status))
        .route("/onboarding/resume/{token}", get(resume))
}
