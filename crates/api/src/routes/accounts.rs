//! Account management endpoints

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{delete, get};
use axum::{Extension, Router};
use chrono::Utc;
use tempo_core::types::AccountId;

use crate::envelope::ok;
use crate::error::ApiError;
use crate::middleware::bearer_auth::AuthenticatedUser;
use crate::AppState;

/// List all connected accounts
#[utoipa::path(
    get,
    path = "/accounts",
    responses(
        (status = 200, description = "Accounts"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "accounts",
    security(("bearer_auth" = []))
)]
async fn list_accounts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let accounts = partition.list_accounts(None).await?;
    Ok(ok(accounts))
}

/// Per-account sync health
#[utoipa::path(
    get,
    path = "/accounts/health",
    responses(
        (status = 200, description = "Sync health per account"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "accounts",
    security(("bearer_auth" = []))
)]
async fn sync_health(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let health = partition.sync_health(Utc::now()).await?;
    Ok(ok(health))
}

/// Disconnect an account, hard-deleting its events
#[utoipa::path(
    delete,
    path = "/accounts/{id}",
    params(("id" = String, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account removed"),
        (status = 404, description = "Unknown account"),
        (status = 409, description = "Locked allocations reference this account"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "accounts",
    security(("bearer_auth" = []))
)]
async fn delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(account_id): Path<AccountId>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    partition.delete_account(account_id).await?;
    Ok(ok(serde_json::json!({"deleted": true})))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route("/accounts/health", get(sync_health))
        .route("/accounts/{id}", delete(delete_account))
}
