//! VIP policy endpoints (premium tier)

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use tempo_core::models::VipConditions;
use tempo_core::security::Tier;
use tempo_core::types::VipId;
use utoipa::ToSchema;

use crate::envelope::{created, ok};
use crate::error::ApiError;
use crate::middleware::bearer_auth::{require_tier, AuthenticatedUser};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateVipRequest {
    /// Participant email; stored only as a SHA-256 hash of the normalized address
    pub email: String,
    pub display_name: String,
    #[serde(default = "default_weight")]
    pub priority_weight: f64,
    #[serde(default)]
    pub conditions: VipConditions,
}

fn default_weight() -> f64 {
    1.0
}

/// Create a VIP policy
#[utoipa::path(
    post,
    path = "/vip-policies",
    request_body = CreateVipRequest,
    responses(
        (status = 201, description = "Policy created"),
        (status = 400, description = "Invalid weight or email"),
        (status = 403, description = "Requires premium tier"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "vip",
    security(("bearer_auth" = []))
)]
async fn create_policy(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateVipRequest>,
) -> Result<Response, ApiError> {
    require_tier(&user, Tier::Premium)?;

    let partition = state.ces.partition(user.user_id).await?;
    let policy = partition
        .create_vip_policy(&req.email, req.display_name, req.priority_weight, req.conditions)
        .await?;
    Ok(created(policy))
}

/// List VIP policies
#[utoipa::path(
    get,
    path = "/vip-policies",
    responses(
        (status = 200, description = "Policies, highest weight first"),
        (status = 403, description = "Requires premium tier"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "vip",
    security(("bearer_auth" = []))
)]
async fn list_policies(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    require_tier(&user, Tier::Premium)?;

    let partition = state.ces.partition(user.user_id).await?;
    let policies = partition.list_vip_policies().await?;
    Ok(ok(policies))
}

/// Delete a VIP policy
#[utoipa::path(
    delete,
    path = "/vip-policies/{id}",
    params(("id" = String, Path, description = "Policy id")),
    responses(
        (status = 200, description = "Policy removed"),
        (status = 404, description = "Unknown policy"),
        (status = 403, description = "Requires premium tier"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "vip",
    security(("bearer_auth" = []))
)]
async fn delete_policy(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(vip_id): Path<VipId>,
) -> Result<Response, ApiError> {
    require_tier(&user, Tier::Premium)?;

    let partition = state.ces.partition(user.user_id).await?;
    partition.delete_vip_policy(vip_id).await?;
    Ok(ok(serde_json::json!({"deleted": true})))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/vip-policies", post(create_policy))
        .route("/vip-policies", get(list_policies))
        .route("/vip-policies/{id}", delete(delete_policy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let req: CreateVipRequest = serde_json::from_str(
            r#"{"email": "ceo@example.com", "display_name": "The CEO"}"#,
        )
        .unwrap();
        assert_eq!(req.priority_weight, 1.0);
        assert!(!req.conditions.allow_after_hours);
        assert_eq!(req.conditions.min_notice_hours, 0);
    }
}
