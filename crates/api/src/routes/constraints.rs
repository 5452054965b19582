//! Scheduling constraint endpoints
//!
//! Working hours, trips, overrides and blocks. Working-hours constraints
//! drive the analytics kernel's day bounds; trips feed the travel-overload
//! risk component.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tempo_core::models::ConstraintKind;
use tempo_core::types::ConstraintId;
use utoipa::ToSchema;

use crate::envelope::{created, ok};
use crate::error::ApiError;
use crate::middleware::bearer_auth::AuthenticatedUser;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConstraintRequest {
    pub kind: ConstraintKind,
    /// Kind-specific configuration; validated for `working_hours`
    #[schema(value_type = Object)]
    #[serde(default)]
    pub config: serde_json::Value,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
}

/// Add a constraint
#[utoipa::path(
    post,
    path = "/constraints",
    request_body = CreateConstraintRequest,
    responses(
        (status = 201, description = "Constraint created"),
        (status = 400, description = "Invalid configuration"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "constraints",
    security(("bearer_auth" = []))
)]
async fn create_constraint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateConstraintRequest>,
) -> Result<Response, ApiError> {
    if let (Some(from), Some(to)) = (req.active_from, req.active_to) {
        if to <= from {
            return Err(ApiError::invalid("active_to must be after active_from"));
        }
    }

    let partition = state.ces.partition(user.user_id).await?;
    let constraint = partition
        .add_constraint(req.kind, req.config, req.active_from, req.active_to)
        .await?;
    Ok(created(constraint))
}

/// List constraints
#[utoipa::path(
    get,
    path = "/constraints",
    responses(
        (status = 200, description = "Constraints"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "constraints",
    security(("bearer_auth" = []))
)]
async fn list_constraints(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    let constraints = partition.list_constraints().await?;
    Ok(ok(constraints))
}

/// Delete a constraint
#[utoipa::path(
    delete,
    path = "/constraints/{id}",
    params(("id" = String, Path, description = "Constraint id")),
    responses(
        (status = 200, description = "Constraint removed"),
        (status = 404, description = "Unknown constraint"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "constraints",
    security(("bearer_auth" = []))
)]
async fn delete_constraint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(constraint_id): Path<ConstraintId>,
) -> Result<Response, ApiError> {
    let partition = state.ces.partition(user.user_id).await?;
    partition.delete_constraint(constraint_id).await?;
    Ok(ok(serde_json::json!({"deleted": true})))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/constraints", post(create_constraint))
        .route("/constraints", get(list_constraints))
        .route("/constraints/{id}", delete(delete_constraint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_constraint_request_parses() {
        let req: CreateConstraintRequest = serde_json::from_str(
            r#"{
                "kind": "working_hours",
                "config": {
                    "days": [1, 2, 3, 4, 5],
                    "start_minute": 540,
                    "end_minute": 1020,
                    "timezone": "Europe/Berlin"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(req.kind, ConstraintKind::WorkingHours);
        assert!(req.active_from.is_none());
    }
}
