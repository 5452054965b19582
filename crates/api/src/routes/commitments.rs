//! Commitment and proof endpoints (premium tier)
//!
//! Commitment status is computed over the rolling window; exports render a
//! deterministic proof document, hash it, and store it content-addressed
//! with the hash as metadata. Proof downloads validate key ownership and
//! answer `404` for foreign keys.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tempo_core::governance::{commitment_status, commitment_window};
use tempo_core::models::WindowType;
use tempo_core::proof::{proof_object_key, render_proof, ProofData, ProofEvent, ProofFormat};
use tempo_core::security::Tier;
use tempo_core::types::CommitmentId;
use utoipa::ToSchema;

use crate::envelope::{created, ok};
use crate::error::ApiError;
use crate::middleware::bearer_auth::{require_tier, AuthenticatedUser};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCommitmentRequest {
    pub client_id: String,
    pub client_name: String,
    pub target_hours: f64,
    pub window_type: WindowType,
    #[serde(default = "default_weeks")]
    pub rolling_window_weeks: i64,
    #[serde(default)]
    pub hard_minimum: bool,
    #[serde(default)]
    pub proof_required: bool,
}

fn default_weeks() -> i64 {
    1
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExportRequest {
    pub format: ProofFormat,
}

/// Create a commitment
#[utoipa::path(
    post,
    path = "/commitments",
    request_body = CreateCommitmentRequest,
    responses(
        (status = 201, description = "Commitment created"),
        (status = 400, description = "Invalid target or window"),
        (status = 403, description = "Requires premium tier"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "commitments",
    security(("bearer_auth" = []))
)]
async fn create_commitment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateCommitmentRequest>,
) -> Result<Response, ApiError> {
    require_tier(&user, Tier::Premium)?;

    let partition = state.ces.partition(user.user_id).await?;
    let commitment = partition
        .create_commitment(
            req.client_id,
            req.client_name,
            req.target_hours,
            req.window_type,
            req.rolling_window_weeks,
            req.hard_minimum,
            req.proof_required,
        )
        .await?;
    Ok(created(commitment))
}

/// List commitments
#[utoipa::path(
    get,
    path = "/commitments",
    responses(
        (status = 200, description = "Commitments"),
        (status = 403, description = "Requires premium tier"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "commitments",
    security(("bearer_auth" = []))
)]
async fn list_commitments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    require_tier(&user, Tier::Premium)?;

    let partition = state.ces.partition(user.user_id).await?;
    let commitments = partition.list_commitments().await?;
    Ok(ok(commitments))
}

/// Rolling-window status of a commitment
#[utoipa::path(
    get,
    path = "/commitments/{id}/status",
    params(("id" = String, Path, description = "Commitment id")),
    responses(
        (status = 200, description = "Window, actual hours and compliance"),
        (status = 404, description = "Unknown commitment"),
        (status = 403, description = "Requires premium tier"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "commitments",
    security(("bearer_auth" = []))
)]
async fn get_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(commitment_id): Path<CommitmentId>,
) -> Result<Response, ApiError> {
    require_tier(&user, Tier::Premium)?;

    let partition = state.ces.partition(user.user_id).await?;
    let commitment = partition
        .get_commitment(commitment_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("commitment not found: {commitment_id}")))?;

    let now = Utc::now();
    let window = commitment_window(&commitment, now);
    let entries = partition
        .commitment_entries(&commitment.client_id, window)
        .await?;
    let status = commitment_status(&commitment, &entries, now);

    Ok(ok(serde_json::json!({
        "commitment_id": commitment.id,
        "client_id": commitment.client_id,
        "window_start": status.window.start,
        "window_end": status.window.end,
        "target_hours": status.target_hours,
        "actual_hours": status.actual_hours,
        "status": status.status,
        "billable_event_count": status.billable_event_count,
    })))
}

/// Export a proof document for the current window
#[utoipa::path(
    post,
    path = "/commitments/{id}/export",
    params(("id" = String, Path, description = "Commitment id")),
    request_body = ExportRequest,
    responses(
        (status = 201, description = "Rendered proof stored; key and hash returned"),
        (status = 404, description = "Unknown commitment"),
        (status = 403, description = "Requires premium tier"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "commitments",
    security(("bearer_auth" = []))
)]
async fn export_proof(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(commitment_id): Path<CommitmentId>,
    Json(req): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    require_tier(&user, Tier::Premium)?;

    let partition = state.ces.partition(user.user_id).await?;
    let commitment = partition
        .get_commitment(commitment_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("commitment not found: {commitment_id}")))?;

    let now = Utc::now();
    let window = commitment_window(&commitment, now);
    let entries = partition
        .commitment_entries(&commitment.client_id, window)
        .await?;
    let status = commitment_status(&commitment, &entries, now);

    let events = entries
        .iter()
        .filter_map(|(event, _)| {
            let start = event.sort_instant()?;
            let end = event.end_instant()?;
            Some(ProofEvent {
                event_id: event.id,
                title: event.title.clone(),
                start,
                end,
                hours: (end - start).num_minutes() as f64 / 60.0,
            })
        })
        .collect();

    let proof = ProofData::new(
        commitment.clone(),
        window,
        status.actual_hours,
        status.status,
        events,
    );
    let proof_hash = proof.proof_hash()?;
    let document = render_proof(&proof, &proof_hash, req.format);

    let key = proof_object_key(user.user_id, commitment_id, now, req.format);
    state.proofs.put(&key, &document, &proof_hash).await?;

    Ok(created(serde_json::json!({
        "key": key,
        "proof_hash": proof_hash,
        "format": req.format,
        "status": status.status,
        "actual_hours": status.actual_hours,
    })))
}

/// Delete a commitment
#[utoipa::path(
    delete,
    path = "/commitments/{id}",
    params(("id" = String, Path, description = "Commitment id")),
    responses(
        (status = 200, description = "Commitment removed"),
        (status = 404, description = "Unknown commitment"),
        (status = 403, description = "Requires premium tier"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "commitments",
    security(("bearer_auth" = []))
)]
async fn delete_commitment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(commitment_id): Path<CommitmentId>,
) -> Result<Response, ApiError> {
    require_tier(&user, Tier::Premium)?;

    let partition = state.ces.partition(user.user_id).await?;
    partition.delete_commitment(commitment_id).await?;
    Ok(ok(serde_json::json!({"deleted": true})))
}

/// Download a stored proof document
#[utoipa::path(
    get,
    path = "/proofs/{key}",
    params(("key" = String, Path, description = "Full proof object key")),
    responses(
        (status = 200, description = "Proof document bytes"),
        (status = 404, description = "Unknown key or foreign owner"),
        (status = 403, description = "Requires premium tier"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "commitments",
    security(("bearer_auth" = []))
)]
async fn download_proof(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    require_tier(&user, Tier::Premium)?;

    let (bytes, metadata) = state.proofs.get(user.user_id, &key).await?;

    let format = if key.ends_with(".pdf") {
        ProofFormat::Pdf
    } else {
        ProofFormat::Csv
    };
    let content_type = format.content_type();
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::HeaderName::from_static("x-proof-hash"),
                metadata.proof_hash,
            ),
        ],
        bytes,
    )
        .into_response())
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/commitments", post(create_commitment))
        .route("/commitments", get(list_commitments))
        .route("/commitments/{id}/status", get(get_status))
        .route("/commitments/{id}/export", post(export_proof))
        .route("/commitments/{id}", delete(delete_commitment))
        .route("/proofs/{*key}", get(download_proof))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_commitment_request_defaults() {
        let req: CreateCommitmentRequest = serde_json::from_str(
            r#"{
                "client_id": "acme",
                "client_name": "Acme Corp",
                "target_hours": 20,
                "window_type": "WEEKLY"
            }"#,
        )
        .unwrap();
        assert_eq!(req.rolling_window_weeks, 1);
        assert!(!req.hard_minimum);
        assert!(!req.proof_required);
    }

    #[test]
    fn test_export_request_formats() {
        let pdf: ExportRequest = serde_json::from_str(r#"{"format": "pdf"}"#).unwrap();
        assert_eq!(pdf.format, ProofFormat::Pdf);
        let csv: ExportRequest = serde_json::from_str(r#"{"format": "csv"}"#).unwrap();
        assert_eq!(csv.format, ProofFormat::Csv);
        assert!(serde_json::from_str::<ExportRequest>(r#"{"format": "docx"}"#).is_err());
    }
}
