//! Success response envelope: `{ok: true, data, meta?}`

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub ok: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// `200 {ok: true, data}`
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        ok: true,
        data,
        meta: None,
    })
    .into_response()
}

/// `200 {ok: true, data, meta}`
pub fn ok_with_meta<T: Serialize>(data: T, meta: serde_json::Value) -> Response {
    Json(Envelope {
        ok: true,
        data,
        meta: Some(meta),
    })
    .into_response()
}

/// `201 {ok: true, data}`
pub fn created<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(Envelope {
            ok: true,
            data,
            meta: None,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_envelope_shape() {
        let response = ok(serde_json::json!({"value": 1}));
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["ok"], true);
        assert_eq!(parsed["data"]["value"], 1);
        assert!(parsed.get("meta").is_none());
    }

    #[tokio::test]
    async fn test_meta_included_when_present() {
        let response = ok_with_meta(1, serde_json::json!({"next_cursor": "abc"}));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["meta"]["next_cursor"], "abc");
    }
}
