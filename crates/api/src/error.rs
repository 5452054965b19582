//! Error handling for API endpoints

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tempo_core::CoreError;
use utoipa::ToSchema;

/// API error envelope: `{ok: false, error, error_code}`
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    pub error_code: String,
}

/// API error type that converts core errors into HTTP responses
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl ApiError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self(CoreError::InvalidArgument(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(CoreError::NotFound(msg.into()))
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoreError::AuthRequired => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) | CoreError::UnknownAccount(_) => StatusCode::NOT_FOUND,
            CoreError::SessionExists
            | CoreError::SessionComplete
            | CoreError::Conflict(_)
            | CoreError::InUse(_) => StatusCode::CONFLICT,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details stay in the logs, not in the response body
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal server error: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = Json(ErrorBody {
            ok: false,
            error: message,
            error_code: self.0.error_code().to_string(),
        });

        let mut response = (status, body).into_response();
        if let CoreError::RateLimited { retry_after_secs } = &self.0 {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}
