//! Onboarding error taxonomy and retry policy
//!
//! Provider connection failures during onboarding surface to users in plain
//! language, classified into a small fixed set. Transient classes retry
//! silently with jittered exponential backoff; persistent classes surface
//! immediately. Telemetry derived from these errors carries no PII.

use crate::models::Provider;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Jargon-free classification of an onboarding connection failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingErrorClass {
    AccessDenied,
    InvalidGrant,
    TemporarilyUnavailable,
    NetworkTimeout,
    PopupBlocked,
    StateMismatch,
    InvalidPassword,
    TwoFactorRequired,
    ConnectionRefused,
    AuthFailed,
}

impl OnboardingErrorClass {
    /// Transient errors are retried silently; persistent ones surface
    /// immediately.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::TemporarilyUnavailable | Self::NetworkTimeout | Self::ConnectionRefused
        )
    }

    /// Plain-language message shown to the user
    pub fn user_message(self) -> &'static str {
        match self {
            Self::AccessDenied => "You declined access. Connect again when you're ready.",
            Self::InvalidGrant => "The connection expired before it finished. Please try again.",
            Self::TemporarilyUnavailable => {
                "The calendar service is briefly unavailable. We'll keep trying."
            }
            Self::NetworkTimeout => "The connection timed out. Check your network and retry.",
            Self::PopupBlocked => "Your browser blocked the sign-in window. Allow popups and retry.",
            Self::StateMismatch => "The sign-in session didn't match. Please start over.",
            Self::InvalidPassword => "That password wasn't accepted. Please re-enter it.",
            Self::TwoFactorRequired => {
                "Your account needs a second verification step. Complete it and retry."
            }
            Self::ConnectionRefused => "We couldn't reach the calendar service. We'll keep trying.",
            Self::AuthFailed => "Sign-in failed. Please try connecting again.",
        }
    }

    /// Classify a raw provider error string.
    ///
    /// Unknown errors fall back to the generic `auth_failed` class rather
    /// than leaking provider jargon to the user.
    pub fn from_provider_error(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("access_denied") || lower.contains("consent") {
            Self::AccessDenied
        } else if lower.contains("invalid_grant") || lower.contains("expired") {
            Self::InvalidGrant
        } else if lower.contains("temporarily") || lower.contains("unavailable") {
            Self::TemporarilyUnavailable
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::NetworkTimeout
        } else if lower.contains("popup") {
            Self::PopupBlocked
        } else if lower.contains("state") {
            Self::StateMismatch
        } else if lower.contains("password") {
            Self::InvalidPassword
        } else if lower.contains("two_factor") || lower.contains("2fa") || lower.contains("mfa") {
            Self::TwoFactorRequired
        } else if lower.contains("refused") || lower.contains("unreachable") {
            Self::ConnectionRefused
        } else {
            Self::AuthFailed
        }
    }

    /// Stable identifier used in telemetry and session records
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::InvalidGrant => "invalid_grant",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::NetworkTimeout => "network_timeout",
            Self::PopupBlocked => "popup_blocked",
            Self::StateMismatch => "state_mismatch",
            Self::InvalidPassword => "invalid_password",
            Self::TwoFactorRequired => "two_factor_required",
            Self::ConnectionRefused => "connection_refused",
            Self::AuthFailed => "auth_failed",
        }
    }
}

/// Transient failures retry silently at most this many times
pub const MAX_SILENT_RETRIES: u32 = 3;

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_JITTER: f64 = 0.25;

/// Backoff before retry `attempt` (0-based): `1s · 2^attempt`, jittered.
///
/// `jitter` must come from the caller's RNG in `[-1.0, 1.0]`; it scales to
/// ±25 % of the base delay so the function itself stays deterministic.
pub fn retry_backoff(attempt: u32, jitter: f64) -> Duration {
    let base_ms = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(attempt)) as f64;
    let jittered = base_ms * (1.0 + jitter.clamp(-1.0, 1.0) * BACKOFF_JITTER);
    Duration::from_millis(jittered.max(0.0) as u64)
}

/// Telemetry severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Structured telemetry for an onboarding error.
///
/// Deliberately excludes emails, tokens and user ids; the provider and the
/// error class are the only dimensions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OnboardingTelemetry {
    pub provider: Provider,
    pub error_type: OnboardingErrorClass,
    pub severity: Severity,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_dismissed: Option<bool>,
}

impl OnboardingTelemetry {
    pub fn new(
        provider: Provider,
        error_type: OnboardingErrorClass,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let severity = if error_type.is_transient() {
            Severity::Warning
        } else {
            Severity::Error
        };
        Self {
            provider,
            error_type,
            severity,
            timestamp,
            retry_count: None,
            recovered: None,
            user_dismissed: None,
        }
    }
}
