//! Core domain models for Tempo
//!
//! These models represent the canonical per-user event graph and map to the
//! tables of a user's storage partition.

use crate::types::{
    AccountId, AllocationId, CommitmentId, ConstraintId, EventId, SessionId, UserId, VipId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Event status enumeration (RFC 5545 STATUS)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Default,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

/// Whether an event blocks the owner's time (RFC 5545 TRANSP)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Default,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Transparency {
    #[default]
    Opaque,
    Transparent,
}

/// Event visibility
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Default,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Default,
    Public,
    Private,
}

/// Where a canonical event originated
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Default,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    #[default]
    Provider,
    IcsFeed,
}

/// External calendar provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Google,
    Microsoft,
    Caldav,
    IcsFeed,
}

/// Account lifecycle status (transitions enforced by the store)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Pending,
    Error,
    Revoked,
    Upgraded,
    Downgraded,
}

impl AccountStatus {
    /// Status transitions form a small DAG; `Upgraded` is terminal and a
    /// downgraded account can only come back through re-authentication.
    pub fn can_transition_to(self, to: Self) -> bool {
        use AccountStatus::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Active)
                | (Pending, Error)
                | (Pending, Revoked)
                | (Active, Error)
                | (Active, Revoked)
                | (Active, Upgraded)
                | (Active, Downgraded)
                | (Error, Active)
                | (Error, Revoked)
                | (Error, Downgraded)
                | (Revoked, Active)
                | (Revoked, Downgraded)
                | (Downgraded, Active)
        )
    }
}

/// Event attendee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Attendee {
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

/// Event organizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Organizer {
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Conference/meeting link attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConferenceData {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Canonical event entity
///
/// Externally identified by `(origin_account_id, origin_event_id)`; `id` is
/// stable across provider syncs and ICS↔OAuth upgrades. Timed events carry
/// `start`/`end`; all-day events carry `start_date`/`end_date`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct CanonicalEvent {
    pub id: EventId,
    pub origin_account_id: AccountId,
    pub origin_event_id: String,
    pub ical_uid: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>)]
    pub start_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub end_date: Option<NaiveDate>,
    pub is_all_day: bool,
    pub timezone: String,
    pub status: EventStatus,
    pub visibility: Visibility,
    pub transparency: Transparency,
    pub recurrence_rule: Option<String>,
    pub source: EventSource,
    /// Monotonic non-decreasing provider version
    pub version: i64,
    /// RFC 5545 SEQUENCE as reported by the origin
    pub sequence: i64,
    #[sqlx(json)]
    pub attendees: Vec<Attendee>,
    #[sqlx(json(nullable))]
    pub organizer: Option<Organizer>,
    #[sqlx(json(nullable))]
    pub conference_data: Option<ConferenceData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEvent {
    /// Effective start instant used for ordering and overlap checks.
    /// All-day events sort at midnight UTC of their start date.
    pub fn sort_instant(&self) -> Option<DateTime<Utc>> {
        self.start
            .or_else(|| self.start_date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc()))
    }

    /// Effective end instant; all-day events end at midnight UTC of `end_date`.
    pub fn end_instant(&self) -> Option<DateTime<Utc>> {
        self.end
            .or_else(|| self.end_date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc()))
    }

    /// Duration in whole minutes, when both bounds are known
    pub fn duration_minutes(&self) -> Option<i64> {
        match (self.sort_instant(), self.end_instant()) {
            (Some(s), Some(e)) if e > s => Some((e - s).num_minutes()),
            _ => None,
        }
    }

    /// True when the event occupies time: opaque and not cancelled
    pub fn is_busy(&self) -> bool {
        self.transparency == Transparency::Opaque && self.status != EventStatus::Cancelled
    }
}

/// Calendar account entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub provider: Provider,
    /// External subject for OAuth accounts; the feed URL for ICS feeds
    pub provider_subject: String,
    pub email: Option<String>,
    pub status: AccountStatus,
    /// Whether outbound mirror writes are dispatched for this account
    pub write_capable: bool,
    pub feed_url: Option<String>,
    pub feed_etag: Option<String>,
    pub feed_last_modified: Option<String>,
    pub feed_content_hash: Option<String>,
    pub feed_last_refresh_at: Option<DateTime<Utc>>,
    pub feed_last_success_at: Option<DateTime<Utc>>,
    pub feed_consecutive_failures: i64,
    pub feed_refresh_interval_ms: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_feed(&self) -> bool {
        self.provider == Provider::IcsFeed
    }
}

/// Scheduling constraint kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    WorkingHours,
    Trip,
    Override,
    Block,
}

/// Scheduling constraint entity (half-open `[active_from, active_to)`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Constraint {
    pub id: ConstraintId,
    pub kind: ConstraintKind,
    /// Kind-specific configuration, see [`WorkingHoursConfig`]
    #[schema(value_type = Object)]
    pub config: serde_json::Value,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Configuration payload for `ConstraintKind::WorkingHours`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkingHoursConfig {
    /// ISO weekday numbers, 1 = Monday .. 7 = Sunday
    pub days: Vec<u8>,
    /// Minutes after local midnight
    pub start_minute: u32,
    pub end_minute: u32,
    /// IANA timezone name
    pub timezone: String,
}

impl Default for WorkingHoursConfig {
    fn default() -> Self {
        Self {
            days: vec![1, 2, 3, 4, 5],
            start_minute: 9 * 60,
            end_minute: 17 * 60,
            timezone: "UTC".to_string(),
        }
    }
}

/// Conditions attached to a VIP policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Default)]
pub struct VipConditions {
    pub allow_after_hours: bool,
    pub min_notice_hours: i64,
}

/// VIP participant policy
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct VipPolicy {
    pub id: VipId,
    /// SHA-256 of the normalized (lowercased, trimmed) email
    pub participant_hash: String,
    pub display_name: String,
    /// Clamped to `[0.0, 10.0]` on creation
    pub priority_weight: f64,
    #[sqlx(json)]
    pub conditions: VipConditions,
    pub created_at: DateTime<Utc>,
}

/// Billing category for a time allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum BillingCategory {
    Billable,
    Strategic,
    Internal,
    Personal,
}

/// Billable-time allocation for one canonical event
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct TimeAllocation {
    pub id: AllocationId,
    pub event_id: EventId,
    pub billing_category: BillingCategory,
    pub client_id: Option<String>,
    pub rate: Option<f64>,
    pub confidence: f64,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Commitment window type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum WindowType {
    Weekly,
    Monthly,
}

/// Client-hour commitment
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Commitment {
    pub id: CommitmentId,
    pub client_id: String,
    pub client_name: String,
    pub target_hours: f64,
    pub window_type: WindowType,
    pub rolling_window_weeks: i64,
    pub hard_minimum: bool,
    pub proof_required: bool,
    pub created_at: DateTime<Utc>,
}

/// Onboarding flow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OnboardingStep {
    Welcome,
    Connecting,
    Complete,
}

/// Per-account connection status inside an onboarding session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionAccountStatus {
    Connecting,
    Connected,
    Synced,
    Error,
    Disconnected,
}

/// Account entry in an onboarding session
///
/// `account_id` is the caller-supplied identifier of the connection attempt;
/// the set is unique by `account_id` and re-submission updates in place.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct SessionAccount {
    pub account_id: String,
    pub provider: Provider,
    pub email: Option<String>,
    pub status: SessionAccountStatus,
    pub calendar_count: i64,
    /// Jargon-free error classification when `status = error`
    pub error_class: Option<String>,
    /// Stable position in the session's ordered account list
    pub position: i64,
}

/// Progressive onboarding session (one unfinished session per user)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OnboardingSession {
    pub id: SessionId,
    pub user_id: UserId,
    /// Opaque resume token; carries no PII
    pub session_token: String,
    pub step: OnboardingStep,
    pub accounts: Vec<SessionAccount>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Mirror operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MirrorOperation {
    Upsert,
    Delete,
}

/// Outbound write intent produced by the delta applicator
///
/// Delivery is at-least-once; consumers dedupe by
/// `(canonical_event_id, version, operation)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorIntent {
    pub user_id: UserId,
    pub target_account_id: AccountId,
    pub canonical_event_id: EventId,
    pub version: i64,
    pub operation: MirrorOperation,
    pub payload: serde_json::Value,
}

/// Incoming event body for a provider/feed upsert
#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct EventPayload {
    pub ical_uid: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>)]
    pub start_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_all_day: bool,
    pub timezone: Option<String>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub transparency: Transparency,
    pub recurrence_rule: Option<String>,
    #[serde(default)]
    pub sequence: i64,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    pub organizer: Option<Organizer>,
    pub conference_data: Option<ConferenceData>,
}

/// One upsert inside a provider delta
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventUpsert {
    pub origin_event_id: String,
    /// Missing versions default to 1
    pub version: Option<i64>,
    pub payload: EventPayload,
}

/// A batch of upserts and deletes applied atomically to one account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDelta {
    pub upserts: Vec<EventUpsert>,
    /// Origin event ids to cancel
    pub deletes: Vec<String>,
}

/// Result of applying a delta
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DeltaSummary {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub mirrors_enqueued: u64,
    /// Bounded collection of non-fatal errors (mirror enqueue failures etc.)
    pub errors: Vec<String>,
}
