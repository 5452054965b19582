//! Per-account sync health

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempo_core::ics::{classify_staleness, Staleness};
use tempo_core::models::{Account, AccountStatus, Provider};
use tempo_core::types::AccountId;
use utoipa::ToSchema;

/// Health summary for one account
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccountHealth {
    pub account_id: AccountId,
    pub provider: Provider,
    pub status: AccountStatus,
    /// Present only for feed-backed accounts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staleness: Option<Staleness>,
    pub is_dead: bool,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i64,
    pub refresh_interval_ms: i64,
    pub event_count: i64,
}

/// Derive the health view of one account
pub fn account_health(account: &Account, event_count: i64, now: DateTime<Utc>) -> AccountHealth {
    let staleness = account.is_feed().then(|| {
        classify_staleness(
            now,
            account.feed_last_success_at,
            account.feed_refresh_interval_ms,
        )
    });

    AccountHealth {
        account_id: account.id,
        provider: account.provider,
        status: account.status,
        staleness,
        is_dead: staleness == Some(Staleness::Dead),
        last_refresh_at: account.feed_last_refresh_at,
        consecutive_failures: account.feed_consecutive_failures,
        refresh_interval_ms: account.feed_refresh_interval_ms,
        event_count,
    }
}
