//! Tempo Ingest - ICS feed lifecycle
//!
//! Zero-auth feed attachment, conditional refresh with per-UID diffing,
//! and ICS↔OAuth upgrade/downgrade orchestration.

pub mod feed;
pub mod fetch;
pub mod upgrade;

pub use feed::{
    attach_feed, refresh_feed, validate_feed_url, AttachOutcome, RefreshOutcome,
    MIN_REFRESH_INTERVAL_SECS,
};
pub use fetch::{FeedFetcher, FetchOutcome, FETCH_TIMEOUT};
pub use upgrade::{downgrade_account, upgrade_feed_account, DowngradeOutcomeView, UpgradeOutcome};
