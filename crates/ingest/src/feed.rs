//! ICS feed attachment and refresh
//!
//! Attach creates a zero-auth feed account and imports its events; refresh
//! runs the conditional fetch, detects change by body hash, diffs per UID
//! and applies the result as a provider delta. A refresh inside the
//! five-minute window is skipped without touching the network.

use chrono::{DateTime, Duration, Utc};
use rand::RngExt;
use tempo_core::error::{CoreError, CoreResult};
use tempo_core::ics::{
    classify_feed_status, diff_feeds, event_content_hash, parse_ics, FeedErrorCategory,
    FeedErrorClass, FeedSnapshotEntry,
};
use tempo_core::models::{Account, AccountStatus, DeltaSummary, EventDelta, Provider};
use tempo_core::onboarding::{retry_backoff, MAX_SILENT_RETRIES};
use tempo_core::security::sha256_hex;
use tempo_core::types::AccountId;
use tempo_store::{FeedRefreshUpdate, NewAccount, Partition};
use tokio_util::sync::CancellationToken;

use crate::fetch::FeedFetcher;

/// Minimum spacing between two refreshes of the same feed, in seconds
pub const MIN_REFRESH_INTERVAL_SECS: i64 = 300;

fn min_refresh_interval() -> Duration {
    Duration::seconds(MIN_REFRESH_INTERVAL_SECS)
}

const MAX_FEED_URL_LENGTH: usize = 2048;

/// Validate a feed URL: well-formed, https, bounded length.
pub fn validate_feed_url(raw: &str) -> CoreResult<url::Url> {
    if raw.len() > MAX_FEED_URL_LENGTH {
        return Err(CoreError::InvalidArgument(format!(
            "feed URL exceeds {MAX_FEED_URL_LENGTH} characters"
        )));
    }
    let parsed = url::Url::parse(raw)
        .map_err(|e| CoreError::InvalidArgument(format!("invalid feed URL: {e}")))?;
    let Some(host) = parsed.host_str() else {
        return Err(CoreError::InvalidArgument(
            "feed URL is missing a host".to_string(),
        ));
    };

    // Plain http is tolerated for loopback targets only (local development)
    let loopback = matches!(host, "localhost" | "127.0.0.1" | "[::1]");
    if parsed.scheme() != "https" && !(parsed.scheme() == "http" && loopback) {
        return Err(CoreError::InvalidArgument(
            "feed URLs must use https".to_string(),
        ));
    }
    Ok(parsed)
}

/// Result of attaching a feed
#[derive(Debug, Clone)]
pub struct AttachOutcome {
    pub account: Account,
    pub events_imported: u64,
}

/// Attach a public ICS feed: validate, fetch, create the account, import.
pub async fn attach_feed(
    partition: &Partition,
    fetcher: &FeedFetcher,
    url: &str,
    cancel: &CancellationToken,
) -> CoreResult<AttachOutcome> {
    let parsed = validate_feed_url(url)?;
    let url = parsed.to_string();

    if partition
        .find_account_by_subject(Provider::IcsFeed, &url)
        .await?
        .is_some()
    {
        return Err(CoreError::Conflict("feed is already attached".to_string()));
    }

    // Transient fetch failures retry silently with jittered backoff before
    // surfacing to the user; persistent failures surface immediately.
    let mut outcome = fetcher.fetch(&url, None, None, cancel).await;
    let mut attempt = 0;
    while let Some(class) = classify_feed_status(outcome.status) {
        if !class.retryable || attempt >= MAX_SILENT_RETRIES || cancel.is_cancelled() {
            return Err(attach_error(outcome.status, class));
        }
        let jitter = rand::rng().random_range(-1.0..=1.0);
        tokio::time::sleep(retry_backoff(attempt, jitter)).await;
        outcome = fetcher.fetch(&url, None, None, cancel).await;
        attempt += 1;
    }
    let body = outcome
        .body
        .ok_or_else(|| CoreError::InvalidArgument("feed returned an empty body".to_string()))?;

    let events = parse_ics(&body)?;
    let account = partition
        .create_account(NewAccount {
            provider: Provider::IcsFeed,
            provider_subject: url.clone(),
            email: None,
            status: AccountStatus::Active,
            write_capable: false,
            feed_url: Some(url),
            feed_refresh_interval_ms: None,
        })
        .await?;

    let delta = EventDelta {
        upserts: events.into_iter().map(|e| e.into_upsert()).collect(),
        deletes: vec![],
    };
    let summary = partition.apply_provider_delta(account.id, delta).await?;

    partition
        .record_feed_refresh(
            account.id,
            &FeedRefreshUpdate {
                etag: outcome.etag,
                last_modified: outcome.last_modified,
                content_hash: Some(sha256_hex(body.as_bytes())),
                refreshed_at: Utc::now(),
                succeeded: true,
            },
        )
        .await?;

    tracing::info!(
        account_id = %account.id,
        imported = summary.created,
        "attached ICS feed"
    );
    Ok(AttachOutcome {
        account,
        events_imported: summary.created,
    })
}

fn attach_error(status: u16, class: FeedErrorClass) -> CoreError {
    match class.category {
        FeedErrorCategory::RateLimited => CoreError::RateLimited {
            retry_after_secs: 300,
        },
        FeedErrorCategory::Dead | FeedErrorCategory::AuthRequired => CoreError::InvalidArgument(
            format!("feed could not be fetched (HTTP {status}); check the URL"),
        ),
        FeedErrorCategory::ServerError | FeedErrorCategory::Timeout => {
            CoreError::Internal(format!("feed fetch failed (HTTP {status})"))
        }
    }
}

/// Result of one refresh attempt
#[derive(Debug)]
pub enum RefreshOutcome {
    /// Inside the five-minute window; nothing was fetched
    Skipped { retry_after_secs: u64 },
    /// 304 or identical body hash
    Unchanged,
    /// Diff applied
    Updated(DeltaSummary),
    /// Classified fetch failure, recorded on the account
    Failed(FeedErrorClass),
}

/// Refresh one feed account.
pub async fn refresh_feed(
    partition: &Partition,
    fetcher: &FeedFetcher,
    account_id: AccountId,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> CoreResult<RefreshOutcome> {
    let account = partition
        .get_account(account_id)
        .await?
        .ok_or(CoreError::UnknownAccount(account_id))?;
    if !account.is_feed() {
        return Err(CoreError::InvalidArgument(
            "account is not an ICS feed".to_string(),
        ));
    }

    if let Some(last) = account.feed_last_refresh_at {
        let elapsed = now - last;
        if elapsed < min_refresh_interval() {
            let retry_after = (min_refresh_interval() - elapsed).num_seconds().max(0) as u64;
            return Ok(RefreshOutcome::Skipped {
                retry_after_secs: retry_after,
            });
        }
    }

    let url = account
        .feed_url
        .clone()
        .unwrap_or_else(|| account.provider_subject.clone());
    let outcome = fetcher
        .fetch(
            &url,
            account.feed_etag.as_deref(),
            account.feed_last_modified.as_deref(),
            cancel,
        )
        .await;

    if let Some(class) = classify_feed_status(outcome.status) {
        partition
            .record_feed_refresh(
                account_id,
                &FeedRefreshUpdate {
                    etag: None,
                    last_modified: None,
                    content_hash: None,
                    refreshed_at: now,
                    succeeded: false,
                },
            )
            .await?;
        if class.user_action_required && account.status == AccountStatus::Active {
            partition
                .update_account_status(account_id, AccountStatus::Error)
                .await?;
        }
        tracing::warn!(
            %account_id,
            status = outcome.status,
            category = ?class.category,
            "feed refresh failed"
        );
        return Ok(RefreshOutcome::Failed(class));
    }

    // 304: the feed told us nothing changed
    if outcome.status == 304 {
        partition
            .record_feed_refresh(
                account_id,
                &FeedRefreshUpdate {
                    etag: None,
                    last_modified: None,
                    content_hash: None,
                    refreshed_at: now,
                    succeeded: true,
                },
            )
            .await?;
        return Ok(RefreshOutcome::Unchanged);
    }

    let body = outcome
        .body
        .ok_or_else(|| CoreError::Internal("feed response had no body".to_string()))?;
    let content_hash = sha256_hex(body.as_bytes());

    // Body-hash short-circuit when the server ignores conditional headers
    if account.feed_content_hash.as_deref() == Some(content_hash.as_str()) {
        partition
            .record_feed_refresh(
                account_id,
                &FeedRefreshUpdate {
                    etag: outcome.etag,
                    last_modified: outcome.last_modified,
                    content_hash: None,
                    refreshed_at: now,
                    succeeded: true,
                },
            )
            .await?;
        return Ok(RefreshOutcome::Unchanged);
    }

    let incoming = parse_ics(&body)?;
    let existing = partition.account_events(account_id).await?;
    let snapshot: Vec<FeedSnapshotEntry> = existing
        .iter()
        .map(|event| FeedSnapshotEntry {
            uid: event.origin_event_id.clone(),
            sequence: event.sequence,
            content_hash: event_content_hash(event),
        })
        .collect();

    let diff = diff_feeds(&snapshot, incoming);
    let summary = if diff.is_empty() {
        DeltaSummary::default()
    } else {
        let delta = EventDelta {
            upserts: diff
                .added
                .into_iter()
                .chain(diff.modified)
                .map(|e| e.into_upsert())
                .collect(),
            deletes: diff.deleted,
        };
        partition.apply_provider_delta(account_id, delta).await?
    };

    partition
        .record_feed_refresh(
            account_id,
            &FeedRefreshUpdate {
                etag: outcome.etag,
                last_modified: outcome.last_modified,
                content_hash: Some(content_hash),
                refreshed_at: now,
                succeeded: true,
            },
        )
        .await?;

    tracing::debug!(
        %account_id,
        created = summary.created,
        updated = summary.updated,
        deleted = summary.deleted,
        "refreshed ICS feed"
    );
    Ok(RefreshOutcome::Updated(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_feed_url() {
        assert!(validate_feed_url("https://calendar.example.com/basic.ics").is_ok());
        assert!(validate_feed_url("http://calendar.example.com/basic.ics").is_err());
        assert!(validate_feed_url("http://127.0.0.1:8080/basic.ics").is_ok());
        assert!(validate_feed_url("not a url").is_err());
        assert!(validate_feed_url(&format!(
            "https://example.com/{}",
            "a".repeat(MAX_FEED_URL_LENGTH)
        ))
        .is_err());
    }
}
