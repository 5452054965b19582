//! Feed refresh scheduler
//!
//! Periodically walks every user partition and refreshes the feed accounts
//! whose refresh interval has elapsed. Dead feeds and feeds awaiting user
//! action are left alone; transient failures are retried on the next pass
//! (the per-account failure counter is the backoff signal).

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use tempo_core::ics::{classify_staleness, Staleness};
use tempo_core::models::{AccountStatus, Provider};
use tempo_ingest::{refresh_feed, FeedFetcher, RefreshOutcome};
use tempo_store::Ces;
use tokio::task::JoinSet;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Run the refresh scheduler until shutdown.
pub async fn run_refresh_scheduler(
    ces: Ces,
    fetcher: FeedFetcher,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        poll_interval_secs = config.poll_interval_secs,
        "feed refresh scheduler started"
    );

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("feed refresh scheduler shut down");
                return Ok(());
            }
            _ = interval.tick() => {
                if let Err(e) = refresh_pass(&ces, &fetcher, &config, &shutdown).await {
                    warn!(error = %e, "feed refresh pass failed");
                }
            }
        }
    }
}

/// One scheduler pass over every partition's due feeds
async fn refresh_pass(
    ces: &Ces,
    fetcher: &FeedFetcher,
    config: &Config,
    shutdown: &CancellationToken,
) -> Result<()> {
    let now = Utc::now();
    let users = ces.list_users().await?;

    let mut tasks: JoinSet<()> = JoinSet::new();
    for user_id in users {
        if shutdown.is_cancelled() {
            break;
        }

        let partition = match ces.partition(user_id).await {
            Ok(partition) => partition,
            Err(e) => {
                warn!(%user_id, error = %e, "skipping unopenable partition");
                continue;
            }
        };
        let feeds = partition.list_accounts(Some(Provider::IcsFeed)).await?;

        for account in feeds {
            if account.status != AccountStatus::Active {
                continue;
            }
            let due = match account.feed_last_refresh_at {
                None => true,
                Some(last) => {
                    now - last >= ChronoDuration::milliseconds(account.feed_refresh_interval_ms)
                }
            };
            // A feed that has been failing long enough to be dead waits for
            // user action instead of hammering the origin.
            let dead = classify_staleness(
                now,
                account.feed_last_success_at,
                account.feed_refresh_interval_ms,
            ) == Staleness::Dead
                && account.feed_consecutive_failures > 0;
            if !due || dead {
                continue;
            }

            while tasks.len() >= config.refresh_concurrency {
                tasks.join_next().await;
            }

            let partition = partition.clone();
            let fetcher = fetcher.clone();
            let cancel = shutdown.clone();
            tasks.spawn(async move {
                match refresh_feed(&partition, &fetcher, account.id, Utc::now(), &cancel).await {
                    Ok(RefreshOutcome::Updated(summary)) => {
                        debug!(
                            account_id = %account.id,
                            created = summary.created,
                            updated = summary.updated,
                            deleted = summary.deleted,
                            "scheduled refresh applied changes"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(account_id = %account.id, error = %e, "scheduled refresh failed");
                    }
                }
            });
        }
    }

    while tasks.join_next().await.is_some() {}
    Ok(())
}
