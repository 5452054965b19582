//! Upgrade and downgrade execution
//!
//! Thin orchestration over the core upgrade planner and the partition's
//! transactional apply: pull both accounts' events, plan the merge, apply,
//! and shape the outcome for the API layer.

use tempo_core::error::{CoreError, CoreResult};
use tempo_core::models::Provider;
use tempo_core::types::AccountId;
use tempo_core::upgrade::plan_upgrade;
use tempo_store::Partition;

/// Outcome of upgrading a feed account to OAuth
#[derive(Debug, Clone)]
pub struct UpgradeOutcome {
    pub detected_provider: Provider,
    pub merged_count: usize,
    pub new_count: usize,
    pub orphaned_count: usize,
    pub ics_account_removed: bool,
    pub oauth_account_activated: bool,
}

/// Merge an ICS feed account into a freshly attached OAuth account.
///
/// Matching is by `ical_uid`; feed-era canonical ids survive and unmatched
/// feed events are preserved as orphans under the OAuth account.
pub async fn upgrade_feed_account(
    partition: &Partition,
    ics_account_id: AccountId,
    oauth_account_id: AccountId,
) -> CoreResult<UpgradeOutcome> {
    let ics_account = partition
        .get_account(ics_account_id)
        .await?
        .ok_or(CoreError::UnknownAccount(ics_account_id))?;
    if !ics_account.is_feed() {
        return Err(CoreError::InvalidArgument(
            "upgrade source must be an ICS feed account".to_string(),
        ));
    }

    let oauth_account = partition
        .get_account(oauth_account_id)
        .await?
        .ok_or(CoreError::UnknownAccount(oauth_account_id))?;
    if oauth_account.is_feed() {
        return Err(CoreError::InvalidArgument(
            "upgrade target must be an OAuth account".to_string(),
        ));
    }

    let ics_events = partition.account_events(ics_account_id).await?;
    let oauth_events = partition.account_events(oauth_account_id).await?;
    let ics_event_count = ics_events.len();

    let plan = plan_upgrade(&ics_events, &oauth_events);
    // Zero-loss check before anything is written
    debug_assert_eq!(plan.merges.len() + plan.orphans.len(), ics_event_count);

    let outcome = UpgradeOutcome {
        detected_provider: oauth_account.provider,
        merged_count: plan.merges.len(),
        new_count: plan.additions.len(),
        orphaned_count: plan.orphans.len(),
        ics_account_removed: true,
        oauth_account_activated: true,
    };

    partition
        .apply_upgrade(ics_account_id, oauth_account_id, &plan)
        .await?;

    Ok(outcome)
}

/// Outcome of downgrading a revoked OAuth account to a read-only feed
#[derive(Debug, Clone)]
pub struct DowngradeOutcomeView {
    pub new_feed_account_id: Option<AccountId>,
    pub feed_url: Option<String>,
    pub preserved_event_count: u64,
    /// Always `read_only`; feed accounts never mirror writes
    pub mode: &'static str,
    pub warning: Option<String>,
}

/// Downgrade an OAuth account whose tokens were revoked. With a known
/// public feed URL the event snapshot moves to a new feed account; without
/// one the events are preserved in place and a warning explains that no
/// automatic refresh will occur.
pub async fn downgrade_account(
    partition: &Partition,
    oauth_account_id: AccountId,
    feed_url: Option<String>,
) -> CoreResult<DowngradeOutcomeView> {
    let feed_url = feed_url
        .map(|raw| crate::feed::validate_feed_url(&raw).map(|u| u.to_string()))
        .transpose()?;

    let outcome = partition
        .apply_downgrade(oauth_account_id, feed_url)
        .await?;

    Ok(DowngradeOutcomeView {
        new_feed_account_id: outcome.new_account.as_ref().map(|a| a.id),
        feed_url: outcome.new_account.as_ref().and_then(|a| a.feed_url.clone()),
        preserved_event_count: outcome.preserved_event_count,
        mode: "read_only",
        warning: outcome.warning,
    })
}
