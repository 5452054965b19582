//! Mirror writer
//!
//! Consumes outbound write intents, groups them by target account and
//! dispatches batches to the per-account provider runtime. Delivery is
//! at-least-once: failed batches are retried with exponential backoff up
//! to a cap, and duplicates are filtered by
//! `(canonical_event_id, version, operation)`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tempo_core::models::{MirrorIntent, MirrorOperation};
use tempo_core::types::{AccountId, EventId};
use tempo_store::MirrorReceiver;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;

/// Out-of-scope collaborator: the long-running per-account sync runtime
/// that performs outbound provider writes.
#[async_trait]
pub trait ProviderRuntime: Send + Sync {
    async fn deliver(&self, account_id: AccountId, batch: Vec<MirrorIntent>) -> Result<()>;
}

/// Default runtime used until a real provider runtime is wired in; accepts
/// every batch and logs it.
pub struct LoggingRuntime;

#[async_trait]
impl ProviderRuntime for LoggingRuntime {
    async fn deliver(&self, account_id: AccountId, batch: Vec<MirrorIntent>) -> Result<()> {
        info!(%account_id, count = batch.len(), "mirror batch accepted (logging runtime)");
        Ok(())
    }
}

type DedupeKey = (EventId, i64, MirrorOperation);

/// Dedupe window; old keys are discarded wholesale once exceeded
const DEDUPE_CAPACITY: usize = 8_192;

struct RetryEntry {
    account_id: AccountId,
    batch: Vec<MirrorIntent>,
    attempt: u32,
    not_before: DateTime<Utc>,
}

/// Run the mirror writer until the queue closes or shutdown is requested.
pub async fn run_mirror_writer(
    mut intents: MirrorReceiver,
    runtime: Arc<dyn ProviderRuntime>,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut seen: HashSet<DedupeKey> = HashSet::new();
    let mut retries: VecDeque<RetryEntry> = VecDeque::new();
    let mut buffer: Vec<MirrorIntent> = Vec::new();
    let mut flush_interval = tokio::time::interval(Duration::from_secs(1));

    info!(
        batch_size = config.batch_size,
        max_retries = config.max_retry_count,
        "mirror writer started"
    );

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                // Drain what is already buffered, then stop
                dispatch(&runtime, &mut seen, &mut retries, buffer.drain(..).collect(), &config).await;
                info!("mirror writer shut down");
                return Ok(());
            }

            intent = intents.recv() => {
                match intent {
                    Some(intent) => {
                        buffer.push(intent);
                        if buffer.len() >= config.batch_size {
                            let batch: Vec<_> = buffer.drain(..).collect();
                            dispatch(&runtime, &mut seen, &mut retries, batch, &config).await;
                        }
                    }
                    None => {
                        dispatch(&runtime, &mut seen, &mut retries, buffer.drain(..).collect(), &config).await;
                        info!("mirror queue closed, writer exiting");
                        return Ok(());
                    }
                }
            }

            _ = flush_interval.tick() => {
                if !buffer.is_empty() {
                    let batch: Vec<_> = buffer.drain(..).collect();
                    dispatch(&runtime, &mut seen, &mut retries, batch, &config).await;
                }
                flush_retries(&runtime, &mut retries, &config).await;
            }
        }
    }
}

/// Group, dedupe and deliver a batch of intents
async fn dispatch(
    runtime: &Arc<dyn ProviderRuntime>,
    seen: &mut HashSet<DedupeKey>,
    retries: &mut VecDeque<RetryEntry>,
    intents: Vec<MirrorIntent>,
    config: &Config,
) {
    if intents.is_empty() {
        return;
    }

    if seen.len() > DEDUPE_CAPACITY {
        seen.clear();
    }

    let mut by_account: HashMap<AccountId, Vec<MirrorIntent>> = HashMap::new();
    for intent in intents {
        let key = (intent.canonical_event_id, intent.version, intent.operation);
        if !seen.insert(key) {
            continue;
        }
        by_account
            .entry(intent.target_account_id)
            .or_default()
            .push(intent);
    }

    for (account_id, batch) in by_account {
        deliver_or_requeue(runtime, retries, account_id, batch, 0, config).await;
    }
}

async fn deliver_or_requeue(
    runtime: &Arc<dyn ProviderRuntime>,
    retries: &mut VecDeque<RetryEntry>,
    account_id: AccountId,
    batch: Vec<MirrorIntent>,
    attempt: u32,
    config: &Config,
) {
    match runtime.deliver(account_id, batch.clone()).await {
        Ok(()) => {}
        Err(e) if attempt < config.max_retry_count => {
            let backoff_minutes = 2_i64.pow(attempt + 1);
            warn!(
                %account_id,
                attempt,
                backoff_minutes,
                error = %e,
                "mirror delivery failed, scheduling retry"
            );
            retries.push_back(RetryEntry {
                account_id,
                batch,
                attempt: attempt + 1,
                not_before: Utc::now() + ChronoDuration::minutes(backoff_minutes),
            });
        }
        Err(e) => {
            error!(
                %account_id,
                dropped = batch.len(),
                error = %e,
                "mirror delivery exceeded max retries, dropping batch"
            );
        }
    }
}

/// Re-attempt retry entries whose backoff has elapsed
async fn flush_retries(
    runtime: &Arc<dyn ProviderRuntime>,
    retries: &mut VecDeque<RetryEntry>,
    config: &Config,
) {
    let now = Utc::now();
    let due: Vec<RetryEntry> = {
        let mut due = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some(entry) = retries.pop_front() {
            if entry.not_before <= now {
                due.push(entry);
            } else {
                remaining.push_back(entry);
            }
        }
        *retries = remaining;
        due
    };

    for entry in due {
        deliver_or_requeue(
            runtime,
            retries,
            entry.account_id,
            entry.batch,
            entry.attempt,
            config,
        )
        .await;
    }
}
