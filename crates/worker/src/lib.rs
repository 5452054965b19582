//! Tempo Worker - Background processing
//!
//! Runs the mirror writer (outbound provider write intents) and the feed
//! refresh scheduler. Both loops are cancellation-aware and drain in-flight
//! work on shutdown.

pub mod config;
pub mod mirror;
pub mod refresh;

pub use config::Config;
pub use mirror::{LoggingRuntime, ProviderRuntime};

use anyhow::Result;
use std::sync::Arc;
use tempo_ingest::FeedFetcher;
use tempo_store::{Ces, MirrorReceiver};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the background worker until shutdown.
///
/// # Arguments
/// * `ces` - partition registry shared with the API
/// * `mirrors` - receiving end of the per-process mirror queue
/// * `runtime` - per-account provider runtime collaborator
/// * `config` - worker configuration
/// * `shutdown` - cancellation token for graceful shutdown
pub async fn run_worker(
    ces: Ces,
    mirrors: MirrorReceiver,
    runtime: Arc<dyn ProviderRuntime>,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let fetcher = FeedFetcher::new()?;

    info!(
        poll_interval = config.poll_interval_secs,
        batch_size = config.batch_size,
        "starting worker"
    );

    let mirror_task = tokio::spawn(mirror::run_mirror_writer(
        mirrors,
        runtime,
        config.clone(),
        shutdown.clone(),
    ));
    let refresh_task = tokio::spawn(refresh::run_refresh_scheduler(
        ces,
        fetcher,
        config,
        shutdown,
    ));

    let (mirror_result, refresh_result) = tokio::join!(mirror_task, refresh_task);
    mirror_result??;
    refresh_result??;

    info!("worker stopped");
    Ok(())
}
