use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tempo_shared::init_env();

    // The guard must live for the duration of the program so file logs flush
    let _guard = tempo_shared::init_tracing("tempo-server");

    tracing::info!("🚀 Starting Tempo unified server");

    let config = config::UnifiedConfig::from_env()?;
    tracing::info!("✓ Configuration loaded");

    // Per-process mirror queue: the store produces, the worker consumes
    let (mirror_tx, mirror_rx) = tempo_store::mirror_channel();

    let ces = tempo_store::Ces::new(config.api.core.data_dir.clone(), mirror_tx);
    let proofs = tempo_store::ProofStore::new(config.api.core.data_dir.join("proofs"));
    let fetcher = tempo_ingest::FeedFetcher::new()?;
    tracing::info!(
        data_dir = %config.api.core.data_dir.display(),
        "✓ Canonical event store ready"
    );

    let shutdown = CancellationToken::new();

    let api_handle = spawn_api(
        ces.clone(),
        proofs,
        fetcher,
        config.clone(),
        shutdown.clone(),
    );
    let worker_handle = spawn_worker(ces, mirror_rx, config.clone(), shutdown.clone());

    tracing::info!("✓ All services started");

    wait_for_shutdown().await;
    tracing::info!("📡 Shutdown signal received");

    shutdown.cancel();
    let _ = tokio::join!(api_handle, worker_handle);

    tracing::info!("✓ All services stopped gracefully");
    Ok(())
}

fn spawn_api(
    ces: tempo_store::Ces,
    proofs: tempo_store::ProofStore,
    fetcher: tempo_ingest::FeedFetcher,
    config: config::UnifiedConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let state = tempo_api::AppState::new(
            ces,
            proofs,
            fetcher,
            config.api.core.auth_secret.clone(),
        );

        tokio::select! {
            result = tempo_api::run_api(state, &config.api) => {
                tracing::error!("API service exited: {:?}", result);
                result.map_err(|e| anyhow::anyhow!(e))
            }
            () = shutdown.cancelled() => {
                tracing::info!("API service shutting down");
                Ok(())
            }
        }
    })
}

fn spawn_worker(
    ces: tempo_store::Ces,
    mirrors: tempo_store::MirrorReceiver,
    config: config::UnifiedConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let runtime = Arc::new(tempo_worker::LoggingRuntime);
        tempo_worker::run_worker(ces, mirrors, runtime, config.worker, shutdown).await
    })
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
