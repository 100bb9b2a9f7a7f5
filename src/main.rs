// =============================================================================
// Nova Scout — Main Entry Point
// =============================================================================
//
// Solana migration-token monitor: ingests newly-migrated tokens from the
// streaming feed, scores them against market-data metrics, drives the
// Monitored → Active → Archived lifecycle, and publishes the top Active
// tokens as a TOML strategy artifact.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod cache;
mod feed;
mod lifecycle;
mod provider;
mod publication;
mod scheduler;
mod scoring;
mod settings;
mod store;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::lifecycle::LifecycleController;
use crate::provider::ProviderClient;
use crate::settings::{Settings, SettingsStore};
use crate::store::{MemoryTokenStore, TokenRepository};

/// Grace period for each long-lived task to unwind after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║            Nova Scout — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let initial_settings = Settings::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "invalid settings overrides in environment — using defaults");
        Settings::default()
    });

    let provider_base_url = std::env::var("PROVIDER_BASE_URL")
        .unwrap_or_else(|_| "https://public-api.birdeye.so".into());
    let provider_api_key = std::env::var("PROVIDER_API_KEY").ok().filter(|k| !k.is_empty());
    if provider_api_key.is_none() {
        warn!("PROVIDER_API_KEY not set — provider requests will be unauthenticated");
    }
    let feed_url = std::env::var("FEED_WS_URL")
        .unwrap_or_else(|_| "wss://pumpportal.fun/data-api/real-time".into());

    info!(
        provider = %provider_base_url,
        feed = %feed_url,
        cadence_monitored = initial_settings.cadence_monitored_sec,
        cadence_active = initial_settings.cadence_active_sec,
        "configuration loaded"
    );

    // ── 2. Build services ────────────────────────────────────────────────
    let settings = Arc::new(SettingsStore::new(initial_settings.clone()));
    let store: Arc<dyn TokenRepository> = Arc::new(MemoryTokenStore::new());
    let provider_client = Arc::new(ProviderClient::new(
        provider_base_url,
        provider_api_key,
        initial_settings.ext_max_concurrency,
    ));
    let controller = Arc::new(LifecycleController::new(
        store.clone(),
        provider_client.clone(),
        settings.clone(),
    ));

    let state = Arc::new(AppState::new(
        settings.clone(),
        store.clone(),
        provider_client.clone(),
        controller.clone(),
    ));

    // Shutdown signal observed by every long-lived task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── 3. Feed subscriber task ──────────────────────────────────────────
    let feed_store = store.clone();
    let feed_shutdown = shutdown_rx.clone();
    let feed_handle = tokio::spawn(async move {
        feed::run_feed(feed_url, feed_store, feed_shutdown).await;
    });

    // ── 4. Scheduler task ────────────────────────────────────────────────
    let sched_shutdown = shutdown_rx.clone();
    let sched_controller = controller.clone();
    let sched_store = store.clone();
    let sched_settings = settings.clone();
    let sched_provider = provider_client.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler::run_scheduler(
            sched_controller,
            sched_store,
            sched_settings,
            sched_provider,
            sched_shutdown,
        )
        .await;
    });

    // ── 5. API server ────────────────────────────────────────────────────
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into());
    let api_state = state.clone();
    let api_addr = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&api_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %api_addr, error = %e, "failed to bind API server");
                return;
            }
        };
        info!(addr = %api_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown: feed → scheduler → gateway ─────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(SHUTDOWN_GRACE, feed_handle).await.is_err() {
        warn!("feed subscriber did not stop within the grace period");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, scheduler_handle)
        .await
        .is_err()
    {
        warn!("scheduler did not stop within the grace period");
    }
    // In-flight gateway requests are bounded by the request deadline; give
    // them a moment to settle before the process exits.
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("Nova Scout shut down complete.");
    Ok(())
}
