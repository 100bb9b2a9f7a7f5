// =============================================================================
// Scheduler — the cooperative loop driving lifecycle ticks and compaction
// =============================================================================
//
// One task, one loop. Each iteration runs the Monitored batch, sleeps the
// monitored cadence, runs the Active batch, sleeps the active cadence, and
// once per hour compacts snapshot/score history past the retention window.
// The single loop guarantees at most one tick of each kind at a time.
//
// Cadences and batch sizes come from the settings snapshot taken at the top
// of each iteration, so runtime updates apply from the next iteration. Every
// sleep is a cancellation point on the shutdown signal; once the signal
// arrives no further tick is started.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::lifecycle::LifecycleController;
use crate::provider::ProviderClient;
use crate::settings::SettingsStore;
use crate::store::TokenRepository;

/// How often the history compactor runs.
const COMPACTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Snapshots and scores older than this many hours are deleted.
const HISTORY_RETENTION_HOURS: i64 = 2;

/// Run the scheduler until the shutdown signal flips. Never returns early on
/// errors; a failing tick is logged and the loop continues.
pub async fn run_scheduler(
    controller: Arc<LifecycleController>,
    store: Arc<dyn TokenRepository>,
    settings: Arc<SettingsStore>,
    provider: Arc<ProviderClient>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("scheduler starting");
    let mut last_compaction = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }
        let cfg = settings.snapshot();

        // Apply any runtime change to the gateway's concurrency cap before
        // the ticks start issuing requests.
        provider.set_max_concurrency(cfg.ext_max_concurrency);

        controller.monitored_tick().await;

        if sleep_or_shutdown(Duration::from_secs(cfg.cadence_monitored_sec), &mut shutdown).await {
            break;
        }

        controller.active_tick().await;

        if sleep_or_shutdown(Duration::from_secs(cfg.cadence_active_sec), &mut shutdown).await {
            break;
        }

        if last_compaction.elapsed() >= COMPACTION_INTERVAL {
            let cutoff = Utc::now() - chrono::Duration::hours(HISTORY_RETENTION_HOURS);
            match store.compact_before(cutoff) {
                Ok(stats) => info!(
                    snapshots_deleted = stats.snapshots_deleted,
                    scores_deleted = stats.scores_deleted,
                    "history compaction completed"
                ),
                Err(e) => warn!(error = %e, "history compaction failed"),
            }
            last_compaction = Instant::now();
        }
    }

    info!("scheduler stopped");
}

/// Sleep for `duration`, returning `true` if shutdown arrived first.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}
