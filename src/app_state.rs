// =============================================================================
// Central Application State — Nova Scout
// =============================================================================
//
// Ties the explicitly-constructed services together and provides a unified
// snapshot for the read API. Nothing here is a singleton: every service is
// built in main() and shared by Arc.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for the error ring buffer.
//   - Services manage their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::cache::TtlCache;
use crate::lifecycle::{LifecycleController, LifecycleStats};
use crate::provider::ProviderClient;
use crate::settings::SettingsStore;
use crate::store::TokenRepository;
use crate::types::TokenStatus;

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// Subsystem the error came from (feed, scheduler, provider, ...).
    pub component: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Shared state for all tasks and the API, wrapped in `Arc` at startup.
pub struct AppState {
    /// Monotonically increasing version counter, incremented on meaningful
    /// state mutations so pollers can detect changes cheaply.
    pub state_version: AtomicU64,

    pub settings: Arc<SettingsStore>,
    pub store: Arc<dyn TokenRepository>,
    pub provider: Arc<ProviderClient>,
    pub lifecycle: Arc<LifecycleController>,

    /// Rendered publication artifacts, cached for the endpoint's short
    /// lifetime.
    pub artifact_cache: TtlCache,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Startup instant, for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        settings: Arc<SettingsStore>,
        store: Arc<dyn TokenRepository>,
        provider: Arc<ProviderClient>,
        lifecycle: Arc<LifecycleController>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            settings,
            store,
            provider,
            lifecycle,
            artifact_cache: TtlCache::new(),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// Atomically increment the state version.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Record an error. The ring buffer is capped at [`MAX_RECENT_ERRORS`];
    /// oldest entries are evicted when the limit is reached.
    pub fn push_error(&self, component: &str, message: String) {
        let record = ErrorRecord {
            message,
            component: component.to_string(),
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    /// Build the serialisable service snapshot for `GET /api/v1/stats`.
    pub fn build_snapshot(&self) -> ServiceSnapshot {
        let counts = TokenCounts {
            monitored: self
                .store
                .count_by_status(TokenStatus::Monitored)
                .unwrap_or(0),
            active: self.store.count_by_status(TokenStatus::Active).unwrap_or(0),
            archived: self
                .store
                .count_by_status(TokenStatus::Archived)
                .unwrap_or(0),
        };

        ServiceSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            tokens: counts,
            lifecycle: self.lifecycle.stats(),
            provider: ProviderSnapshot {
                upstream_calls: self.provider.upstream_call_count(),
                cache_entries: self.provider.cache_len(),
            },
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Service state snapshot for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub tokens: TokenCounts,
    pub lifecycle: LifecycleStats,
    pub provider: ProviderSnapshot,
    pub recent_errors: Vec<ErrorRecord>,
}

/// Token population by lifecycle status.
#[derive(Debug, Clone, Serialize)]
pub struct TokenCounts {
    pub monitored: usize,
    pub active: usize,
    pub archived: usize,
}

/// Gateway usage counters.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    pub upstream_calls: u64,
    pub cache_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::store::MemoryTokenStore;

    fn state() -> AppState {
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        let store: Arc<dyn TokenRepository> = Arc::new(MemoryTokenStore::new());
        let provider = Arc::new(ProviderClient::new("http://127.0.0.1:0", None, 1));
        let lifecycle = Arc::new(LifecycleController::new(
            store.clone(),
            provider.clone(),
            settings.clone(),
        ));
        AppState::new(settings, store, provider, lifecycle)
    }

    #[test]
    fn error_ring_buffer_caps_at_limit() {
        let state = state();
        for i in 0..60 {
            state.push_error("test", format!("error {i}"));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors.last().unwrap().message, "error 59");
        assert_eq!(errors.first().unwrap().message, "error 10");
    }

    #[test]
    fn snapshot_reports_token_counts() {
        let state = state();
        state.store.upsert_monitored("a", Utc::now()).unwrap();
        state.store.upsert_monitored("b", Utc::now()).unwrap();

        let snapshot = state.build_snapshot();
        assert_eq!(snapshot.tokens.monitored, 2);
        assert_eq!(snapshot.tokens.active, 0);
        assert!(snapshot.state_version >= 1);
    }

    #[test]
    fn version_counter_increments() {
        let state = state();
        let v1 = state.current_state_version();
        state.increment_version();
        assert_eq!(state.current_state_version(), v1 + 1);
    }
}
