// =============================================================================
// Lifecycle Controller — the Monitored / Active / Archived state machine
// =============================================================================
//
// Operates on batches handed to it by the scheduler. Rule order is fixed:
//
//   Monitored: archival timeout (dominates everything) → activation check.
//   Active:    score & persist → low-score demotion → low-activity demotion.
//
// Promotion and demotion are mutually exclusive per token per tick; the first
// rule that fires wins. Running a tick twice with no new data changes no
// status.
//
// Network fetching is kept out of the per-token decision path: the async tick
// methods fetch, then hand plain snapshots to the synchronous `process_*`
// functions that do all store mutations. Per-token failures are logged and
// skipped; they never abort a batch.
// =============================================================================

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::provider::ProviderClient;
use crate::scoring::{ScoreInput, ScoringModel};
use crate::settings::{Settings, SettingsStore};
use crate::store::{MetricSnapshot, StoreError, Token, TokenRepository};
use crate::types::{StatusChangeReason, TokenStatus};

/// Running controller counters, exposed on the stats endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleStats {
    pub monitored_checked: u64,
    pub active_checked: u64,
    pub tokens_activated: u64,
    pub tokens_archived: u64,
    pub tokens_demoted_low_score: u64,
    pub tokens_demoted_low_activity: u64,
    pub errors: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// What a Monitored-batch evaluation decided for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoredOutcome {
    Archived,
    Promoted,
    Unchanged,
}

/// What an Active-batch evaluation decided for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveOutcome {
    DemotedLowScore,
    DemotedLowActivity,
    Kept,
}

pub struct LifecycleController {
    store: Arc<dyn TokenRepository>,
    provider: Arc<ProviderClient>,
    settings: Arc<SettingsStore>,
    stats: RwLock<LifecycleStats>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn TokenRepository>,
        provider: Arc<ProviderClient>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
            stats: RwLock::new(LifecycleStats::default()),
        }
    }

    pub fn stats(&self) -> LifecycleStats {
        self.stats.read().clone()
    }

    // -------------------------------------------------------------------------
    // Monitored batch
    // -------------------------------------------------------------------------

    /// One Monitored tick: archive aged-out tokens, promote those meeting the
    /// activation thresholds.
    pub async fn monitored_tick(&self) {
        let cfg = self.settings.snapshot();
        let now = Utc::now();

        let tokens = match self
            .store
            .list_by_status(TokenStatus::Monitored, cfg.batch_monitored, 0)
        {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(error = %e, "monitored tick: listing failed");
                self.stats.write().errors += 1;
                return;
            }
        };

        if tokens.is_empty() {
            debug!("monitored tick: nothing to check");
            return;
        }
        debug!(count = tokens.len(), "monitored tick starting");

        let mut activated = 0u64;
        let mut archived = 0u64;
        let mut errors = 0u64;

        for token in &tokens {
            // The archival rule needs no fresh metrics; check it before
            // spending a provider call.
            if monitored_is_expired(token, &cfg, now) {
                match self.process_monitored_token(token, None, &cfg, now) {
                    Ok(MonitoredOutcome::Archived) => archived += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(address = %token.address, error = %e, "archival failed");
                        errors += 1;
                    }
                }
                continue;
            }

            let snapshot = match self.fetch_snapshot(&token.address, &cfg).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(address = %token.address, error = %e, "monitored tick: fetch failed — skipping token");
                    errors += 1;
                    continue;
                }
            };
            if let Err(e) = self.store.append_snapshot(&token.address, snapshot.clone()) {
                warn!(address = %token.address, error = %e, "monitored tick: snapshot append failed");
                errors += 1;
                continue;
            }

            match self.process_monitored_token(token, Some(&snapshot), &cfg, now) {
                Ok(MonitoredOutcome::Promoted) => activated += 1,
                Ok(MonitoredOutcome::Archived) => archived += 1,
                Ok(MonitoredOutcome::Unchanged) => {}
                Err(e) => {
                    warn!(address = %token.address, error = %e, "monitored tick: token skipped");
                    errors += 1;
                }
            }
        }

        let mut stats = self.stats.write();
        stats.monitored_checked += tokens.len() as u64;
        stats.tokens_activated += activated;
        stats.tokens_archived += archived;
        stats.errors += errors;
        stats.last_tick_at = Some(now);
        drop(stats);

        info!(
            checked = tokens.len(),
            activated, archived, errors, "monitored tick completed"
        );
    }

    /// Decide and apply the Monitored rules for one token. `snapshot` is the
    /// freshest metric set, if one could be obtained this tick; `cfg` is the
    /// settings snapshot taken for the whole tick.
    pub fn process_monitored_token(
        &self,
        token: &Token,
        snapshot: Option<&MetricSnapshot>,
        cfg: &Settings,
        now: DateTime<Utc>,
    ) -> Result<MonitoredOutcome, StoreError> {
        // Rule 1: archival by age. Dominates all other rules.
        if monitored_is_expired(token, cfg, now) {
            self.store.update_status(
                &token.address,
                TokenStatus::Archived,
                StatusChangeReason::ArchivalTimeout,
                Some(format!(
                    "no activation within {}h",
                    cfg.archival_timeout_hours
                )),
                now,
            )?;
            return Ok(MonitoredOutcome::Archived);
        }

        // Rule 2: activation thresholds.
        let snapshot = match snapshot {
            Some(s) => s,
            None => return Ok(MonitoredOutcome::Unchanged),
        };
        let has_pool = !self.store.list_pools(&token.address, false)?.is_empty();
        if meets_activation(snapshot, has_pool, cfg) {
            self.store.update_status(
                &token.address,
                TokenStatus::Active,
                StatusChangeReason::Activation,
                Some(format!(
                    "liquidity={:.0}>={:.0}, tx_1h={}>={}",
                    snapshot.liquidity, cfg.min_liquidity_usd, snapshot.tx_count_1h, cfg.min_tx_count
                )),
                now,
            )?;
            return Ok(MonitoredOutcome::Promoted);
        }

        Ok(MonitoredOutcome::Unchanged)
    }

    // -------------------------------------------------------------------------
    // Active batch
    // -------------------------------------------------------------------------

    /// One Active tick: fetch fresh metrics, score, then apply the demotion
    /// rules.
    pub async fn active_tick(&self) {
        let cfg = self.settings.snapshot();
        let now = Utc::now();

        // A bad model name or weight set is a configuration error: refuse to
        // run the batch rather than scoring with garbage.
        let model = match ScoringModel::from_name(&cfg.scoring_model) {
            Ok(model) => model,
            Err(e) => {
                error!(error = %e, "active tick refused: scoring model misconfigured");
                self.stats.write().errors += 1;
                return;
            }
        };

        let tokens = match self
            .store
            .list_by_status(TokenStatus::Active, cfg.batch_active, 0)
        {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(error = %e, "active tick: listing failed");
                self.stats.write().errors += 1;
                return;
            }
        };

        if tokens.is_empty() {
            debug!("active tick: nothing to score");
            return;
        }
        debug!(count = tokens.len(), "active tick starting");

        let mut demoted_score = 0u64;
        let mut demoted_activity = 0u64;
        let mut errors = 0u64;

        for token in &tokens {
            let snapshot = match self.fetch_snapshot(&token.address, &cfg).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(address = %token.address, error = %e, "active tick: fetch failed — skipping token");
                    errors += 1;
                    continue;
                }
            };

            match self.process_active_token(token, &snapshot, model, &cfg, now) {
                Ok(ActiveOutcome::DemotedLowScore) => demoted_score += 1,
                Ok(ActiveOutcome::DemotedLowActivity) => demoted_activity += 1,
                Ok(ActiveOutcome::Kept) => {}
                Err(e) => {
                    warn!(address = %token.address, error = %e, "active tick: token skipped");
                    errors += 1;
                }
            }
        }

        let mut stats = self.stats.write();
        stats.active_checked += tokens.len() as u64;
        stats.tokens_demoted_low_score += demoted_score;
        stats.tokens_demoted_low_activity += demoted_activity;
        stats.errors += errors;
        stats.last_tick_at = Some(now);
        drop(stats);

        info!(
            checked = tokens.len(),
            demoted_low_score = demoted_score,
            demoted_low_activity = demoted_activity,
            errors,
            "active tick completed"
        );
    }

    /// Score one Active token from `snapshot` and apply the demotion rules.
    /// Low-score is evaluated before low-activity; whichever fires first wins
    /// the tick.
    pub fn process_active_token(
        &self,
        token: &Token,
        snapshot: &MetricSnapshot,
        model: ScoringModel,
        cfg: &Settings,
        now: DateTime<Utc>,
    ) -> Result<ActiveOutcome, StoreError> {
        let address = token.address.as_str();

        self.store.append_snapshot(address, snapshot.clone())?;

        let previous = self.store.last_score(address)?;
        let holders_1h_ago = self.store.holders_one_hour_ago(address, now)?;

        let input = ScoreInput {
            snapshot,
            holders_1h_ago,
        };
        let record = match model.score(&input, previous.as_ref(), cfg, now) {
            Ok(record) => record,
            Err(e) => {
                // Weight invariants are validated on every settings update;
                // reaching this means the component must refuse, not guess.
                error!(address, error = %e, "scoring refused");
                return Ok(ActiveOutcome::Kept);
            }
        };

        self.store.append_score(address, record.clone())?;
        self.store
            .set_last_score(address, record.raw, record.smoothed, now)?;

        debug!(
            address,
            raw = record.raw,
            smoothed = record.smoothed,
            "token scored"
        );

        // Rule 2: sustained low score.
        if record.smoothed < cfg.min_score_keep_active {
            self.store.bump_low_score_streak(address)?;
            let since = match token.low_score_since {
                Some(since) => since,
                None => {
                    self.store.set_low_score_since(address, Some(now))?;
                    now
                }
            };
            if now - since >= Duration::hours(cfg.low_score_window_hours as i64) {
                self.store.update_status(
                    address,
                    TokenStatus::Monitored,
                    StatusChangeReason::LowScore,
                    Some(format!(
                        "smoothed<{} for {}h",
                        cfg.min_score_keep_active, cfg.low_score_window_hours
                    )),
                    now,
                )?;
                return Ok(ActiveOutcome::DemotedLowScore);
            }
        } else {
            self.store.reset_low_score_streak(address)?;
            if token.low_score_since.is_some() {
                self.store.set_low_score_since(address, None)?;
            }
        }

        // Rule 3: consecutive low-activity checks.
        if snapshot.tx_count_1h < cfg.min_tx_count {
            let streak = self.store.bump_low_activity_streak(address)?;
            if streak >= cfg.low_activity_checks {
                self.store.update_status(
                    address,
                    TokenStatus::Monitored,
                    StatusChangeReason::LowActivity,
                    Some(format!(
                        "tx_1h<{} for {} checks",
                        cfg.min_tx_count, cfg.low_activity_checks
                    )),
                    now,
                )?;
                return Ok(ActiveOutcome::DemotedLowActivity);
            }
        } else {
            self.store.reset_low_activity_streak(address)?;
        }

        Ok(ActiveOutcome::Kept)
    }

    // -------------------------------------------------------------------------
    // Metrics assembly
    // -------------------------------------------------------------------------

    /// Combine the overview and trades endpoints into one metric snapshot.
    async fn fetch_snapshot(
        &self,
        address: &str,
        cfg: &Settings,
    ) -> Result<MetricSnapshot, crate::provider::FetchError> {
        let ttl = StdDuration::from_secs(cfg.provider_cache_ttl_sec);

        let overview = self.provider.overview(address, ttl).await?;
        let trades = self.provider.trades(address, ttl).await?;

        Ok(MetricSnapshot {
            ts: Utc::now(),
            tx_count_5m: trades.tx_count_5m,
            tx_count_1h: trades.tx_count_1h,
            volume_5m: trades.volume_5m,
            volume_1h: trades.volume_1h,
            buys_volume_5m: trades.buys_volume_5m,
            sells_volume_5m: trades.sells_volume_5m,
            holders_now: overview.holders,
            liquidity: overview.liquidity,
        })
    }
}

// -------------------------------------------------------------------------
// Pure rule predicates
// -------------------------------------------------------------------------

/// Archival rule: the token has sat in Monitored past the timeout.
fn monitored_is_expired(token: &Token, cfg: &Settings, now: DateTime<Utc>) -> bool {
    now - token.created_at >= Duration::hours(cfg.archival_timeout_hours as i64)
}

/// Activation rule: enough liquidity, enough hourly transactions, and at
/// least one known pool.
fn meets_activation(snapshot: &MetricSnapshot, has_pool: bool, cfg: &Settings) -> bool {
    has_pool
        && snapshot.liquidity >= cfg.min_liquidity_usd
        && snapshot.tx_count_1h >= cfg.min_tx_count
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;

    fn t0() -> DateTime<Utc> {
        "2025-06-01T00:00:00Z".parse().unwrap()
    }

    fn controller_with_store() -> (
        LifecycleController,
        Arc<MemoryTokenStore>,
        Arc<SettingsStore>,
    ) {
        let store = Arc::new(MemoryTokenStore::new());
        let provider = Arc::new(ProviderClient::new("http://127.0.0.1:0", None, 1));
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        let controller = LifecycleController::new(store.clone(), provider, settings.clone());
        (controller, store, settings)
    }

    /// Metrics weak enough to score low (only the neutral orderflow term
    /// contributes: raw = w_oi · 0.5 = 0.1 with default weights).
    fn weak_snapshot(ts: DateTime<Utc>) -> MetricSnapshot {
        MetricSnapshot {
            ts,
            tx_count_5m: 0,
            tx_count_1h: 0,
            volume_5m: 0.0,
            volume_1h: 0.0,
            buys_volume_5m: 0.0,
            sells_volume_5m: 0.0,
            holders_now: 10,
            liquidity: 100.0,
        }
    }

    /// Metrics strong enough to score well above the default keep-active
    /// floor and to pass the activation thresholds.
    fn strong_snapshot(ts: DateTime<Utc>) -> MetricSnapshot {
        MetricSnapshot {
            ts,
            tx_count_5m: 500,
            tx_count_1h: 600,
            volume_5m: 5_000.0,
            volume_1h: 6_000.0,
            buys_volume_5m: 5_000.0,
            sells_volume_5m: 0.0,
            holders_now: 200,
            liquidity: 1_200.0,
        }
    }

    // --- Monitored rules -----------------------------------------------------

    #[test]
    fn activation_promotes_when_all_criteria_met() {
        let (controller, store, settings) = controller_with_store();
        let token = store.upsert_monitored("tok", t0()).unwrap();
        store.upsert_pool("tok", "pool1", "raydium", true, t0()).unwrap();

        let snap = MetricSnapshot {
            liquidity: 1_200.0,
            tx_count_1h: 350,
            ..weak_snapshot(t0())
        };
        let outcome = controller
            .process_monitored_token(&token, Some(&snap), &settings.snapshot(), t0() + Duration::minutes(5))
            .unwrap();

        assert_eq!(outcome, MonitoredOutcome::Promoted);
        let row = store.get("tok").unwrap().unwrap();
        assert_eq!(row.status, TokenStatus::Active);
        assert!(row.activated_at.is_some());
    }

    #[test]
    fn no_promotion_without_a_pool() {
        let (controller, store, settings) = controller_with_store();
        let token = store.upsert_monitored("tok", t0()).unwrap();

        let snap = MetricSnapshot {
            liquidity: 10_000.0,
            tx_count_1h: 5_000,
            ..weak_snapshot(t0())
        };
        let outcome = controller
            .process_monitored_token(&token, Some(&snap), &settings.snapshot(), t0())
            .unwrap();
        assert_eq!(outcome, MonitoredOutcome::Unchanged);
    }

    #[test]
    fn no_promotion_below_thresholds() {
        let (controller, store, settings) = controller_with_store();
        let token = store.upsert_monitored("tok", t0()).unwrap();
        store.upsert_pool("tok", "pool1", "raydium", true, t0()).unwrap();

        // Liquidity fine, tx count short.
        let snap = MetricSnapshot {
            liquidity: 1_000.0,
            tx_count_1h: 299,
            ..weak_snapshot(t0())
        };
        assert_eq!(
            controller.process_monitored_token(&token, Some(&snap), &settings.snapshot(), t0()).unwrap(),
            MonitoredOutcome::Unchanged
        );

        // Tx count fine, liquidity short.
        let snap = MetricSnapshot {
            liquidity: 499.0,
            tx_count_1h: 400,
            ..weak_snapshot(t0())
        };
        assert_eq!(
            controller.process_monitored_token(&token, Some(&snap), &settings.snapshot(), t0()).unwrap(),
            MonitoredOutcome::Unchanged
        );
    }

    #[test]
    fn archival_by_timeout_dominates_metrics() {
        let (controller, store, settings) = controller_with_store();
        let token = store.upsert_monitored("tok", t0()).unwrap();
        store.upsert_pool("tok", "pool1", "raydium", true, t0()).unwrap();

        // 25 h old with metrics that would otherwise promote.
        let now = t0() + Duration::hours(25);
        let outcome = controller
            .process_monitored_token(&token, Some(&strong_snapshot(now)), &settings.snapshot(), now)
            .unwrap();

        assert_eq!(outcome, MonitoredOutcome::Archived);
        let row = store.get("tok").unwrap().unwrap();
        assert_eq!(row.status, TokenStatus::Archived);
        assert!(row.archived_at.is_some());
    }

    #[test]
    fn monitored_tick_is_idempotent_without_new_data() {
        let (controller, store, settings) = controller_with_store();
        let token = store.upsert_monitored("tok", t0()).unwrap();

        let now = t0() + Duration::hours(1);
        for _ in 0..2 {
            let outcome = controller
                .process_monitored_token(&token, Some(&weak_snapshot(now)), &settings.snapshot(), now)
                .unwrap();
            assert_eq!(outcome, MonitoredOutcome::Unchanged);
        }
        assert_eq!(
            store.get("tok").unwrap().unwrap().status,
            TokenStatus::Monitored
        );
        assert_eq!(store.list_status_history("tok", 10).unwrap().len(), 1);
    }

    // --- Active rules --------------------------------------------------------

    fn activate(store: &MemoryTokenStore, address: &str, at: DateTime<Utc>) -> Token {
        store.upsert_monitored(address, at).unwrap();
        store
            .update_status(
                address,
                TokenStatus::Active,
                StatusChangeReason::Activation,
                None,
                at,
            )
            .unwrap()
    }

    #[test]
    fn scoring_persists_record_and_last_fields() {
        let (controller, store, settings) = controller_with_store();
        let token = activate(&store, "tok", t0());

        let outcome = controller
            .process_active_token(
                &token,
                &strong_snapshot(t0()),
                ScoringModel::HybridMomentum,
                &settings.snapshot(),
                t0(),
            )
            .unwrap();
        assert_eq!(outcome, ActiveOutcome::Kept);

        let row = store.get("tok").unwrap().unwrap();
        assert!(row.last_smoothed_score.unwrap() > 0.5);
        assert_eq!(row.last_scored_at, Some(t0()));
        assert_eq!(store.list_scores("tok", 10).unwrap().len(), 1);
        assert!(store.latest_snapshot("tok").unwrap().is_some());
    }

    #[test]
    fn low_score_sets_since_then_demotes_after_window() {
        let (controller, store, settings) = controller_with_store();
        activate(&store, "tok", t0());

        // Tick 1 at t0: low score, clock starts, no demotion yet.
        let token = store.get("tok").unwrap().unwrap();
        let outcome = controller
            .process_active_token(&token, &weak_snapshot(t0()), ScoringModel::HybridMomentum, &settings.snapshot(), t0())
            .unwrap();
        assert_eq!(outcome, ActiveOutcome::Kept);
        let row = store.get("tok").unwrap().unwrap();
        assert_eq!(row.low_score_since, Some(t0()));
        assert_eq!(row.low_score_streak, 1);

        // Tick 2 at t0+3h: still low, still inside the window.
        let now = t0() + Duration::hours(3);
        let token = store.get("tok").unwrap().unwrap();
        let outcome = controller
            .process_active_token(&token, &weak_snapshot(now), ScoringModel::HybridMomentum, &settings.snapshot(), now)
            .unwrap();
        assert_eq!(outcome, ActiveOutcome::Kept);

        // Tick 3 at exactly t0+6h: first tick at/after the window boundary.
        let now = t0() + Duration::hours(6);
        let token = store.get("tok").unwrap().unwrap();
        let outcome = controller
            .process_active_token(&token, &weak_snapshot(now), ScoringModel::HybridMomentum, &settings.snapshot(), now)
            .unwrap();
        assert_eq!(outcome, ActiveOutcome::DemotedLowScore);

        let row = store.get("tok").unwrap().unwrap();
        assert_eq!(row.status, TokenStatus::Monitored);
        assert_eq!(row.low_score_since, None);
        assert_eq!(row.low_score_streak, 0);
    }

    #[test]
    fn recovered_score_clears_the_low_score_clock() {
        let (controller, store, settings) = controller_with_store();
        // Floor low enough that one strong tick lifts the EWMA back over it.
        settings
            .update_key("min_score_keep_active", serde_json::json!(0.3))
            .unwrap();
        activate(&store, "tok", t0());

        let token = store.get("tok").unwrap().unwrap();
        controller
            .process_active_token(&token, &weak_snapshot(t0()), ScoringModel::HybridMomentum, &settings.snapshot(), t0())
            .unwrap();
        assert!(store.get("tok").unwrap().unwrap().low_score_since.is_some());

        // Strong tick: smoothed = 0.3·1.0 + 0.7·0.1 = 0.37 ≥ 0.3.
        let now = t0() + Duration::hours(1);
        let token = store.get("tok").unwrap().unwrap();
        controller
            .process_active_token(&token, &strong_snapshot(now), ScoringModel::HybridMomentum, &settings.snapshot(), now)
            .unwrap();

        let row = store.get("tok").unwrap().unwrap();
        assert_eq!(row.status, TokenStatus::Active);
        assert_eq!(row.low_score_since, None);
        assert_eq!(row.low_score_streak, 0);
    }

    #[test]
    fn low_activity_streak_demotes_at_threshold() {
        let (controller, store, settings) = controller_with_store();
        settings
            .update_key("min_score_keep_active", serde_json::json!(0.0))
            .unwrap();
        settings
            .update_key("low_activity_checks", serde_json::json!(3))
            .unwrap();

        activate(&store, "tok", t0());

        // Low tx count (< 300) ticks; third check demotes.
        for i in 1..=2 {
            let now = t0() + Duration::minutes(i);
            let token = store.get("tok").unwrap().unwrap();
            let outcome = controller
                .process_active_token(&token, &weak_snapshot(now), ScoringModel::HybridMomentum, &settings.snapshot(), now)
                .unwrap();
            assert_eq!(outcome, ActiveOutcome::Kept);
        }
        let now = t0() + Duration::minutes(3);
        let token = store.get("tok").unwrap().unwrap();
        let outcome = controller
            .process_active_token(&token, &weak_snapshot(now), ScoringModel::HybridMomentum, &settings.snapshot(), now)
            .unwrap();
        assert_eq!(outcome, ActiveOutcome::DemotedLowActivity);
        assert_eq!(
            store.get("tok").unwrap().unwrap().status,
            TokenStatus::Monitored
        );
    }

    #[test]
    fn good_activity_resets_the_streak() {
        let (controller, store, settings) = controller_with_store();
        activate(&store, "tok", t0());

        let token = store.get("tok").unwrap().unwrap();
        controller
            .process_active_token(&token, &weak_snapshot(t0()), ScoringModel::HybridMomentum, &settings.snapshot(), t0())
            .unwrap();
        assert_eq!(store.get("tok").unwrap().unwrap().low_activity_streak, 1);

        let now = t0() + Duration::minutes(1);
        let token = store.get("tok").unwrap().unwrap();
        controller
            .process_active_token(&token, &strong_snapshot(now), ScoringModel::HybridMomentum, &settings.snapshot(), now)
            .unwrap();
        assert_eq!(store.get("tok").unwrap().unwrap().low_activity_streak, 0);
    }

    #[test]
    fn low_score_wins_when_both_demotions_fire() {
        let (controller, store, settings) = controller_with_store();
        activate(&store, "tok", t0());

        // Prime both conditions: low score clock started at t0, activity
        // streak at 9 of 10.
        let token = store.get("tok").unwrap().unwrap();
        controller
            .process_active_token(&token, &weak_snapshot(t0()), ScoringModel::HybridMomentum, &settings.snapshot(), t0())
            .unwrap();
        for _ in 0..8 {
            store.bump_low_activity_streak("tok").unwrap();
        }

        // This tick is past the 6 h window AND the tenth low-activity check.
        let now = t0() + Duration::hours(6);
        let token = store.get("tok").unwrap().unwrap();
        let outcome = controller
            .process_active_token(&token, &weak_snapshot(now), ScoringModel::HybridMomentum, &settings.snapshot(), now)
            .unwrap();

        assert_eq!(outcome, ActiveOutcome::DemotedLowScore);
        let history = store.list_status_history("tok", 1).unwrap();
        assert_eq!(history[0].reason, StatusChangeReason::LowScore);
    }

    #[test]
    fn ewma_chains_across_ticks_and_seeds_after_compaction_gap() {
        let (controller, store, settings) = controller_with_store();
        activate(&store, "tok", t0());

        let token = store.get("tok").unwrap().unwrap();
        controller
            .process_active_token(&token, &strong_snapshot(t0()), ScoringModel::HybridMomentum, &settings.snapshot(), t0())
            .unwrap();
        let first = store.last_score("tok").unwrap().unwrap();
        assert!((first.smoothed - first.raw).abs() < 1e-12);

        let now = t0() + Duration::minutes(30);
        let token = store.get("tok").unwrap().unwrap();
        controller
            .process_active_token(&token, &weak_snapshot(now), ScoringModel::HybridMomentum, &settings.snapshot(), now)
            .unwrap();
        let second = store.last_score("tok").unwrap().unwrap();
        let expected = 0.3 * second.raw + 0.7 * first.smoothed;
        assert!((second.smoothed - expected).abs() < 1e-9);

        // Compaction wipes the history; the next score seeds the EWMA anew.
        store.compact_before(now + Duration::hours(3)).unwrap();
        let later = now + Duration::hours(4);
        let token = store.get("tok").unwrap().unwrap();
        controller
            .process_active_token(&token, &strong_snapshot(later), ScoringModel::HybridMomentum, &settings.snapshot(), later)
            .unwrap();
        let third = store.last_score("tok").unwrap().unwrap();
        assert!((third.smoothed - third.raw).abs() < 1e-12);
    }
}
