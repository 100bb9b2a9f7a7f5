// =============================================================================
// Runtime Settings — validated, hot-swappable configuration snapshots
// =============================================================================
//
// Every tunable of the service lives here: scoring weights, lifecycle
// thresholds, cadences, gateway limits and publication parameters. Components
// never read individual keys mid-tick; they take one `Arc<Settings>` snapshot
// per tick so a concurrent update can never be observed half-applied.
//
// Updates go through `SettingsStore::update_key`: the candidate snapshot is
// validated as a whole and swapped in atomically, or rejected wholesale with
// the prior snapshot left intact.
//
// Every field has a serde default so that partial JSON (env bootstrap, admin
// updates) deserialises cleanly.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Tolerance for the weight-sum invariant (`sum = 1 ± WEIGHT_SUM_TOLERANCE`).
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_w_tx() -> f64 {
    0.25
}

fn default_w_vol() -> f64 {
    0.35
}

fn default_w_hld() -> f64 {
    0.20
}

fn default_w_oi() -> f64 {
    0.20
}

fn default_ewma_alpha() -> f64 {
    0.3
}

fn default_min_score_keep_active() -> f64 {
    0.5
}

fn default_low_score_window_hours() -> u32 {
    6
}

fn default_low_activity_checks() -> u32 {
    10
}

fn default_min_liquidity_usd() -> f64 {
    500.0
}

fn default_min_tx_count() -> u64 {
    300
}

fn default_archival_timeout_hours() -> u32 {
    24
}

fn default_cadence_sec() -> u64 {
    30
}

fn default_batch_size() -> usize {
    50
}

fn default_ext_max_concurrency() -> usize {
    5
}

fn default_provider_cache_ttl_sec() -> u64 {
    30
}

fn default_min_score_for_config() -> f64 {
    0.7
}

fn default_config_top_count() -> usize {
    3
}

fn default_scoring_model() -> String {
    "hybrid_momentum".to_string()
}

// =============================================================================
// Weights
// =============================================================================

/// Scoring component weights. Must be non-negative and sum to 1 within
/// [`WEIGHT_SUM_TOLERANCE`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    #[serde(default = "default_w_tx")]
    pub w_tx: f64,
    #[serde(default = "default_w_vol")]
    pub w_vol: f64,
    #[serde(default = "default_w_hld")]
    pub w_hld: f64,
    #[serde(default = "default_w_oi")]
    pub w_oi: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            w_tx: default_w_tx(),
            w_vol: default_w_vol(),
            w_hld: default_w_hld(),
            w_oi: default_w_oi(),
        }
    }
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.w_tx + self.w_vol + self.w_hld + self.w_oi
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for (name, w) in [
            ("w_tx", self.w_tx),
            ("w_vol", self.w_vol),
            ("w_hld", self.w_hld),
            ("w_oi", self.w_oi),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(SettingsError::Invalid {
                    key: "weights".into(),
                    reason: format!("{name} must be a non-negative finite number, got {w}"),
                });
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(SettingsError::Invalid {
                key: "weights".into(),
                reason: format!("weights must sum to 1 ± {WEIGHT_SUM_TOLERANCE}, got {sum}"),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Settings
// =============================================================================

/// One immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // --- Scoring -------------------------------------------------------------
    #[serde(default)]
    pub weights: Weights,

    /// EWMA smoothing factor in [0, 1].
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,

    /// Model selected for active-token scoring.
    #[serde(default = "default_scoring_model")]
    pub scoring_model: String,

    // --- Lifecycle thresholds ------------------------------------------------
    /// Smoothed-score floor below which an Active token starts its low-score
    /// clock.
    #[serde(default = "default_min_score_keep_active")]
    pub min_score_keep_active: f64,

    /// Hours the smoothed score must stay below the floor before demotion.
    #[serde(default = "default_low_score_window_hours")]
    pub low_score_window_hours: u32,

    /// Consecutive low-activity checks before demotion.
    #[serde(default = "default_low_activity_checks")]
    pub low_activity_checks: u32,

    /// Liquidity floor (USD) for Monitored→Active promotion.
    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,

    /// Hourly transaction-count floor for promotion and for the activity
    /// check on Active tokens.
    #[serde(default = "default_min_tx_count")]
    pub min_tx_count: u64,

    /// Hours a token may sit in Monitored before it is archived.
    #[serde(default = "default_archival_timeout_hours")]
    pub archival_timeout_hours: u32,

    // --- Scheduler -----------------------------------------------------------
    /// Monitored tick period, seconds.
    #[serde(default = "default_cadence_sec")]
    pub cadence_monitored_sec: u64,

    /// Active tick period, seconds.
    #[serde(default = "default_cadence_sec")]
    pub cadence_active_sec: u64,

    /// Maximum Monitored tokens processed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_monitored: usize,

    /// Maximum Active tokens processed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_active: usize,

    // --- Provider gateway ----------------------------------------------------
    /// Global cap on in-flight provider requests.
    #[serde(default = "default_ext_max_concurrency")]
    pub ext_max_concurrency: usize,

    /// TTL for cached provider responses, seconds.
    #[serde(default = "default_provider_cache_ttl_sec")]
    pub provider_cache_ttl_sec: u64,

    // --- Publication ---------------------------------------------------------
    /// Smoothed-score floor for inclusion in the strategy artifact.
    #[serde(default = "default_min_score_for_config")]
    pub min_score_for_config: f64,

    /// Number of tokens the artifact carries at most.
    #[serde(default = "default_config_top_count")]
    pub config_top_count: usize,
}

impl Default for Settings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty settings object deserialises")
    }
}

impl Settings {
    /// Validate every invariant of the snapshot. An `Err` here means the
    /// snapshot must not be published to readers.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.weights.validate()?;

        if !(0.0..=1.0).contains(&self.ewma_alpha) || !self.ewma_alpha.is_finite() {
            return Err(SettingsError::invalid("ewma_alpha", "must be in [0, 1]"));
        }
        if !self.min_score_keep_active.is_finite() || self.min_score_keep_active < 0.0 {
            return Err(SettingsError::invalid("min_score_keep_active", "must be >= 0"));
        }
        if self.low_score_window_hours < 1 {
            return Err(SettingsError::invalid("low_score_window_hours", "must be >= 1"));
        }
        if self.low_activity_checks < 3 {
            return Err(SettingsError::invalid("low_activity_checks", "must be >= 3"));
        }
        if !self.min_liquidity_usd.is_finite() || self.min_liquidity_usd < 0.0 {
            return Err(SettingsError::invalid("min_liquidity_usd", "must be >= 0"));
        }
        if self.archival_timeout_hours < 1 {
            return Err(SettingsError::invalid("archival_timeout_hours", "must be >= 1"));
        }
        if self.cadence_monitored_sec < 5 {
            return Err(SettingsError::invalid("cadence_monitored_sec", "must be >= 5"));
        }
        if self.cadence_active_sec < 5 {
            return Err(SettingsError::invalid("cadence_active_sec", "must be >= 5"));
        }
        if self.batch_monitored == 0 || self.batch_active == 0 {
            return Err(SettingsError::invalid("batch", "batch sizes must be >= 1"));
        }
        if self.ext_max_concurrency < 1 {
            return Err(SettingsError::invalid("ext_max_concurrency", "must be >= 1"));
        }
        if self.provider_cache_ttl_sec < 1 {
            return Err(SettingsError::invalid("provider_cache_ttl_sec", "must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.min_score_for_config) {
            return Err(SettingsError::invalid("min_score_for_config", "must be in [0, 1]"));
        }
        if self.config_top_count < 1 {
            return Err(SettingsError::invalid("config_top_count", "must be >= 1"));
        }
        if self.scoring_model.trim().is_empty() {
            return Err(SettingsError::invalid("scoring_model", "must not be empty"));
        }
        Ok(())
    }

    /// Build the startup snapshot: defaults overlaid with any `NOVA_*`
    /// environment overrides, validated before use.
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
            if let Ok(raw) = std::env::var(name) {
                match raw.parse::<T>() {
                    Ok(v) => *target = v,
                    Err(_) => warn!(var = name, value = %raw, "ignoring unparseable env override"),
                }
            }
        }

        env_parse("NOVA_EWMA_ALPHA", &mut settings.ewma_alpha);
        env_parse("NOVA_MIN_SCORE_KEEP_ACTIVE", &mut settings.min_score_keep_active);
        env_parse("NOVA_LOW_SCORE_WINDOW_HOURS", &mut settings.low_score_window_hours);
        env_parse("NOVA_LOW_ACTIVITY_CHECKS", &mut settings.low_activity_checks);
        env_parse("NOVA_MIN_LIQUIDITY_USD", &mut settings.min_liquidity_usd);
        env_parse("NOVA_MIN_TX_COUNT", &mut settings.min_tx_count);
        env_parse("NOVA_ARCHIVAL_TIMEOUT_HOURS", &mut settings.archival_timeout_hours);
        env_parse("NOVA_CADENCE_MONITORED_SEC", &mut settings.cadence_monitored_sec);
        env_parse("NOVA_CADENCE_ACTIVE_SEC", &mut settings.cadence_active_sec);
        env_parse("NOVA_EXT_MAX_CONCURRENCY", &mut settings.ext_max_concurrency);
        env_parse("NOVA_PROVIDER_CACHE_TTL_SEC", &mut settings.provider_cache_ttl_sec);
        env_parse("NOVA_MIN_SCORE_FOR_CONFIG", &mut settings.min_score_for_config);
        env_parse("NOVA_CONFIG_TOP_COUNT", &mut settings.config_top_count);

        if let Ok(raw) = std::env::var("NOVA_WEIGHTS") {
            match serde_json::from_str::<Weights>(&raw) {
                Ok(w) => settings.weights = w,
                Err(e) => warn!(error = %e, "ignoring unparseable NOVA_WEIGHTS override"),
            }
        }
        if let Ok(model) = std::env::var("NOVA_SCORING_MODEL") {
            settings.scoring_model = model;
        }

        settings.validate()?;
        Ok(settings)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Why a settings update was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// The key is not a recognized setting.
    UnknownKey(String),
    /// The value failed validation; the prior snapshot is retained.
    Invalid { key: String, reason: String },
}

impl SettingsError {
    fn invalid(key: &str, reason: &str) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKey(key) => write!(f, "unknown settings key: {key}"),
            Self::Invalid { key, reason } => write!(f, "invalid value for {key}: {reason}"),
        }
    }
}

impl std::error::Error for SettingsError {}

// =============================================================================
// SettingsStore
// =============================================================================

/// Holder of the current settings snapshot.
///
/// Readers call [`snapshot`](Self::snapshot) and keep the returned `Arc` for
/// the duration of a tick. Writers build a full candidate, validate it, and
/// swap it in under the lock; a failed validation leaves the current snapshot
/// untouched.
pub struct SettingsStore {
    current: RwLock<Arc<Settings>>,
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The current snapshot. Cheap (one Arc clone); never blocks on writers
    /// for longer than the swap itself.
    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    /// Update a single named key from a JSON value. The whole candidate
    /// snapshot is re-validated; rejection leaves the prior snapshot intact.
    pub fn update_key(&self, key: &str, value: serde_json::Value) -> Result<(), SettingsError> {
        let mut candidate = (**self.current.read()).clone();

        fn take<T: serde::de::DeserializeOwned>(
            key: &str,
            value: serde_json::Value,
        ) -> Result<T, SettingsError> {
            serde_json::from_value(value).map_err(|e| SettingsError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            })
        }

        match key {
            "weights" => candidate.weights = take(key, value)?,
            "ewma_alpha" => candidate.ewma_alpha = take(key, value)?,
            "scoring_model" => candidate.scoring_model = take(key, value)?,
            "min_score_keep_active" => candidate.min_score_keep_active = take(key, value)?,
            "low_score_window_hours" => candidate.low_score_window_hours = take(key, value)?,
            "low_activity_checks" => candidate.low_activity_checks = take(key, value)?,
            "min_liquidity_usd" => candidate.min_liquidity_usd = take(key, value)?,
            "min_tx_count" => candidate.min_tx_count = take(key, value)?,
            "archival_timeout_hours" => candidate.archival_timeout_hours = take(key, value)?,
            "cadence_monitored_sec" => candidate.cadence_monitored_sec = take(key, value)?,
            "cadence_active_sec" => candidate.cadence_active_sec = take(key, value)?,
            "batch_monitored" => candidate.batch_monitored = take(key, value)?,
            "batch_active" => candidate.batch_active = take(key, value)?,
            "ext_max_concurrency" => candidate.ext_max_concurrency = take(key, value)?,
            "provider_cache_ttl_sec" => candidate.provider_cache_ttl_sec = take(key, value)?,
            "min_score_for_config" => candidate.min_score_for_config = take(key, value)?,
            "config_top_count" => candidate.config_top_count = take(key, value)?,
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        }

        candidate.validate()?;

        *self.current.write() = Arc::new(candidate);
        info!(key, "settings updated");
        Ok(())
    }
}
