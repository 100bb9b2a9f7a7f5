// =============================================================================
// Store entities — plain records persisted by the token repository
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{StatusChangeReason, TokenStatus};

/// A tracked Solana token. Unique by `address` (base58, fixed length on
/// mainnet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub address: String,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    /// Set on every status transition.
    pub status_changed_at: DateTime<Utc>,
    /// Time of the latest Monitored→Active promotion, if any.
    pub activated_at: Option<DateTime<Utc>>,
    /// Set iff the token is Archived.
    pub archived_at: Option<DateTime<Utc>>,
    pub last_raw_score: Option<f64>,
    pub last_smoothed_score: Option<f64>,
    pub last_scored_at: Option<DateTime<Utc>>,
    /// Consecutive ticks with the smoothed score below the keep-active floor.
    pub low_score_streak: u32,
    /// Consecutive ticks with `tx_count_1h` below the activity floor.
    pub low_activity_streak: u32,
    /// Start of the current continuous low-score period, if one is running.
    pub low_score_since: Option<DateTime<Utc>>,
}

impl Token {
    /// Fresh Monitored row as created by the feed subscriber.
    pub fn new_monitored(address: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.to_string(),
            status: TokenStatus::Monitored,
            created_at: now,
            status_changed_at: now,
            activated_at: None,
            archived_at: None,
            last_raw_score: None,
            last_smoothed_score: None,
            last_scored_at: None,
            low_score_streak: 0,
            low_activity_streak: 0,
            low_score_since: None,
        }
    }
}

/// A liquidity pool belonging to exactly one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub address: String,
    pub token_address: String,
    /// DEX identifier label, e.g. "raydium", "meteora".
    pub dex: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// One timestamped set of raw market metrics for a token.
///
/// `holders_1h_ago` is never persisted; it is derived by joining against the
/// nearest prior snapshot at least one hour old (see
/// [`TokenRepository::holders_one_hour_ago`](super::TokenRepository::holders_one_hour_ago)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub ts: DateTime<Utc>,
    pub tx_count_5m: u64,
    pub tx_count_1h: u64,
    pub volume_5m: f64,
    pub volume_1h: f64,
    pub buys_volume_5m: f64,
    pub sells_volume_5m: f64,
    pub holders_now: u64,
    pub liquidity: f64,
}

/// Normalized component values that fed a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub tx_accel: f64,
    pub vol_momentum: f64,
    pub holder_growth: f64,
    pub orderflow_imbalance: f64,
}

/// One scoring result for a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub ts: DateTime<Utc>,
    pub model_name: String,
    pub raw: f64,
    pub smoothed: f64,
    pub components: ScoreComponents,
}

/// Audit row appended on every status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: Uuid,
    /// None for the initial Discovery entry.
    pub old_status: Option<TokenStatus>,
    pub new_status: TokenStatus,
    pub reason: StatusChangeReason,
    pub metadata: Option<String>,
    pub changed_at: DateTime<Utc>,
}
