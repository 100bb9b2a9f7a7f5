// =============================================================================
// Token Store — repository seam over token rows, pools and histories
// =============================================================================
//
// Everything the lifecycle, scheduler and publication code knows about
// persistence goes through the `TokenRepository` trait. The in-memory engine
// below is the only one shipped; any engine with row-level atomic updates and
// ordered range scans can replace it behind the same trait.
//
// Methods that stamp a time take `now` explicitly so ticks are replayable in
// tests; payload rows (snapshots, scores) carry their own timestamps.
// =============================================================================

mod memory;
mod model;

pub use memory::MemoryTokenStore;
pub use model::{MetricSnapshot, Pool, ScoreComponents, ScoreRecord, StatusChange, Token};

use chrono::{DateTime, Utc};

use crate::types::{StatusChangeReason, TokenStatus};

/// Store failures surfaced to callers. Lifecycle and scheduler treat them as
/// per-token skips and continue the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No token row for the given address.
    NotFound(String),
    /// The requested status edge is not part of the lifecycle.
    IllegalTransition { from: TokenStatus, to: TokenStatus },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(addr) => write!(f, "token not found: {addr}"),
            Self::IllegalTransition { from, to } => {
                write!(f, "illegal status transition: {from} -> {to}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Counts of rows removed by a compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub snapshots_deleted: usize,
    pub scores_deleted: usize,
}

/// Narrow persistence interface for token rows and their owned collections.
pub trait TokenRepository: Send + Sync {
    /// Idempotent creation with initial status Monitored. An address
    /// collision returns the existing row unchanged.
    fn upsert_monitored(&self, address: &str, now: DateTime<Utc>) -> Result<Token, StoreError>;

    fn get(&self, address: &str) -> Result<Option<Token>, StoreError>;

    /// Tokens in `status`, ordered by `created_at` ascending (address as the
    /// tie-break) for stable paging.
    fn list_by_status(
        &self,
        status: TokenStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Token>, StoreError>;

    fn count_by_status(&self, status: TokenStatus) -> Result<usize, StoreError>;

    /// Atomic status transition. Sets `status_changed_at`, stamps
    /// `activated_at`/`archived_at` as appropriate, resets the low-score /
    /// low-activity marks, and appends a [`StatusChange`] history row visible
    /// to subsequent reads together with the new status.
    fn update_status(
        &self,
        address: &str,
        new_status: TokenStatus,
        reason: StatusChangeReason,
        metadata: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Token, StoreError>;

    fn append_snapshot(&self, address: &str, snapshot: MetricSnapshot) -> Result<(), StoreError>;

    fn append_score(&self, address: &str, score: ScoreRecord) -> Result<(), StoreError>;

    /// Update the denormalized last-score fields on the token row.
    fn set_last_score(
        &self,
        address: &str,
        raw: f64,
        smoothed: f64,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Most recent metric snapshot, if any.
    fn latest_snapshot(&self, address: &str) -> Result<Option<MetricSnapshot>, StoreError>;

    /// Holder count from the nearest snapshot at least one hour older than
    /// `now`, if such a snapshot exists.
    fn holders_one_hour_ago(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, StoreError>;

    /// Most recent score record, if any (the EWMA predecessor).
    fn last_score(&self, address: &str) -> Result<Option<ScoreRecord>, StoreError>;

    /// Recent score records, newest first.
    fn list_scores(&self, address: &str, limit: usize) -> Result<Vec<ScoreRecord>, StoreError>;

    fn list_pools(&self, address: &str, only_active: bool) -> Result<Vec<Pool>, StoreError>;

    /// Insert or update a pool row owned by `address`.
    fn upsert_pool(
        &self,
        address: &str,
        pool_address: &str,
        dex: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Pool, StoreError>;

    /// Status-change audit rows, newest first.
    fn list_status_history(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<StatusChange>, StoreError>;

    /// Low-score bookkeeping on the token row.
    fn set_low_score_since(
        &self,
        address: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Increment and return the low-score streak counter.
    fn bump_low_score_streak(&self, address: &str) -> Result<u32, StoreError>;

    fn reset_low_score_streak(&self, address: &str) -> Result<(), StoreError>;

    /// Increment and return the low-activity streak counter.
    fn bump_low_activity_streak(&self, address: &str) -> Result<u32, StoreError>;

    fn reset_low_activity_streak(&self, address: &str) -> Result<(), StoreError>;

    /// Delete snapshots and scores strictly older than `cutoff` across all
    /// tokens.
    fn compact_before(&self, cutoff: DateTime<Utc>) -> Result<CompactionStats, StoreError>;

    /// Remove a token together with its pools and histories. Returns whether
    /// a row existed. Only the admin surface calls this.
    fn delete(&self, address: &str) -> Result<bool, StoreError>;
}
