// =============================================================================
// In-memory token store
// =============================================================================
//
// One map guarded by a single RwLock. Every mutation happens under the write
// lock, which gives the per-row serialization and read-your-writes atomicity
// the repository contract requires (a status update and its history row become
// visible together).
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::types::{StatusChangeReason, TokenStatus};

use super::model::{MetricSnapshot, Pool, ScoreRecord, StatusChange, Token};
use super::{CompactionStats, StoreError, TokenRepository};

/// A token row together with everything it owns.
#[derive(Debug, Clone)]
struct TokenRow {
    token: Token,
    pools: Vec<Pool>,
    snapshots: Vec<MetricSnapshot>,
    scores: Vec<ScoreRecord>,
    history: Vec<StatusChange>,
}

/// The shipped repository engine: a process-local map of token rows.
pub struct MemoryTokenStore {
    rows: RwLock<HashMap<String, TokenRow>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    fn with_row<T>(
        &self,
        address: &str,
        f: impl FnOnce(&mut TokenRow) -> T,
    ) -> Result<T, StoreError> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(address)
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;
        Ok(f(row))
    }

    fn read_row<T>(&self, address: &str, f: impl FnOnce(&TokenRow) -> T) -> Result<T, StoreError> {
        let rows = self.rows.read();
        let row = rows
            .get(address)
            .ok_or_else(|| StoreError::NotFound(address.to_string()))?;
        Ok(f(row))
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRepository for MemoryTokenStore {
    fn upsert_monitored(&self, address: &str, now: DateTime<Utc>) -> Result<Token, StoreError> {
        let mut rows = self.rows.write();
        if let Some(existing) = rows.get(address) {
            return Ok(existing.token.clone());
        }

        let token = Token::new_monitored(address, now);
        let history = vec![StatusChange {
            id: Uuid::new_v4(),
            old_status: None,
            new_status: TokenStatus::Monitored,
            reason: StatusChangeReason::Discovery,
            metadata: None,
            changed_at: now,
        }];
        rows.insert(
            address.to_string(),
            TokenRow {
                token: token.clone(),
                pools: Vec::new(),
                snapshots: Vec::new(),
                scores: Vec::new(),
                history,
            },
        );
        debug!(address, "token row created (monitored)");
        Ok(token)
    }

    fn get(&self, address: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.rows.read().get(address).map(|r| r.token.clone()))
    }

    fn list_by_status(
        &self,
        status: TokenStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Token>, StoreError> {
        let rows = self.rows.read();
        let mut tokens: Vec<Token> = rows
            .values()
            .filter(|r| r.token.status == status)
            .map(|r| r.token.clone())
            .collect();
        tokens.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.address.cmp(&b.address))
        });
        Ok(tokens.into_iter().skip(offset).take(limit).collect())
    }

    fn count_by_status(&self, status: TokenStatus) -> Result<usize, StoreError> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| r.token.status == status)
            .count())
    }

    fn update_status(
        &self,
        address: &str,
        new_status: TokenStatus,
        reason: StatusChangeReason,
        metadata: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Token, StoreError> {
        self.with_row(address, |row| {
            let from = row.token.status;
            if !from.can_transition_to(new_status) {
                return Err(StoreError::IllegalTransition {
                    from,
                    to: new_status,
                });
            }

            row.token.status = new_status;
            row.token.status_changed_at = now;
            match new_status {
                TokenStatus::Active => row.token.activated_at = Some(now),
                TokenStatus::Archived => row.token.archived_at = Some(now),
                TokenStatus::Monitored => {}
            }
            // A fresh state starts with clean lifecycle marks.
            row.token.low_score_streak = 0;
            row.token.low_activity_streak = 0;
            row.token.low_score_since = None;

            row.history.push(StatusChange {
                id: Uuid::new_v4(),
                old_status: Some(from),
                new_status,
                reason,
                metadata,
                changed_at: now,
            });

            debug!(address, old_status = %from, new_status = %new_status, reason = %reason, "status updated");
            Ok(row.token.clone())
        })?
    }

    fn append_snapshot(&self, address: &str, snapshot: MetricSnapshot) -> Result<(), StoreError> {
        self.with_row(address, |row| row.snapshots.push(snapshot))
    }

    fn append_score(&self, address: &str, score: ScoreRecord) -> Result<(), StoreError> {
        self.with_row(address, |row| row.scores.push(score))
    }

    fn set_last_score(
        &self,
        address: &str,
        raw: f64,
        smoothed: f64,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_row(address, |row| {
            row.token.last_raw_score = Some(raw);
            row.token.last_smoothed_score = Some(smoothed);
            row.token.last_scored_at = Some(ts);
        })
    }

    fn latest_snapshot(&self, address: &str) -> Result<Option<MetricSnapshot>, StoreError> {
        self.read_row(address, |row| {
            row.snapshots.iter().max_by_key(|s| s.ts).cloned()
        })
    }

    fn holders_one_hour_ago(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, StoreError> {
        let cutoff = now - Duration::hours(1);
        self.read_row(address, |row| {
            row.snapshots
                .iter()
                .filter(|s| s.ts <= cutoff)
                .max_by_key(|s| s.ts)
                .map(|s| s.holders_now)
        })
    }

    fn last_score(&self, address: &str) -> Result<Option<ScoreRecord>, StoreError> {
        self.read_row(address, |row| {
            row.scores.iter().max_by_key(|s| s.ts).cloned()
        })
    }

    fn list_scores(&self, address: &str, limit: usize) -> Result<Vec<ScoreRecord>, StoreError> {
        self.read_row(address, |row| {
            let mut scores = row.scores.clone();
            scores.sort_by(|a, b| b.ts.cmp(&a.ts));
            scores.truncate(limit);
            scores
        })
    }

    fn list_pools(&self, address: &str, only_active: bool) -> Result<Vec<Pool>, StoreError> {
        self.read_row(address, |row| {
            row.pools
                .iter()
                .filter(|p| !only_active || p.active)
                .cloned()
                .collect()
        })
    }

    fn upsert_pool(
        &self,
        address: &str,
        pool_address: &str,
        dex: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Pool, StoreError> {
        self.with_row(address, |row| {
            if let Some(existing) = row.pools.iter_mut().find(|p| p.address == pool_address) {
                existing.dex = dex.to_string();
                existing.active = active;
                return existing.clone();
            }
            let pool = Pool {
                address: pool_address.to_string(),
                token_address: address.to_string(),
                dex: dex.to_string(),
                active,
                created_at: now,
            };
            row.pools.push(pool.clone());
            pool
        })
    }

    fn list_status_history(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<StatusChange>, StoreError> {
        self.read_row(address, |row| {
            let mut history = row.history.clone();
            history.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
            history.truncate(limit);
            history
        })
    }

    fn set_low_score_since(
        &self,
        address: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.with_row(address, |row| row.token.low_score_since = since)
    }

    fn bump_low_score_streak(&self, address: &str) -> Result<u32, StoreError> {
        self.with_row(address, |row| {
            row.token.low_score_streak += 1;
            row.token.low_score_streak
        })
    }

    fn reset_low_score_streak(&self, address: &str) -> Result<(), StoreError> {
        self.with_row(address, |row| row.token.low_score_streak = 0)
    }

    fn bump_low_activity_streak(&self, address: &str) -> Result<u32, StoreError> {
        self.with_row(address, |row| {
            row.token.low_activity_streak += 1;
            row.token.low_activity_streak
        })
    }

    fn reset_low_activity_streak(&self, address: &str) -> Result<(), StoreError> {
        self.with_row(address, |row| row.token.low_activity_streak = 0)
    }

    fn compact_before(&self, cutoff: DateTime<Utc>) -> Result<CompactionStats, StoreError> {
        let mut rows = self.rows.write();
        let mut stats = CompactionStats::default();
        for row in rows.values_mut() {
            let before_snaps = row.snapshots.len();
            row.snapshots.retain(|s| s.ts >= cutoff);
            stats.snapshots_deleted += before_snaps - row.snapshots.len();

            let before_scores = row.scores.len();
            row.scores.retain(|s| s.ts >= cutoff);
            stats.scores_deleted += before_scores - row.scores.len();
        }
        Ok(stats)
    }

    fn delete(&self, address: &str) -> Result<bool, StoreError> {
        Ok(self.rows.write().remove(address).is_some())
    }
}
