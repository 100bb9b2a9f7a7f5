// =============================================================================
// Publication Generator — the TOML strategy artifact for the arb executor
// =============================================================================
//
// Selects the top Active tokens by smoothed score and emits them, with their
// active pools grouped by DEX, as a self-describing TOML document. The
// generator is stateless: output is fully determined by (store state,
// settings, generation time). The serving layer caches the rendered text for
// a short lifetime.
//
// Selection:
//   1. Active tokens with smoothed score ≥ min_score_for_config whose last
//      score is fresher than two hours.
//   2. Sorted by score descending; ties broken by activated_at ascending
//      (older first), then address.
//   3. First config_top_count tokens; only pools with active = true.
// =============================================================================

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::settings::Settings;
use crate::store::{StoreError, Token, TokenRepository};
use crate::types::TokenStatus;

/// Scores older than this many hours do not qualify a token for publication.
const SCORE_FRESHNESS_HOURS: i64 = 2;

/// Artifact grammar version.
const ARTIFACT_VERSION: &str = "1.0.0";

// =============================================================================
// Artifact shape
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StrategyArtifact {
    pub strategy: StrategyHeader,
    pub tokens: Vec<TokenEntry>,
    pub metadata: ArtifactMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyHeader {
    pub name: String,
    pub version: String,
    pub model_name: String,
    pub min_score_threshold: f64,
    pub generated_at: String,
    pub tokens_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenEntry {
    pub address: String,
    pub score: f64,
    pub calculated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<String>,
    pub pools_count: usize,
    /// DEX label → pool addresses. BTreeMap keeps the rendering stable.
    pub pools: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactMetadata {
    pub source: String,
    pub tokens_selected: usize,
    pub total_pools: usize,
    pub selection: SelectionCriteria,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionCriteria {
    pub status: String,
    pub min_score: f64,
    pub top_count: usize,
    pub model: String,
    pub score_freshness_hours: i64,
}

// =============================================================================
// Selection
// =============================================================================

/// Pick the Active tokens that qualify for publication, fully ordered.
pub fn select_top_tokens(
    store: &dyn TokenRepository,
    cfg: &Settings,
    now: DateTime<Utc>,
) -> Result<Vec<Token>, StoreError> {
    let freshness_cutoff = now - Duration::hours(SCORE_FRESHNESS_HOURS);

    let mut candidates: Vec<Token> = store
        .list_by_status(TokenStatus::Active, usize::MAX, 0)?
        .into_iter()
        .filter(|t| {
            t.last_smoothed_score
                .map(|s| s >= cfg.min_score_for_config)
                .unwrap_or(false)
                && t.last_scored_at.map(|ts| ts >= freshness_cutoff).unwrap_or(false)
        })
        .collect();

    candidates.sort_by(|a, b| {
        let score_a = a.last_smoothed_score.unwrap_or(0.0);
        let score_b = b.last_smoothed_score.unwrap_or(0.0);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.activated_at.cmp(&b.activated_at))
            .then_with(|| a.address.cmp(&b.address))
    });

    candidates.truncate(cfg.config_top_count);
    Ok(candidates)
}

// =============================================================================
// Generation
// =============================================================================

/// Build the artifact from one coherent store read.
pub fn generate(
    store: &dyn TokenRepository,
    cfg: &Settings,
    now: DateTime<Utc>,
) -> Result<StrategyArtifact, StoreError> {
    let selected = select_top_tokens(store, cfg, now)?;

    let mut entries = Vec::with_capacity(selected.len());
    let mut total_pools = 0usize;

    for token in &selected {
        let pools = store.list_pools(&token.address, true)?;
        if pools.is_empty() {
            warn!(address = %token.address, "qualifying token has no active pools — excluded");
            continue;
        }

        let mut by_dex: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for pool in &pools {
            by_dex.entry(pool.dex.clone()).or_default().push(pool.address.clone());
        }
        for addresses in by_dex.values_mut() {
            addresses.sort();
        }

        total_pools += pools.len();
        entries.push(TokenEntry {
            address: token.address.clone(),
            score: token.last_smoothed_score.unwrap_or(0.0),
            calculated_at: token
                .last_scored_at
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_default(),
            activated_at: token.activated_at.map(|ts| ts.to_rfc3339()),
            pools_count: pools.len(),
            pools: by_dex,
        });
    }

    let warning = if entries.is_empty() {
        Some("no tokens meet the selection criteria".to_string())
    } else {
        None
    };

    debug!(
        tokens = entries.len(),
        pools = total_pools,
        min_score = cfg.min_score_for_config,
        "strategy artifact generated"
    );

    Ok(StrategyArtifact {
        strategy: StrategyHeader {
            name: "dynamic_strategy".to_string(),
            version: ARTIFACT_VERSION.to_string(),
            model_name: cfg.scoring_model.clone(),
            min_score_threshold: cfg.min_score_for_config,
            generated_at: now.to_rfc3339(),
            tokens_count: entries.len(),
            warning,
        },
        metadata: ArtifactMetadata {
            source: "nova-scout".to_string(),
            tokens_selected: entries.len(),
            total_pools,
            selection: SelectionCriteria {
                status: TokenStatus::Active.to_string(),
                min_score: cfg.min_score_for_config,
                top_count: cfg.config_top_count,
                model: cfg.scoring_model.clone(),
                score_freshness_hours: SCORE_FRESHNESS_HOURS,
            },
        },
        tokens: entries,
    })
}

/// Render the artifact as TOML text.
pub fn render(artifact: &StrategyArtifact) -> Result<String> {
    toml::to_string(artifact).context("failed to serialize strategy artifact to TOML")
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use crate::types::StatusChangeReason;

    fn t0() -> DateTime<Utc> {
        "2025-06-01T00:00:00Z".parse().unwrap()
    }

    /// Seed an Active token with a given smoothed score and activation time.
    fn seed_active(
        store: &MemoryTokenStore,
        address: &str,
        smoothed: f64,
        activated_at: DateTime<Utc>,
        scored_at: DateTime<Utc>,
    ) {
        store.upsert_monitored(address, t0()).unwrap();
        store
            .update_status(
                address,
                TokenStatus::Active,
                StatusChangeReason::Activation,
                None,
                activated_at,
            )
            .unwrap();
        store
            .set_last_score(address, smoothed, smoothed, scored_at)
            .unwrap();
        store
            .upsert_pool(address, &format!("{address}-pool"), "raydium", true, t0())
            .unwrap();
    }

    #[test]
    fn selection_orders_by_score_then_activation_then_address() {
        let store = MemoryTokenStore::new();
        let now = t0() + Duration::hours(1);

        // A and C tie at 0.9; A activated earlier, so A sorts first. D falls
        // below the threshold.
        seed_active(&store, "A", 0.9, t0(), now);
        seed_active(&store, "B", 0.7, t0() + Duration::minutes(2), now);
        seed_active(&store, "C", 0.9, t0() + Duration::minutes(1), now);
        seed_active(&store, "D", 0.4, t0(), now);

        let mut cfg = Settings::default();
        cfg.min_score_for_config = 0.5;
        cfg.config_top_count = 3;

        let selected = select_top_tokens(&store, &cfg, now).unwrap();
        let addrs: Vec<&str> = selected.iter().map(|t| t.address.as_str()).collect();
        assert_eq!(addrs, vec!["A", "C", "B"]);
    }

    #[test]
    fn equal_scores_and_activation_fall_back_to_address() {
        let store = MemoryTokenStore::new();
        let now = t0();
        seed_active(&store, "bbb", 0.8, t0(), now);
        seed_active(&store, "aaa", 0.8, t0(), now);

        let selected = select_top_tokens(&store, &Settings::default(), now).unwrap();
        let addrs: Vec<&str> = selected.iter().map(|t| t.address.as_str()).collect();
        assert_eq!(addrs, vec!["aaa", "bbb"]);
    }

    #[test]
    fn stale_scores_are_excluded() {
        let store = MemoryTokenStore::new();
        let now = t0() + Duration::hours(5);
        seed_active(&store, "fresh", 0.9, t0(), now - Duration::minutes(30));
        seed_active(&store, "stale", 0.9, t0(), now - Duration::hours(3));

        let selected = select_top_tokens(&store, &Settings::default(), now).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].address, "fresh");
    }

    #[test]
    fn selection_respects_top_count() {
        let store = MemoryTokenStore::new();
        for i in 0..10 {
            seed_active(&store, &format!("tok{i}"), 0.9, t0(), t0());
        }
        let cfg = Settings::default();
        let selected = select_top_tokens(&store, &cfg, t0()).unwrap();
        assert_eq!(selected.len(), cfg.config_top_count);
    }

    #[test]
    fn artifact_groups_active_pools_by_dex() {
        let store = MemoryTokenStore::new();
        seed_active(&store, "tok", 0.9, t0(), t0());
        store
            .upsert_pool("tok", "pool-m1", "meteora", true, t0())
            .unwrap();
        store
            .upsert_pool("tok", "pool-dead", "orca", false, t0())
            .unwrap();

        let artifact = generate(&store, &Settings::default(), t0()).unwrap();
        assert_eq!(artifact.tokens.len(), 1);

        let entry = &artifact.tokens[0];
        assert_eq!(entry.pools_count, 2);
        assert_eq!(entry.pools["raydium"], vec!["tok-pool"]);
        assert_eq!(entry.pools["meteora"], vec!["pool-m1"]);
        assert!(!entry.pools.contains_key("orca"));
    }

    #[test]
    fn token_without_active_pools_is_dropped_from_artifact() {
        let store = MemoryTokenStore::new();
        seed_active(&store, "tok", 0.9, t0(), t0());
        // Deactivate its only pool.
        store
            .upsert_pool("tok", "tok-pool", "raydium", false, t0())
            .unwrap();

        let artifact = generate(&store, &Settings::default(), t0()).unwrap();
        assert!(artifact.tokens.is_empty());
        assert!(artifact.strategy.warning.is_some());
    }

    #[test]
    fn empty_selection_emits_skeleton_with_warning() {
        let store = MemoryTokenStore::new();
        let artifact = generate(&store, &Settings::default(), t0()).unwrap();

        assert_eq!(artifact.strategy.tokens_count, 0);
        assert_eq!(
            artifact.strategy.warning.as_deref(),
            Some("no tokens meet the selection criteria")
        );

        let text = render(&artifact).unwrap();
        assert!(text.contains("version = \"1.0.0\""));
        assert!(text.contains("warning"));
    }

    #[test]
    fn generation_is_pure_for_fixed_inputs() {
        let store = MemoryTokenStore::new();
        seed_active(&store, "tok", 0.9, t0(), t0());
        let cfg = Settings::default();

        let a = render(&generate(&store, &cfg, t0()).unwrap()).unwrap();
        let b = render(&generate(&store, &cfg, t0()).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rendered_artifact_is_parseable_toml() {
        let store = MemoryTokenStore::new();
        seed_active(&store, "tok", 0.85, t0(), t0());

        let text = render(&generate(&store, &Settings::default(), t0()).unwrap()).unwrap();
        let parsed: toml::Value = toml::from_str(&text).unwrap();

        assert_eq!(
            parsed["strategy"]["model_name"].as_str(),
            Some("hybrid_momentum")
        );
        assert_eq!(parsed["strategy"]["tokens_count"].as_integer(), Some(1));
        assert_eq!(
            parsed["tokens"][0]["address"].as_str(),
            Some("tok")
        );
        assert_eq!(
            parsed["metadata"]["selection"]["status"].as_str(),
            Some("active")
        );
    }
}
