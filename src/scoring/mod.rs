// =============================================================================
// Scoring Engine — pluggable models producing smoothed composite scores
// =============================================================================
//
// `ScoringModel` is the dispatch point: a tagged variant per model, selected
// by name from configuration. Every model maps one metric snapshot (plus the
// derived holders-1h-ago join) to a `ScoreRecord`; the engine then applies
// EWMA smoothing against the previous record.
//
// Pure computation — no I/O, no clocks. All arithmetic is 64-bit IEEE-754.
// =============================================================================

pub mod hybrid_momentum;

use chrono::{DateTime, Utc};

use crate::settings::{Settings, WEIGHT_SUM_TOLERANCE};
use crate::store::{MetricSnapshot, ScoreRecord};

/// Everything a model sees for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub snapshot: &'a MetricSnapshot,
    /// Holder count roughly one hour ago, if an old-enough snapshot exists.
    pub holders_1h_ago: Option<u64>,
}

/// Scoring refusals. Both are configuration problems, not data problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoringError {
    UnknownModel(String),
    /// Weight sum outside 1 ± tolerance; the engine refuses to compute.
    InvalidWeights(String),
}

impl std::fmt::Display for ScoringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownModel(name) => write!(f, "unknown scoring model: {name}"),
            Self::InvalidWeights(msg) => write!(f, "invalid scoring weights: {msg}"),
        }
    }
}

impl std::error::Error for ScoringError {}

/// The available scoring models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringModel {
    HybridMomentum,
}

impl ScoringModel {
    /// Resolve a model from its configured name.
    pub fn from_name(name: &str) -> Result<Self, ScoringError> {
        match name {
            "hybrid_momentum" => Ok(Self::HybridMomentum),
            other => Err(ScoringError::UnknownModel(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::HybridMomentum => "hybrid_momentum",
        }
    }

    /// Score one snapshot. `previous` is the predecessor record used as the
    /// EWMA seed; when absent the smoothed score equals the raw score.
    pub fn score(
        &self,
        input: &ScoreInput<'_>,
        previous: Option<&ScoreRecord>,
        settings: &Settings,
        ts: DateTime<Utc>,
    ) -> Result<ScoreRecord, ScoringError> {
        let sum = settings.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ScoringError::InvalidWeights(format!(
                "sum {sum} outside 1 ± {WEIGHT_SUM_TOLERANCE}"
            )));
        }

        match self {
            Self::HybridMomentum => {
                let components = hybrid_momentum::components(input);
                let raw = hybrid_momentum::weighted_sum(&components, &settings.weights);
                let smoothed = ewma(
                    raw,
                    previous.map(|p| p.smoothed),
                    settings.ewma_alpha,
                );

                Ok(ScoreRecord {
                    ts,
                    model_name: self.name().to_string(),
                    raw,
                    smoothed,
                    components,
                })
            }
        }
    }
}

/// `smoothed(t) = α·raw(t) + (1−α)·smoothed(t−1)`, seeded with the raw value
/// when no previous score exists.
pub fn ewma(raw: f64, previous_smoothed: Option<f64>, alpha: f64) -> f64 {
    match previous_smoothed {
        Some(prev) => alpha * raw + (1.0 - alpha) * prev,
        None => raw,
    }
}
