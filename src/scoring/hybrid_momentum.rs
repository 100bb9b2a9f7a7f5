// =============================================================================
// Hybrid-Momentum model — four normalized momentum components
// =============================================================================
//
// Components, each mapped into [0, 1] before weighting:
//
//   tx_accel            (tx_5m / 5) / (tx_1h / 60), normalized by /10
//   vol_momentum        vol_5m / (vol_1h / 12),     normalized by /5
//   holder_growth       ln(1 + Δholders / holders_1h_ago), normalized by /2
//   orderflow_imbalance (buys − sells) / (buys + sells), rescaled (x+1)/2
//
// Zero denominators always yield a zero component, never NaN. The weighted
// sum is clamped to [0, 1].
// =============================================================================

use crate::settings::Weights;
use crate::store::ScoreComponents;

use super::ScoreInput;

/// Cap for the raw transaction-acceleration ratio.
const TX_ACCEL_MAX: f64 = 10.0;
/// Cap for the raw volume-momentum ratio.
const VOL_MOMENTUM_MAX: f64 = 5.0;
/// Cap for the log-scale holder-growth value.
const HOLDER_GROWTH_MAX: f64 = 2.0;

/// Compute the four normalized components for one snapshot.
pub fn components(input: &ScoreInput<'_>) -> ScoreComponents {
    let s = input.snapshot;

    ScoreComponents {
        tx_accel: normalize_capped(tx_accel(s.tx_count_5m, s.tx_count_1h), TX_ACCEL_MAX),
        vol_momentum: normalize_capped(vol_momentum(s.volume_5m, s.volume_1h), VOL_MOMENTUM_MAX),
        holder_growth: normalize_capped(
            holder_growth(s.holders_now, input.holders_1h_ago),
            HOLDER_GROWTH_MAX,
        ),
        orderflow_imbalance: (orderflow_imbalance(s.buys_volume_5m, s.sells_volume_5m) + 1.0) / 2.0,
    }
}

/// Weighted sum of normalized components, clamped to [0, 1].
pub fn weighted_sum(c: &ScoreComponents, w: &Weights) -> f64 {
    let raw = w.w_tx * c.tx_accel
        + w.w_vol * c.vol_momentum
        + w.w_hld * c.holder_growth
        + w.w_oi * c.orderflow_imbalance;
    raw.clamp(0.0, 1.0)
}

/// Short-term transaction rate relative to the hourly average rate.
fn tx_accel(tx_5m: u64, tx_1h: u64) -> f64 {
    if tx_1h == 0 {
        return 0.0;
    }
    (tx_5m as f64 / 5.0) / (tx_1h as f64 / 60.0)
}

/// Five-minute volume relative to the average 5-minute slice of the hour.
fn vol_momentum(volume_5m: f64, volume_1h: f64) -> f64 {
    if volume_1h <= 0.0 {
        return 0.0;
    }
    volume_5m / (volume_1h / 12.0)
}

/// Log-stabilized holder growth over the last hour. Zero when the baseline is
/// missing or zero; never negative (a shrinking holder set contributes
/// nothing rather than a penalty).
fn holder_growth(holders_now: u64, holders_1h_ago: Option<u64>) -> f64 {
    let ago = match holders_1h_ago {
        Some(h) if h > 0 => h as f64,
        _ => return 0.0,
    };
    let delta = (holders_now as f64 - ago).max(0.0);
    (1.0 + delta / ago).ln().max(0.0)
}

/// Signed buy/sell volume imbalance in [−1, 1].
fn orderflow_imbalance(buys_5m: f64, sells_5m: f64) -> f64 {
    let total = buys_5m + sells_5m;
    if total <= 0.0 {
        return 0.0;
    }
    (buys_5m - sells_5m) / total
}

/// Divide by `cap` and clamp to [0, 1].
fn normalize_capped(value: f64, cap: f64) -> f64 {
    (value / cap).clamp(0.0, 1.0)
}
