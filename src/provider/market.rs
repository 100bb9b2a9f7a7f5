// =============================================================================
// Market-data payloads — typed views over the provider's JSON envelopes
// =============================================================================

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::client::FetchError;

/// Token overview extract: the fields the lifecycle actually consumes.
///
/// Envelope shape: `{ "data": { "liquidity": ..., "holder": ... } }`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverviewMetrics {
    pub liquidity: f64,
    pub holders: u64,
}

impl OverviewMetrics {
    /// Parse the overview envelope. A missing `data` object is a decode
    /// failure; missing individual fields default to zero.
    pub fn from_envelope(body: &serde_json::Value) -> Result<Self, FetchError> {
        let data = body
            .get("data")
            .and_then(|d| d.as_object())
            .ok_or_else(|| FetchError::Decode("overview envelope missing 'data' object".into()))?;

        let liquidity = data
            .get("liquidity")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        // The provider has used both singular and plural over time.
        let holders = data
            .get("holder")
            .or_else(|| data.get("holders"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok(Self { liquidity, holders })
    }
}

/// Trade activity aggregated into the 5-minute and 1-hour windows the scoring
/// model consumes.
///
/// Envelope shape:
/// `{ "data": { "items": [ { "blockUnixTime": ..., "volumeInUSD": ...,
/// "txType": "buy"|"sell" }, ... ] } }`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TradeActivity {
    pub tx_count_5m: u64,
    pub tx_count_1h: u64,
    pub volume_5m: f64,
    pub volume_1h: f64,
    pub buys_volume_5m: f64,
    pub sells_volume_5m: f64,
}

impl TradeActivity {
    /// Parse the trades envelope and bucket items relative to `now`.
    pub fn from_envelope(
        body: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Self, FetchError> {
        let items = body
            .get("data")
            .and_then(|d| d.get("items"))
            .and_then(|i| i.as_array())
            .ok_or_else(|| FetchError::Decode("trades envelope missing 'data.items' array".into()))?;

        Ok(aggregate_trades(items, now))
    }
}

/// Bucket raw trade items into the 5 m / 1 h windows with a buy/sell split.
/// Items with unparseable timestamps are skipped.
pub fn aggregate_trades(items: &[serde_json::Value], now: DateTime<Utc>) -> TradeActivity {
    let cutoff_5m = now - Duration::minutes(5);
    let cutoff_1h = now - Duration::hours(1);

    let mut out = TradeActivity::default();

    for item in items {
        let ts = match item
            .get("blockUnixTime")
            .and_then(|v| v.as_i64())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        {
            Some(ts) => ts,
            None => continue,
        };
        let volume_usd = item
            .get("volumeInUSD")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let is_buy = item.get("txType").and_then(|v| v.as_str()) == Some("buy");

        if ts >= cutoff_1h && ts <= now {
            out.tx_count_1h += 1;
            out.volume_1h += volume_usd;

            if ts >= cutoff_5m {
                out.tx_count_5m += 1;
                out.volume_5m += volume_usd;
                if is_buy {
                    out.buys_volume_5m += volume_usd;
                } else {
                    out.sells_volume_5m += volume_usd;
                }
            }
        }
    }

    out
}
