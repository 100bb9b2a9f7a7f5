// =============================================================================
// Provider Gateway — bounded, retrying, caching HTTP client
// =============================================================================
//
// Wraps the external market-data REST API. Three mechanisms stack in front of
// every upstream request:
//
//   1. TTL cache keyed by (path, sorted query) — a hit never touches the
//      semaphore or the network.
//   2. A process-wide counting semaphore capping in-flight requests.
//   3. Retry with exponential backoff (1s, 2s, 4s, capped at 8s) for the
//      transient error kinds only; a Retry-After header supersedes the
//      schedule.
//
// SECURITY: the API key is sent as a header, never logged or serialized.
// =============================================================================

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::cache::TtlCache;

use super::market::{OverviewMetrics, TradeActivity};

/// Total deadline for a single upstream request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Retries after the initial attempt, for transient failures only.
const MAX_RETRIES: u32 = 3;

/// Ceiling for any single backoff sleep.
const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Page size requested from the trades endpoint.
const TRADES_PAGE_LIMIT: u32 = 50;

// =============================================================================
// Error taxonomy
// =============================================================================

/// Gateway failure kinds. Only `RateLimited`, `Upstream5xx` and `Transport`
/// are retried; the rest surface immediately as permanent for this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    NotFound,
    RateLimited,
    Upstream5xx(u16),
    Transport(String),
    Decode(String),
    AuthRejected,
}

impl FetchError {
    /// Whether the retry loop should try again on this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Upstream5xx(_) | Self::Transport(_)
        )
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Upstream5xx(code) => write!(f, "upstream error {code}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::AuthRejected => write!(f, "authentication rejected"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Map an HTTP status to an error kind; `None` means success.
fn classify_status(status: u16) -> Option<FetchError> {
    match status {
        200..=299 => None,
        401 | 403 => Some(FetchError::AuthRejected),
        404 => Some(FetchError::NotFound),
        429 => Some(FetchError::RateLimited),
        500..=599 => Some(FetchError::Upstream5xx(status)),
        // Remaining 4xx: permanent, we asked for something malformed.
        other => Some(FetchError::Decode(format!("unexpected status {other}"))),
    }
}

/// Backoff before retry number `retry` (1-based): 1s, 2s, 4s, capped.
fn backoff_delay(retry: u32) -> Duration {
    let secs = 1u64 << (retry.saturating_sub(1)).min(6);
    Duration::from_secs(secs).min(BACKOFF_CAP)
}

/// Deterministic cache key: path plus the query pairs in sorted order.
fn cache_key(path: &str, query: &[(&str, String)]) -> String {
    let mut pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    format!("{path}?{}", pairs.join("&"))
}

// =============================================================================
// ProviderClient
// =============================================================================

/// Gateway to the market-data provider.
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    semaphore: Arc<Semaphore>,
    /// What the semaphore is currently sized to; reconciled against settings.
    configured_permits: AtomicUsize,
    cache: TtlCache,
    /// Requests actually sent upstream (cache hits excluded).
    upstream_calls: AtomicU64,
}

impl ProviderClient {
    /// Create a new gateway.
    ///
    /// # Arguments
    /// * `base_url` — provider base, e.g. `https://public-api.birdeye.so`.
    /// * `api_key`  — optional credential sent as the `X-API-KEY` header;
    ///   `None` yields unauthenticated requests.
    /// * `max_concurrency` — initial global in-flight cap.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        max_concurrency: usize,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        let base_url = base_url.into();
        debug!(base_url = %base_url, max_concurrency, "provider gateway initialised");

        Self {
            http,
            base_url,
            api_key,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            configured_permits: AtomicUsize::new(max_concurrency),
            cache: TtlCache::new(),
            upstream_calls: AtomicU64::new(0),
        }
    }

    /// Fetch a decoded JSON document for `(path, query)`, consulting the
    /// cache first. Successful responses are cached for `ttl`.
    #[instrument(skip(self, query, ttl), name = "provider::fetch")]
    pub async fn fetch(
        &self,
        path: &str,
        query: &[(&str, String)],
        ttl: Duration,
    ) -> Result<serde_json::Value, FetchError> {
        let key = cache_key(path, query);
        if let Some(cached) = self.cache.get(&key) {
            debug!(key = %key, "provider cache hit");
            return Ok(cached);
        }

        // Cache miss: take an in-flight slot for the whole retry sequence.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| FetchError::Transport("gateway semaphore closed".into()))?;

        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        let mut attempt = 0;
        loop {
            match self.send_once(&url, query).await {
                Ok(body) => {
                    self.cache.set(&key, body.clone(), ttl);
                    return Ok(body);
                }
                Err((err, retry_after)) => {
                    attempt += 1;
                    if !err.is_retryable() || attempt > MAX_RETRIES {
                        warn!(url = %url, attempt, error = %err, "provider fetch failed");
                        return Err(err);
                    }
                    // Retry-After supersedes the exponential schedule.
                    let wait = retry_after
                        .unwrap_or_else(|| backoff_delay(attempt))
                        .min(BACKOFF_CAP);
                    debug!(url = %url, attempt, wait_ms = wait.as_millis() as u64, error = %err,
                        "transient provider error — retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// One HTTP round-trip. Returns the decoded body, or the error kind plus
    /// any `Retry-After` duration the server supplied.
    async fn send_once(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, (FetchError, Option<Duration>)> {
        self.upstream_calls.fetch_add(1, Ordering::Relaxed);

        let mut request = self.http.get(url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }

        let resp = request.send().await.map_err(|e| {
            (
                FetchError::Transport(e.to_string()),
                None,
            )
        })?;

        let status = resp.status().as_u16();
        if let Some(err) = classify_status(status) {
            let retry_after = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err((err, retry_after));
        }

        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| (FetchError::Decode(e.to_string()), None))
    }

    // -------------------------------------------------------------------------
    // High-level helpers
    // -------------------------------------------------------------------------

    /// `GET defi/token_overview?address=…` — liquidity and holder count.
    pub async fn overview(
        &self,
        address: &str,
        ttl: Duration,
    ) -> Result<OverviewMetrics, FetchError> {
        let body = self
            .fetch(
                "defi/token_overview",
                &[("address", address.to_string())],
                ttl,
            )
            .await?;
        OverviewMetrics::from_envelope(&body)
    }

    /// `GET defi/txs/token?address=…` — recent trades aggregated into the
    /// 5 m / 1 h windows.
    pub async fn trades(&self, address: &str, ttl: Duration) -> Result<TradeActivity, FetchError> {
        let body = self
            .fetch(
                "defi/txs/token",
                &[
                    ("address", address.to_string()),
                    ("limit", TRADES_PAGE_LIMIT.to_string()),
                    ("offset", "0".to_string()),
                    ("sort_type", "desc".to_string()),
                ],
                ttl,
            )
            .await?;
        TradeActivity::from_envelope(&body, Utc::now())
    }

    // -------------------------------------------------------------------------
    // Runtime tuning / introspection
    // -------------------------------------------------------------------------

    /// Reconcile the semaphore with a new concurrency target. Growth applies
    /// immediately; shrinking takes effect as idle permits become available.
    pub fn set_max_concurrency(&self, target: usize) {
        let target = target.max(1);
        let current = self.configured_permits.load(Ordering::Relaxed);
        if target == current {
            return;
        }

        if target > current {
            self.semaphore.add_permits(target - current);
            self.configured_permits.store(target, Ordering::Relaxed);
            debug!(previous = current, permits = target, "gateway concurrency raised");
        } else {
            let shrink = (current - target) as u32;
            match self.semaphore.try_acquire_many(shrink) {
                Ok(permits) => {
                    permits.forget();
                    self.configured_permits.store(target, Ordering::Relaxed);
                    debug!(previous = current, permits = target, "gateway concurrency lowered");
                }
                Err(_) => {
                    // All permits busy; the next reconcile will try again.
                    debug!(
                        previous = current,
                        permits = target,
                        "gateway concurrency shrink deferred (permits in use)"
                    );
                }
            }
        }
    }

    /// Number of requests actually sent upstream since startup.
    pub fn upstream_call_count(&self) -> u64 {
        self.upstream_calls.load(Ordering::Relaxed)
    }

    /// Entries currently in the response cache.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "configured_permits",
                &self.configured_permits.load(Ordering::Relaxed),
            )
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_sorts_query_pairs() {
        let a = cache_key(
            "defi/txs/token",
            &[("offset", "0".into()), ("address", "abc".into())],
        );
        let b = cache_key(
            "defi/txs/token",
            &[("address", "abc".into()), ("offset", "0".into())],
        );
        assert_eq!(a, b);
        assert_eq!(a, "defi/txs/token?address=abc&offset=0");
    }

    #[test]
    fn status_classification_matches_taxonomy() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(404), Some(FetchError::NotFound));
        assert_eq!(classify_status(429), Some(FetchError::RateLimited));
        assert_eq!(classify_status(401), Some(FetchError::AuthRejected));
        assert_eq!(classify_status(403), Some(FetchError::AuthRejected));
        assert_eq!(classify_status(503), Some(FetchError::Upstream5xx(503)));
        assert!(matches!(
            classify_status(400),
            Some(FetchError::Decode(_))
        ));
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(FetchError::RateLimited.is_retryable());
        assert!(FetchError::Upstream5xx(500).is_retryable());
        assert!(FetchError::Transport("reset".into()).is_retryable());

        assert!(!FetchError::NotFound.is_retryable());
        assert!(!FetchError::AuthRejected.is_retryable());
        assert!(!FetchError::Decode("bad json".into()).is_retryable());
    }

    #[test]
    fn backoff_schedule_is_1_2_4_capped_at_8() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn cache_hit_skips_upstream_counter() {
        let client = ProviderClient::new("http://127.0.0.1:0", None, 2);
        client.cache.set(
            &cache_key("defi/token_overview", &[("address", "abc".into())]),
            serde_json::json!({"data": {"liquidity": 1.0, "holder": 1}}),
            Duration::from_secs(60),
        );

        let body = client
            .fetch(
                "defi/token_overview",
                &[("address", "abc".into())],
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(body["data"]["holder"], 1);
        assert_eq!(client.upstream_call_count(), 0);
    }

    #[test]
    fn concurrency_reconcile_grows_and_shrinks() {
        let client = ProviderClient::new("http://127.0.0.1:0", None, 2);
        client.set_max_concurrency(5);
        assert_eq!(client.configured_permits.load(Ordering::Relaxed), 5);
        assert_eq!(client.semaphore.available_permits(), 5);

        client.set_max_concurrency(1);
        assert_eq!(client.configured_permits.load(Ordering::Relaxed), 1);
        assert_eq!(client.semaphore.available_permits(), 1);
    }

    #[test]
    fn debug_never_prints_the_api_key() {
        let client = ProviderClient::new("http://x", Some("secret-key".into()), 1);
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }
}
