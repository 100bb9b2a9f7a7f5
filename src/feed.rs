// =============================================================================
// Migration Feed Subscriber — WebSocket ingestion of newly-migrated tokens
// =============================================================================
//
// Long-lived task. Connects to the feed, sends one subscription frame for the
// migration channel, then reads frames forever. Every recognizable token
// address is upserted as Monitored; when the frame also names the migration
// pool, the pool is upserted alongside. Keepalives, acknowledgements and
// unrecognizable frames are logged and ignored — nothing on this path is
// fatal.
//
// Reconnects with bounded exponential backoff plus jitter; the attempt
// counter resets on every successful open. A shutdown signal interrupts any
// sleep or read and exits cleanly.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::store::TokenRepository;
use crate::types::TokenStatus;

/// Reconnect backoff base.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Reconnect backoff ceiling (before jitter).
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// A connection with no frames for this long is considered dead.
const HEARTBEAT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// What one connection attempt ended with.
enum FeedExit {
    Shutdown,
    Disconnected,
}

/// A parsed migration event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    pub token_address: String,
    /// Migration pool, when the frame carries one.
    pub pool: Option<PoolInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    pub address: String,
    pub dex: String,
}

/// The frame keys that may carry the token address, in precedence order.
const ADDRESS_KEYS: [&str; 3] = ["mint", "address", "tokenAddress"];

/// First non-empty string among `keys` in `obj`.
fn first_str_key<'a>(
    obj: &'a serde_json::Map<String, serde_json::Value>,
    keys: &[&str],
) -> Option<&'a str> {
    for key in keys {
        if let Some(value) = obj.get(*key).and_then(|v| v.as_str()) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Non-empty string under `key`, checked at the top level first, then one
/// level down under `data`.
fn str_field<'a>(
    root: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    root.get(key)
        .and_then(|v| v.as_str())
        .or_else(|| {
            root.get("data")
                .and_then(|d| d.as_object())
                .and_then(|d| d.get(key))
                .and_then(|v| v.as_str())
        })
        .filter(|s| !s.is_empty())
}

/// Extract a token event from a text frame.
///
/// The address is taken from the first present of `mint`, `address`,
/// `tokenAddress` — checked at the top level first, then one level down
/// under `data`. Frames without a recognizable address yield `None`.
pub fn extract_event(text: &str) -> Option<FeedEvent> {
    let root: serde_json::Value = serde_json::from_str(text).ok()?;
    let root = root.as_object()?;

    let address = first_str_key(root, &ADDRESS_KEYS).or_else(|| {
        root.get("data")
            .and_then(|d| d.as_object())
            .and_then(|d| first_str_key(d, &ADDRESS_KEYS))
    })?;

    Some(FeedEvent {
        token_address: address.to_string(),
        pool: extract_pool(root),
    })
}

/// Pool address and DEX label from a migration frame, if present. Migrations
/// land on Raydium unless the frame says otherwise.
fn extract_pool(root: &serde_json::Map<String, serde_json::Value>) -> Option<PoolInfo> {
    for key in ["pool", "poolAddress", "liquidityPool"] {
        if let Some(addr) = str_field(root, key) {
            let dex = str_field(root, "dex")
                .or_else(|| str_field(root, "dexName"))
                .unwrap_or("raydium")
                .to_string();
            return Some(PoolInfo {
                address: addr.to_string(),
                dex,
            });
        }
    }
    None
}

/// Backoff before reconnect attempt `n` (1-based), without jitter:
/// `min(1s · 2^(n−1), 30s)`.
fn base_delay(attempt: u32) -> Duration {
    let factor = 1u64 << (attempt.saturating_sub(1)).min(6);
    (BACKOFF_BASE * factor as u32).min(BACKOFF_CAP)
}

/// Run the feed subscriber until shutdown. Never returns an error to the
/// caller; every failure is handled by reconnecting.
pub async fn run_feed(
    url: String,
    store: Arc<dyn TokenRepository>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(url = %url, "feed subscriber starting");
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match connect_and_read(&url, store.as_ref(), &mut shutdown).await {
            Ok(FeedExit::Shutdown) => break,
            Ok(FeedExit::Disconnected) => {
                // The connection opened successfully before dropping.
                attempt = 1;
            }
            Err(e) => {
                attempt += 1;
                warn!(error = %e, attempt, "feed connection failed");
            }
        }

        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
        let delay = base_delay(attempt.max(1)) + jitter;
        debug!(delay_ms = delay.as_millis() as u64, "feed reconnecting after backoff");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("feed subscriber stopped");
}

/// One connection lifetime: open, subscribe, then read frames until the
/// stream drops, the heartbeat times out, or shutdown arrives.
async fn connect_and_read(
    url: &str,
    store: &dyn TokenRepository,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<FeedExit> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to feed WebSocket")?;
    info!(url = %url, "feed WebSocket connected");

    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::json!({"method": "subscribeMigration"}).to_string();
    write
        .send(Message::Text(subscribe))
        .await
        .context("failed to send subscription frame")?;
    debug!(channel = "subscribeMigration", "feed subscription sent");

    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => return Ok(FeedExit::Shutdown),
            next = tokio::time::timeout(HEARTBEAT_IDLE_TIMEOUT, read.next()) => next,
        };

        let msg = match next {
            Err(_elapsed) => {
                anyhow::bail!("feed idle for {}s — reconnecting", HEARTBEAT_IDLE_TIMEOUT.as_secs())
            }
            Ok(None) => {
                warn!("feed stream ended");
                return Ok(FeedExit::Disconnected);
            }
            Ok(Some(Err(e))) => return Err(e).context("feed WebSocket read error"),
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => handle_text_frame(&text, store),
            Message::Ping(payload) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            Message::Close(frame) => {
                warn!(frame = ?frame, "feed connection closed by server");
                return Ok(FeedExit::Disconnected);
            }
            // Pong / Binary / Frame keepalives carry nothing for us.
            other => debug!(kind = ?other, "ignoring non-text feed frame"),
        }
    }
}

/// Parse one text frame and apply it to the store. Store stalls backpressure
/// the read loop by design; store errors are logged and skipped.
fn handle_text_frame(text: &str, store: &dyn TokenRepository) {
    let Some(event) = extract_event(text) else {
        // Subscription acks and heartbeats land here.
        debug!(frame = %text, "feed frame without token address ignored");
        return;
    };

    let now = Utc::now();
    match store.upsert_monitored(&event.token_address, now) {
        Ok(token) => {
            if token.status == TokenStatus::Monitored && token.created_at == now {
                info!(address = %token.address, "token ingested from migration feed");
            }
        }
        Err(e) => {
            warn!(address = %event.token_address, error = %e, "feed upsert failed");
            return;
        }
    }

    if let Some(pool) = event.pool {
        if let Err(e) =
            store.upsert_pool(&event.token_address, &pool.address, &pool.dex, true, now)
        {
            warn!(address = %event.token_address, pool = %pool.address, error = %e,
                "feed pool upsert failed");
        }
    }
}
