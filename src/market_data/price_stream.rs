// =============================================================================
// Live Price Stream Manager — CoinCap WebSocket feed with bounded reconnect
// =============================================================================
//
// Owns the persistent price WebSocket for a fixed set of asset identifiers
// and merges partial updates into the shared PriceBook.  The connection
// lifecycle is an explicit state machine:
//
//   Disconnected -> Connecting -> Connected
//        ^              |            |
//        +---- close ---+------------+        (retry_count += 1)
//        |
//        +--> Failed  when retry_count reaches MAX_RETRIES
//
// Reconnect policy is bounded linear backoff: a fixed 3-second delay between
// attempts, capped at 5 total attempts, after which the manager gives up
// until an explicit restart.  The delay is a cancellable scheduled task owned
// by the manager; `stop()` cancels it deterministically so no reconnect can
// fire after intentional shutdown.
//
// Error events (connect failures, read errors) are informational and only
// logged; closes are actionable and drive the retry accounting.  Malformed
// inbound messages are dropped without touching the snapshot or the counter.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::types::ConnectionState;

/// Total connection attempts before the manager gives up permanently.
pub const MAX_RETRIES: u32 = 5;

/// Fixed delay between reconnect attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Upper bound on a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Surfaced while a reconnect is scheduled.
pub const TRANSIENT_ERROR: &str = "price stream disconnected; retrying";

/// Surfaced once retries are exhausted; cleared only by a manual restart.
pub const TERMINAL_ERROR: &str = "price stream connection failed; manual refresh required";

// =============================================================================
// PriceBook
// =============================================================================

/// The current best-known mapping of asset identifier to price.
///
/// Prices are kept as the feed's decimal strings; formatting is the rendering
/// layer's concern.  Mutated only by the stream manager, read-only everywhere
/// else via [`PriceBook::snapshot`].
pub struct PriceBook {
    prices: RwLock<HashMap<String, String>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Merge a partial update, last-write-wins per key.  Keys absent from
    /// `updates` are left untouched.
    fn merge(&self, updates: HashMap<String, String>) {
        let mut prices = self.prices.write();
        for (id, price) in updates {
            prices.insert(id, price);
        }
    }

    /// Latest known price for `asset_id`, if any message has carried it yet.
    pub fn get(&self, asset_id: &str) -> Option<String> {
        self.prices.read().get(asset_id).cloned()
    }

    /// Clone of the full snapshot for serialisation.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.prices.read().clone()
    }

    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.read().is_empty()
    }
}

impl Default for PriceBook {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// StreamStatus
// =============================================================================

/// Observable connection status shared with the API layer.
///
/// Written only by the stream manager.
pub struct StreamStatus {
    state: RwLock<ConnectionState>,
    retry_count: AtomicU32,
    last_error: RwLock<Option<String>>,
}

/// Serialisable view of [`StreamStatus`] for the dashboard payload.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub state: ConnectionState,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl StreamStatus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            retry_count: AtomicU32::new(0),
            last_error: RwLock::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            state: self.state(),
            retry_count: self.retry_count(),
            last_error: self.last_error(),
        }
    }
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Message parsing
// =============================================================================

/// Parse an inbound price update.
///
/// Expected shape (dynamic top-level keys, one per subscribed identifier):
/// ```json
/// { "bitcoin": "50000.12", "ethereum": "3000.5" }
/// ```
/// The feed sends prices as numeric strings; bare JSON numbers are tolerated
/// and normalised to their string form.
fn parse_price_update(text: &str) -> Result<HashMap<String, String>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse price update JSON")?;

    let object = match root {
        serde_json::Value::Object(map) => map,
        other => bail!("price update is not a JSON object: {other}"),
    };

    let mut updates = HashMap::with_capacity(object.len());
    for (id, value) in object {
        let price = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => bail!("price for '{id}' is neither string nor number: {other}"),
        };
        updates.insert(id, price);
    }
    Ok(updates)
}

// =============================================================================
// StreamCore — transport-free state machine
// =============================================================================

/// What to do after a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryDecision {
    /// Schedule one more connection attempt after the delay.
    RetryAfter(Duration),
    /// Retries exhausted (or already terminal); no further attempts.
    GiveUp,
}

/// The reconnect/merge state machine, separated from the socket so the retry
/// accounting is testable without a network.
struct StreamCore {
    book: Arc<PriceBook>,
    status: Arc<StreamStatus>,
    /// Shared dashboard state version; bumped on every visible mutation.
    version: Arc<AtomicU64>,
    retry_delay: Duration,
}

impl StreamCore {
    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// A connection attempt is starting.
    fn on_connecting(&self) {
        *self.status.state.write() = ConnectionState::Connecting;
        self.bump_version();
        debug!("price stream connecting");
    }

    /// The connection opened: reset the retry counter and clear any surfaced
    /// error from earlier closures.
    fn on_open(&self) {
        *self.status.state.write() = ConnectionState::Connected;
        self.status.retry_count.store(0, Ordering::SeqCst);
        *self.status.last_error.write() = None;
        self.bump_version();
        info!("price stream connected");
    }

    /// Merge one inbound message into the book.  Malformed payloads are
    /// dropped: the snapshot is untouched and no retry is triggered.
    fn on_message(&self, text: &str) {
        match parse_price_update(text) {
            Ok(updates) if updates.is_empty() => {}
            Ok(updates) => {
                self.book.merge(updates);
                self.bump_version();
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed price message");
            }
        }
    }

    /// An error event.  Informational only: the closure that follows it is
    /// what drives the retry accounting.
    fn on_error(&self, err: &dyn std::fmt::Display) {
        warn!(error = %err, "price stream error");
    }

    /// The connection closed.  Increment the retry counter and decide whether
    /// to schedule another attempt or give up.
    fn on_close(&self) -> RetryDecision {
        // A forced close after terminal failure must not move the counter.
        if *self.status.state.read() == ConnectionState::Failed {
            return RetryDecision::GiveUp;
        }

        let attempts = self.status.retry_count.fetch_add(1, Ordering::SeqCst) + 1;

        if attempts >= MAX_RETRIES {
            *self.status.state.write() = ConnectionState::Failed;
            *self.status.last_error.write() = Some(TERMINAL_ERROR.to_string());
            self.bump_version();
            error!(
                attempts,
                "price stream retries exhausted; manual restart required"
            );
            RetryDecision::GiveUp
        } else {
            *self.status.state.write() = ConnectionState::Disconnected;
            *self.status.last_error.write() = Some(TRANSIENT_ERROR.to_string());
            self.bump_version();
            warn!(
                attempt = attempts,
                max = MAX_RETRIES,
                delay_ms = self.retry_delay.as_millis() as u64,
                "price stream closed; reconnect scheduled"
            );
            RetryDecision::RetryAfter(self.retry_delay)
        }
    }
}

// =============================================================================
// PriceStreamManager
// =============================================================================

/// Public handle owning the stream task and its shutdown channel.
pub struct PriceStreamManager {
    core: Arc<StreamCore>,
    url: String,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PriceStreamManager {
    /// Build a manager subscribed to exactly `asset_ids` on the feed at
    /// `stream_url`.  `version` is the shared dashboard state version.
    pub fn new(
        stream_url: &str,
        asset_ids: &[String],
        book: Arc<PriceBook>,
        status: Arc<StreamStatus>,
        version: Arc<AtomicU64>,
    ) -> Self {
        Self::with_retry_delay(stream_url, asset_ids, book, status, version, RETRY_DELAY)
    }

    /// As [`PriceStreamManager::new`] with an explicit reconnect delay.
    pub fn with_retry_delay(
        stream_url: &str,
        asset_ids: &[String],
        book: Arc<PriceBook>,
        status: Arc<StreamStatus>,
        version: Arc<AtomicU64>,
        retry_delay: Duration,
    ) -> Self {
        let url = format!("{}?assets={}", stream_url, asset_ids.join(","));
        Self {
            core: Arc::new(StreamCore {
                book,
                status,
                version,
                retry_delay,
            }),
            url,
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Spawn the connection task.  Idempotent: calling `start` while the
    /// task is still running is a logged no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                warn!("price stream already running; start ignored");
                return;
            }
        }

        let (tx, rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let core = self.core.clone();
        let url = self.url.clone();
        info!(url = %url, "starting price stream");
        *task = Some(tokio::spawn(run_stream(core, url, rx)));
    }

    /// Close the connection deterministically and cancel any pending
    /// reconnect.  Safe to call in any state, including mid-delay.
    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        let handle = self.task.lock().take();

        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "price stream task ended abnormally");
                }
            }
        }
        info!("price stream stopped");
    }

    /// Manual recovery: tear down, reset the retry accounting, and start
    /// again.  This is the only way out of [`ConnectionState::Failed`].
    pub async fn restart(&self) {
        self.stop().await;

        *self.core.status.state.write() = ConnectionState::Disconnected;
        self.core.status.retry_count.store(0, Ordering::SeqCst);
        *self.core.status.last_error.write() = None;
        self.core.bump_version();

        info!("price stream restart requested");
        self.start();
    }
}

// =============================================================================
// Connection task
// =============================================================================

/// Connect/read/reconnect loop.  Returns when the shutdown channel fires or
/// the retry budget is exhausted.
async fn run_stream(core: Arc<StreamCore>, url: String, mut shutdown: watch::Receiver<bool>) {
    loop {
        core.on_connecting();

        let attempt = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url));
        let outcome = tokio::select! {
            _ = shutdown.changed() => return,
            res = attempt => res,
        };

        match outcome {
            Ok(Ok((ws_stream, _response))) => {
                core.on_open();
                let (_write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => core.on_message(&text),
                            Some(Ok(Message::Close(_))) => {
                                info!("price stream received close frame");
                                break;
                            }
                            Some(Ok(_)) => {
                                // Ping/pong/binary frames carry no price data.
                            }
                            Some(Err(e)) => {
                                core.on_error(&e);
                                break;
                            }
                            None => {
                                warn!("price stream ended");
                                break;
                            }
                        }
                    }
                }
            }
            Ok(Err(e)) => core.on_error(&e),
            Err(_) => core.on_error(&"connect timed out"),
        }

        // Whatever ended the connection, it counts as one closure.
        match core.on_close() {
            RetryDecision::RetryAfter(delay) => {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::GiveUp => return,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn test_core(retry_delay: Duration) -> StreamCore {
        StreamCore {
            book: Arc::new(PriceBook::new()),
            status: Arc::new(StreamStatus::new()),
            version: Arc::new(AtomicU64::new(0)),
            retry_delay,
        }
    }

    // ---- parse_price_update ------------------------------------------------

    #[test]
    fn parse_valid_update() {
        let updates = parse_price_update(r#"{"bitcoin":"50000.12","ethereum":"3000.5"}"#).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates["bitcoin"], "50000.12");
        assert_eq!(updates["ethereum"], "3000.5");
    }

    #[test]
    fn parse_tolerates_bare_numbers() {
        let updates = parse_price_update(r#"{"litecoin":97.25}"#).unwrap();
        assert_eq!(updates["litecoin"], "97.25");
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(parse_price_update(r#"["bitcoin","50000"]"#).is_err());
        assert!(parse_price_update("not json at all").is_err());
    }

    #[test]
    fn parse_rejects_non_scalar_price() {
        assert!(parse_price_update(r#"{"bitcoin":{"usd":"50000"}}"#).is_err());
    }

    // ---- PriceBook merge ---------------------------------------------------

    #[test]
    fn merge_is_last_write_wins_per_key() {
        let core = test_core(RETRY_DELAY);
        core.on_message(r#"{"bitcoin":"50000"}"#);
        core.on_message(r#"{"ethereum":"3000"}"#);

        assert_eq!(core.book.get("bitcoin").as_deref(), Some("50000"));
        assert_eq!(core.book.get("ethereum").as_deref(), Some("3000"));
        assert_eq!(core.book.get("litecoin"), None);
        assert_eq!(core.book.len(), 2);
    }

    #[test]
    fn merge_overwrites_only_present_keys() {
        let core = test_core(RETRY_DELAY);
        core.on_message(r#"{"bitcoin":"50000","ethereum":"3000"}"#);
        core.on_message(r#"{"bitcoin":"51000"}"#);

        assert_eq!(core.book.get("bitcoin").as_deref(), Some("51000"));
        // Ethereum was omitted from the second message and must be untouched.
        assert_eq!(core.book.get("ethereum").as_deref(), Some("3000"));
    }

    #[test]
    fn malformed_message_leaves_snapshot_unchanged() {
        let core = test_core(RETRY_DELAY);
        core.on_message(r#"{"bitcoin":"50000"}"#);
        let version_before = core.version.load(Ordering::SeqCst);

        core.on_message("{{ definitely not json");
        core.on_message(r#"[1,2,3]"#);

        assert_eq!(core.book.snapshot().len(), 1);
        assert_eq!(core.book.get("bitcoin").as_deref(), Some("50000"));
        // Dropped messages are invisible to observers.
        assert_eq!(core.version.load(Ordering::SeqCst), version_before);
        // And they never count as a closure.
        assert_eq!(core.status.retry_count(), 0);
    }

    #[test]
    fn message_merge_bumps_version() {
        let core = test_core(RETRY_DELAY);
        let before = core.version.load(Ordering::SeqCst);
        core.on_message(r#"{"bitcoin":"50000"}"#);
        assert!(core.version.load(Ordering::SeqCst) > before);
    }

    // ---- Retry accounting --------------------------------------------------

    #[test]
    fn closes_below_limit_schedule_reconnects() {
        let core = test_core(RETRY_DELAY);
        for n in 1..MAX_RETRIES {
            assert_eq!(core.on_close(), RetryDecision::RetryAfter(RETRY_DELAY));
            assert_eq!(core.status.retry_count(), n);
            assert_eq!(core.status.state(), ConnectionState::Disconnected);
            assert_eq!(core.status.last_error().as_deref(), Some(TRANSIENT_ERROR));
        }
    }

    #[test]
    fn fifth_close_is_terminal() {
        let core = test_core(RETRY_DELAY);
        for _ in 1..MAX_RETRIES {
            assert_eq!(core.on_close(), RetryDecision::RetryAfter(RETRY_DELAY));
        }
        assert_eq!(core.on_close(), RetryDecision::GiveUp);
        assert_eq!(core.status.state(), ConnectionState::Failed);
        assert_eq!(core.status.retry_count(), MAX_RETRIES);
        assert_eq!(core.status.last_error().as_deref(), Some(TERMINAL_ERROR));
    }

    #[test]
    fn close_after_terminal_failure_does_not_move_counter() {
        let core = test_core(RETRY_DELAY);
        for _ in 0..MAX_RETRIES {
            core.on_close();
        }
        assert_eq!(core.status.state(), ConnectionState::Failed);

        // A sixth, manually forced close.
        assert_eq!(core.on_close(), RetryDecision::GiveUp);
        assert_eq!(core.status.retry_count(), MAX_RETRIES);
        assert_eq!(core.status.last_error().as_deref(), Some(TERMINAL_ERROR));
    }

    #[test]
    fn open_resets_counter_and_clears_error() {
        let core = test_core(RETRY_DELAY);
        core.on_close();
        core.on_close();
        core.on_close();
        assert_eq!(core.status.retry_count(), 3);
        assert!(core.status.last_error().is_some());

        core.on_open();
        assert_eq!(core.status.state(), ConnectionState::Connected);
        assert_eq!(core.status.retry_count(), 0);
        assert_eq!(core.status.last_error(), None);
    }

    #[test]
    fn connecting_transition() {
        let core = test_core(RETRY_DELAY);
        core.on_connecting();
        assert_eq!(core.status.state(), ConnectionState::Connecting);
    }

    // ---- Manager lifecycle (no reachable feed; loopback refuses fast) ------

    fn test_manager(retry_delay: Duration) -> (PriceStreamManager, Arc<StreamStatus>) {
        let book = Arc::new(PriceBook::new());
        let status = Arc::new(StreamStatus::new());
        let version = Arc::new(AtomicU64::new(0));
        let ids = vec!["bitcoin".to_string(), "ethereum".to_string()];
        let manager = PriceStreamManager::with_retry_delay(
            "ws://127.0.0.1:9",
            &ids,
            book,
            status.clone(),
            version,
            retry_delay,
        );
        (manager, status)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 5s");
    }

    #[tokio::test]
    async fn stop_cancels_pending_reconnect() {
        // A long delay keeps the manager parked in the reconnect wait.
        let (manager, status) = test_manager(Duration::from_secs(30));
        manager.start();

        wait_for(|| status.retry_count() >= 1).await;
        assert_eq!(status.state(), ConnectionState::Disconnected);

        // stop() must return promptly even though a 30s delay is pending.
        tokio::time::timeout(Duration::from_secs(2), manager.stop())
            .await
            .expect("stop did not cancel the pending reconnect");

        // No further attempts after shutdown.
        let frozen = status.retry_count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(status.retry_count(), frozen);
        assert_ne!(status.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn exhausted_retries_transition_to_failed() {
        let (manager, status) = test_manager(Duration::from_millis(10));
        manager.start();

        wait_for(|| status.state() == ConnectionState::Failed).await;
        assert_eq!(status.retry_count(), MAX_RETRIES);
        assert_eq!(status.last_error().as_deref(), Some(TERMINAL_ERROR));

        // The task has given up on its own; stop() is still safe.
        tokio::time::timeout(Duration::from_secs(2), manager.stop())
            .await
            .expect("stop after terminal failure should be immediate");
    }

    #[tokio::test]
    async fn restart_resets_terminal_failure() {
        // Long delay so the budget cannot burn down again mid-assertion.
        let (manager, status) = test_manager(Duration::from_secs(30));

        // Drive the core to terminal failure without a network.
        for _ in 0..MAX_RETRIES {
            manager.core.on_close();
        }
        assert_eq!(status.state(), ConnectionState::Failed);
        assert_eq!(status.last_error().as_deref(), Some(TERMINAL_ERROR));

        manager.restart().await;

        // The loopback connect is refused, so the first closure lands with a
        // freshly reset counter.
        wait_for(|| status.retry_count() >= 1).await;
        assert_eq!(status.retry_count(), 1);
        assert_eq!(status.state(), ConnectionState::Disconnected);
        assert_eq!(status.last_error().as_deref(), Some(TRANSIENT_ERROR));

        manager.stop().await;
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let (manager, status) = test_manager(Duration::from_secs(30));
        manager.start();
        manager.start(); // second call must be a no-op

        wait_for(|| status.retry_count() >= 1).await;
        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_safe() {
        let (manager, _status) = test_manager(RETRY_DELAY);
        manager.stop().await;
    }
}
