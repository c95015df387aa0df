// =============================================================================
// Central Application State — SkyPulse Dashboard Backend
// =============================================================================
//
// The single source of truth served to the dashboard.  Collaborators hold Arc
// references to their own stores; AppState ties them together and provides a
// unified snapshot for the REST API and WebSocket push feed.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - Each store is mutated only by its owning collaborator; the price book
//     and stream status are written exclusively by the stream manager.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::price_stream::StreamSnapshot;
use crate::market_data::{MarketCapEntry, MarketCapStore, PriceBook, StreamStatus};
use crate::news::{NewsArticle, NewsStore};
use crate::preferences::PreferencesStore;
use crate::runtime_config::RuntimeConfig;
use crate::types::ErrorRecord;
use crate::weather::{CurrentConditions, WeatherStore};

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Monotonically increasing version counter, incremented on every
    /// meaningful state mutation.  The WebSocket feed uses this to detect
    /// changes and push updates.  Shared (Arc) so the stream manager can
    /// bump it without holding a reference to the whole AppState.
    pub state_version: Arc<AtomicU64>,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Live price stream (written only by the stream manager) ──────────
    pub price_book: Arc<PriceBook>,
    pub stream_status: Arc<StreamStatus>,

    // ── REST collaborators ──────────────────────────────────────────────
    pub market_caps: Arc<MarketCapStore>,
    pub weather: Arc<WeatherStore>,
    pub news: Arc<NewsStore>,

    // ── User preferences ────────────────────────────────────────────────
    pub preferences: Arc<PreferencesStore>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the service was started.  Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState` from the runtime configuration and an
    /// already-opened preferences store.  The returned value is typically
    /// wrapped in `Arc` immediately.
    pub fn new(config: RuntimeConfig, preferences: Arc<PreferencesStore>) -> Self {
        Self {
            state_version: Arc::new(AtomicU64::new(1)),
            ws_sequence_number: AtomicU64::new(0),

            runtime_config: Arc::new(RwLock::new(config)),

            price_book: Arc::new(PriceBook::new()),
            stream_status: Arc::new(StreamStatus::new()),

            market_caps: Arc::new(MarketCapStore::new()),
            weather: Arc::new(WeatherStore::new()),
            news: Arc::new(NewsStore::new()),

            preferences,

            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    /// Atomically increment the state version.  Call this after every
    /// meaningful mutation to signal WebSocket clients that fresh data is
    /// available.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Read the current state version without modifying it.
    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error from a collaborator.  The ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted when the limit is
    /// reached.
    pub fn push_error(&self, source: &str, message: String) {
        let record = ErrorRecord::new(source, message);

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the dashboard state.
    ///
    /// This is the payload sent via the REST `GET /api/v1/state` endpoint
    /// and the WebSocket push feed.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let config = self.runtime_config.read();

        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),

            asset_ids: config.asset_ids.clone(),
            cities: config.cities.clone(),

            stream: self.stream_status.snapshot(),
            prices: self.price_book.snapshot(),
            market: self.market_caps.snapshot(),
            weather: self.weather.snapshot(),
            news: self.news.snapshot(),
            favorite_cities: self.preferences.recent(),

            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Full dashboard state snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,

    pub asset_ids: Vec<String>,
    pub cities: Vec<String>,

    /// Live price stream: connection state, retry count, surfaced error.
    pub stream: StreamSnapshot,
    /// Asset identifier -> latest price (decimal string).
    pub prices: HashMap<String, String>,
    /// Asset identifier -> market cap / 24h change.
    pub market: HashMap<String, MarketCapEntry>,
    /// City -> current conditions.
    pub weather: HashMap<String, CurrentConditions>,
    /// Latest headlines.
    pub news: Vec<NewsArticle>,
    /// Most recently added favorite cities (capped).
    pub favorite_cities: Vec<String>,

    pub recent_errors: Vec<ErrorRecord>,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn temp_preferences() -> Arc<PreferencesStore> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "skypulse-appstate-{}-{nanos}.json",
            std::process::id()
        ));
        Arc::new(PreferencesStore::open(path))
    }

    fn test_state() -> AppState {
        AppState::new(RuntimeConfig::default(), temp_preferences())
    }

    #[test]
    fn version_starts_at_one_and_increments() {
        let state = test_state();
        assert_eq!(state.current_state_version(), 1);
        state.increment_version();
        state.increment_version();
        assert_eq!(state.current_state_version(), 3);
    }

    #[test]
    fn push_error_caps_ring_buffer() {
        let state = test_state();
        for i in 0..60 {
            state.push_error("test", format!("error {i}"));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        // Oldest entries were evicted.
        assert_eq!(errors[0].message, "error 10");
        assert_eq!(errors.last().unwrap().message, "error 59");
    }

    #[test]
    fn push_error_bumps_version() {
        let state = test_state();
        let before = state.current_state_version();
        state.push_error("test", "boom".to_string());
        assert!(state.current_state_version() > before);
    }

    #[test]
    fn snapshot_reflects_config_and_stores() {
        let state = test_state();
        let snapshot = state.build_snapshot();

        assert_eq!(snapshot.asset_ids, vec!["bitcoin", "ethereum", "litecoin"]);
        assert_eq!(snapshot.cities, vec!["London", "Toronto", "Tokyo"]);
        assert!(snapshot.prices.is_empty());
        assert!(snapshot.news.is_empty());
        assert_eq!(snapshot.stream.retry_count, 0);
        assert!(snapshot.stream.last_error.is_none());
        assert_eq!(snapshot.state_version, state.current_state_version());
    }

    #[test]
    fn snapshot_serialises_to_json() {
        let state = test_state();
        state.push_error("market_cap", "HTTP 500".to_string());
        let snapshot = state.build_snapshot();

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["stream"]["state"], "Disconnected");
        assert_eq!(json["recent_errors"][0]["source"], "market_cap");
    }
}
