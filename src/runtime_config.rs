// =============================================================================
// Runtime Configuration — Hot-reloadable dashboard settings with atomic save
// =============================================================================
//
// Central configuration hub for the SkyPulse backend.  Asset lists, city
// lists, poll intervals, and collaborator base URLs all live here so that a
// deployment can be retargeted without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_asset_ids() -> Vec<String> {
    vec![
        "bitcoin".to_string(),
        "ethereum".to_string(),
        "litecoin".to_string(),
    ]
}

fn default_cities() -> Vec<String> {
    vec![
        "London".to_string(),
        "Toronto".to_string(),
        "Tokyo".to_string(),
    ]
}

fn default_stream_url() -> String {
    "wss://ws.coincap.io/prices".to_string()
}

fn default_coincap_base_url() -> String {
    "https://api.coincap.io/v2".to_string()
}

fn default_weather_base_url() -> String {
    "https://api.weatherapi.com/v1".to_string()
}

fn default_news_base_url() -> String {
    "https://newsdata.io/api/1".to_string()
}

fn default_market_refresh_secs() -> u64 {
    30
}

fn default_weather_refresh_secs() -> u64 {
    300
}

fn default_news_refresh_secs() -> u64 {
    300
}

fn default_news_query() -> String {
    "cryptocurrency".to_string()
}

fn default_news_limit() -> usize {
    5
}

fn default_favorites_path() -> String {
    "favorites.json".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the SkyPulse backend.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Subscriptions -------------------------------------------------------

    /// Canonical lowercase asset identifiers the price stream subscribes to.
    #[serde(default = "default_asset_ids")]
    pub asset_ids: Vec<String>,

    /// Cities refreshed by the weather poller.
    #[serde(default = "default_cities")]
    pub cities: Vec<String>,

    // --- Collaborator endpoints ---------------------------------------------

    /// WebSocket price feed base URL (asset list is appended as a query).
    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    /// CoinCap REST base URL.
    #[serde(default = "default_coincap_base_url")]
    pub coincap_base_url: String,

    /// WeatherAPI REST base URL.
    #[serde(default = "default_weather_base_url")]
    pub weather_base_url: String,

    /// newsdata.io REST base URL.
    #[serde(default = "default_news_base_url")]
    pub news_base_url: String,

    // --- Poll intervals ------------------------------------------------------

    /// Market cap / 24h change refresh interval in seconds.
    #[serde(default = "default_market_refresh_secs")]
    pub market_refresh_secs: u64,

    /// Current-weather refresh interval in seconds.
    #[serde(default = "default_weather_refresh_secs")]
    pub weather_refresh_secs: u64,

    /// News headline refresh interval in seconds.
    #[serde(default = "default_news_refresh_secs")]
    pub news_refresh_secs: u64,

    // --- News ----------------------------------------------------------------

    /// Search query sent to the news API.
    #[serde(default = "default_news_query")]
    pub news_query: String,

    /// Maximum number of headlines retained.
    #[serde(default = "default_news_limit")]
    pub news_limit: usize,

    // --- Persistence ---------------------------------------------------------

    /// Path of the favorite-cities JSON file.
    #[serde(default = "default_favorites_path")]
    pub favorites_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            asset_ids: default_asset_ids(),
            cities: default_cities(),
            stream_url: default_stream_url(),
            coincap_base_url: default_coincap_base_url(),
            weather_base_url: default_weather_base_url(),
            news_base_url: default_news_base_url(),
            market_refresh_secs: default_market_refresh_secs(),
            weather_refresh_secs: default_weather_refresh_secs(),
            news_refresh_secs: default_news_refresh_secs(),
            news_query: default_news_query(),
            news_limit: default_news_limit(),
            favorites_path: default_favorites_path(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            asset_ids = ?config.asset_ids,
            cities = ?config.cities,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.asset_ids, vec!["bitcoin", "ethereum", "litecoin"]);
        assert_eq!(cfg.cities, vec!["London", "Toronto", "Tokyo"]);
        assert_eq!(cfg.stream_url, "wss://ws.coincap.io/prices");
        assert_eq!(cfg.market_refresh_secs, 30);
        assert_eq!(cfg.news_limit, 5);
        assert_eq!(cfg.news_query, "cryptocurrency");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.asset_ids.len(), 3);
        assert_eq!(cfg.market_refresh_secs, 30);
        assert_eq!(cfg.weather_refresh_secs, 300);
        assert_eq!(cfg.favorites_path, "favorites.json");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "asset_ids": ["dogecoin"], "market_refresh_secs": 10 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.asset_ids, vec!["dogecoin"]);
        assert_eq!(cfg.market_refresh_secs, 10);
        assert_eq!(cfg.cities, vec!["London", "Toronto", "Tokyo"]);
        assert_eq!(cfg.news_limit, 5);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.asset_ids, cfg2.asset_ids);
        assert_eq!(cfg.cities, cfg2.cities);
        assert_eq!(cfg.market_refresh_secs, cfg2.market_refresh_secs);
        assert_eq!(cfg.news_query, cfg2.news_query);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "skypulse-config-{}-{nanos}.json",
            std::process::id()
        ));

        let mut cfg = RuntimeConfig::default();
        cfg.asset_ids = vec!["solana".to_string()];
        cfg.news_limit = 9;
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.asset_ids, vec!["solana"]);
        assert_eq!(loaded.news_limit, 9);

        let _ = std::fs::remove_file(path);
    }
}
