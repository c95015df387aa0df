// =============================================================================
// Market Cap Poller — periodic REST collaborator for market caps / 24h change
// =============================================================================
//
// Independent of the price stream: it polls the CoinCap asset listing on a
// fixed timer, filters it down to the subscribed identifiers, and republishes
// the result.  A fetch failure is recorded and skipped; it never touches the
// stream manager's state or retry counter.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::coincap::{AssetRecord, CoinCapClient};

/// Market figures for one subscribed asset, refreshed by the poller.
///
/// Values stay as the API's decimal strings; absent figures stay `None`
/// (the rendering layer shows "N/A").
#[derive(Debug, Clone, Serialize)]
pub struct MarketCapEntry {
    pub market_cap_usd: Option<String>,
    pub change_percent_24h: Option<String>,
}

/// Shared store of the latest per-asset market figures.
pub struct MarketCapStore {
    entries: RwLock<HashMap<String, MarketCapEntry>>,
}

impl MarketCapStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the whole store with a fresh poll result.
    pub fn replace(&self, entries: HashMap<String, MarketCapEntry>) {
        *self.entries.write() = entries;
    }

    pub fn snapshot(&self) -> HashMap<String, MarketCapEntry> {
        self.entries.read().clone()
    }
}

impl Default for MarketCapStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter the full asset listing down to the subscribed identifiers.
pub fn filter_market_caps(
    records: &[AssetRecord],
    asset_ids: &[String],
) -> HashMap<String, MarketCapEntry> {
    let mut filtered = HashMap::with_capacity(asset_ids.len());
    for record in records {
        if asset_ids.iter().any(|id| id == &record.id) {
            filtered.insert(
                record.id.clone(),
                MarketCapEntry {
                    market_cap_usd: record.market_cap_usd.clone(),
                    change_percent_24h: record.change_percent24_hr.clone(),
                },
            );
        }
    }
    filtered
}

/// Poll loop: refresh the market cap store every `market_refresh_secs`.
///
/// The first tick fires immediately so the dashboard has figures at startup.
/// Runs until the task is aborted at shutdown.
pub async fn run_market_cap_loop(state: Arc<AppState>, client: CoinCapClient) {
    let refresh_secs = state.runtime_config.read().market_refresh_secs;
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(refresh_secs));

    loop {
        interval.tick().await;

        let asset_ids = state.runtime_config.read().asset_ids.clone();
        match client.get_assets().await {
            Ok(records) => {
                let filtered = filter_market_caps(&records, &asset_ids);
                debug!(count = filtered.len(), "market caps refreshed");
                state.market_caps.replace(filtered);
                state.increment_version();
            }
            Err(e) => {
                warn!(error = %e, "market data fetch failed");
                state.push_error("market_cap", format!("{e:#}"));
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, cap: Option<&str>, change: Option<&str>) -> AssetRecord {
        AssetRecord {
            id: id.to_string(),
            symbol: id.to_uppercase(),
            name: id.to_string(),
            price_usd: "1.0".to_string(),
            market_cap_usd: cap.map(str::to_string),
            change_percent24_hr: change.map(str::to_string),
            supply: None,
            volume_usd24_hr: None,
        }
    }

    #[test]
    fn filter_keeps_only_subscribed_ids() {
        let records = vec![
            record("bitcoin", Some("980000000000"), Some("1.5")),
            record("ethereum", Some("360000000000"), Some("-0.7")),
            record("dogecoin", Some("12000000000"), Some("9.9")),
        ];
        let ids = vec!["bitcoin".to_string(), "ethereum".to_string()];

        let filtered = filter_market_caps(&records, &ids);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.contains_key("bitcoin"));
        assert!(filtered.contains_key("ethereum"));
        assert!(!filtered.contains_key("dogecoin"));
        assert_eq!(
            filtered["bitcoin"].market_cap_usd.as_deref(),
            Some("980000000000")
        );
        assert_eq!(filtered["ethereum"].change_percent_24h.as_deref(), Some("-0.7"));
    }

    #[test]
    fn filter_tolerates_missing_figures() {
        let records = vec![record("litecoin", None, None)];
        let ids = vec!["litecoin".to_string()];

        let filtered = filter_market_caps(&records, &ids);
        assert!(filtered["litecoin"].market_cap_usd.is_none());
        assert!(filtered["litecoin"].change_percent_24h.is_none());
    }

    #[test]
    fn filter_with_no_matches_is_empty() {
        let records = vec![record("bitcoin", Some("1"), Some("1"))];
        let ids = vec!["cardano".to_string()];
        assert!(filter_market_caps(&records, &ids).is_empty());
    }

    #[test]
    fn store_replace_swaps_contents() {
        let store = MarketCapStore::new();
        let mut first = HashMap::new();
        first.insert(
            "bitcoin".to_string(),
            MarketCapEntry {
                market_cap_usd: Some("1".to_string()),
                change_percent_24h: None,
            },
        );
        store.replace(first);
        assert_eq!(store.snapshot().len(), 1);

        // A fresh poll result fully replaces the previous one.
        store.replace(HashMap::new());
        assert!(store.snapshot().is_empty());
    }
}
