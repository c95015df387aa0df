// =============================================================================
// CoinCap REST API Client — market caps, asset detail, price history
// =============================================================================
//
// CoinCap's public v2 API needs no authentication. All numeric fields arrive
// as decimal strings; they are kept as strings and parsed only where a
// calculation actually needs them.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Number of days of daily candles fetched for the history endpoint.
const HISTORY_DAYS: i64 = 30;

/// One asset row from `GET /v2/assets` or `GET /v2/assets/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub price_usd: String,
    #[serde(default)]
    pub market_cap_usd: Option<String>,
    #[serde(default)]
    pub change_percent24_hr: Option<String>,
    #[serde(default)]
    pub supply: Option<String>,
    #[serde(default)]
    pub volume_usd24_hr: Option<String>,
}

/// One daily price point from `GET /v2/assets/{id}/history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub price_usd: String,
    /// Milliseconds since the UNIX epoch.
    pub time: i64,
}

#[derive(Deserialize)]
struct AssetsResponse {
    data: Vec<AssetRecord>,
}

#[derive(Deserialize)]
struct AssetResponse {
    data: AssetRecord,
}

#[derive(Deserialize)]
struct HistoryResponse {
    data: Vec<HistoryPoint>,
}

/// Thin typed wrapper over the CoinCap REST endpoints.
#[derive(Clone)]
pub struct CoinCapClient {
    base_url: String,
    client: reqwest::Client,
}

impl CoinCapClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// GET /v2/assets — the full market listing.
    #[instrument(skip(self), name = "coincap::get_assets")]
    pub async fn get_assets(&self) -> Result<Vec<AssetRecord>> {
        let url = format!("{}/assets", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /assets request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("GET /assets returned {status}");
        }

        let body: AssetsResponse = resp
            .json()
            .await
            .context("failed to decode /assets response")?;

        debug!(count = body.data.len(), "asset listing fetched");
        Ok(body.data)
    }

    /// GET /v2/assets/{id} — extended metrics for one asset.
    #[instrument(skip(self), name = "coincap::get_asset")]
    pub async fn get_asset(&self, asset_id: &str) -> Result<AssetRecord> {
        let url = format!("{}/assets/{}", self.base_url, asset_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET /assets/{asset_id} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("asset '{asset_id}' not found (HTTP {status})");
        }

        let body: AssetResponse = resp
            .json()
            .await
            .with_context(|| format!("failed to decode /assets/{asset_id} response"))?;

        Ok(body.data)
    }

    /// GET /v2/assets/{id}/history — daily prices for the last 30 days.
    #[instrument(skip(self), name = "coincap::get_history")]
    pub async fn get_history(&self, asset_id: &str) -> Result<Vec<HistoryPoint>> {
        let end = Utc::now().timestamp_millis();
        let start = end - HISTORY_DAYS * 24 * 60 * 60 * 1000;

        let url = format!(
            "{}/assets/{}/history?interval=d1&start={}&end={}",
            self.base_url, asset_id, start, end
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET /assets/{asset_id}/history request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("history for '{asset_id}' unavailable (HTTP {status})");
        }

        let body: HistoryResponse = resp
            .json()
            .await
            .with_context(|| format!("failed to decode /assets/{asset_id}/history response"))?;

        Ok(body.data)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialise_asset_listing() {
        let json = r#"{
            "data": [
                {
                    "id": "bitcoin",
                    "symbol": "BTC",
                    "name": "Bitcoin",
                    "priceUsd": "50000.1234",
                    "marketCapUsd": "980000000000.55",
                    "changePercent24Hr": "-1.2345",
                    "supply": "19600000.0",
                    "volumeUsd24Hr": "31000000000.0"
                },
                {
                    "id": "ethereum",
                    "symbol": "ETH",
                    "name": "Ethereum",
                    "priceUsd": "3000.5"
                }
            ]
        }"#;
        let parsed: AssetsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].id, "bitcoin");
        assert_eq!(parsed.data[0].price_usd, "50000.1234");
        assert_eq!(
            parsed.data[0].change_percent24_hr.as_deref(),
            Some("-1.2345")
        );
        // Optional fields may be absent entirely.
        assert!(parsed.data[1].market_cap_usd.is_none());
        assert!(parsed.data[1].supply.is_none());
    }

    #[test]
    fn deserialise_history() {
        let json = r#"{
            "data": [
                { "priceUsd": "48000.0", "time": 1700000000000 },
                { "priceUsd": "49000.0", "time": 1700086400000 }
            ]
        }"#;
        let parsed: HistoryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].price_usd, "48000.0");
        assert_eq!(parsed.data[1].time, 1700086400000);
    }
}
