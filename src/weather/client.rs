// =============================================================================
// WeatherAPI REST Client — current conditions and hourly forecast
// =============================================================================
//
// weatherapi.com authenticates with an API key passed as a query parameter
// (`WEATHERAPI_KEY` env var).  The key never appears in logs.
// =============================================================================

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Number of hourly temperature points exposed by the forecast detail.
const FORECAST_HOURS: usize = 10;

// =============================================================================
// Dashboard-facing types
// =============================================================================

/// Current conditions for one city.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentConditions {
    pub city: String,
    pub country: String,
    pub temp_c: f64,
    pub condition: String,
    pub icon: String,
    pub humidity: i64,
    pub wind_kph: f64,
    pub pressure_mb: f64,
    pub precip_mm: f64,
}

/// One hourly temperature point.
#[derive(Debug, Clone, Serialize)]
pub struct HourlyTemp {
    pub time: String,
    pub temp_c: f64,
}

/// A weather alert attached to a forecast.
#[derive(Debug, Clone, Serialize)]
pub struct WeatherAlert {
    pub headline: String,
    pub description: String,
}

/// Forecast detail for the weather-details view: current conditions plus the
/// first ten hourly temperatures and any active alerts.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastDetail {
    pub current: CurrentConditions,
    pub hourly: Vec<HourlyTemp>,
    pub alerts: Vec<WeatherAlert>,
}

// =============================================================================
// Wire types (weatherapi.com payload shapes)
// =============================================================================

#[derive(Debug, Deserialize)]
struct ApiLocation {
    name: String,
    country: String,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    text: String,
    #[serde(default)]
    icon: String,
}

#[derive(Debug, Deserialize)]
struct ApiCurrent {
    temp_c: f64,
    condition: ApiCondition,
    #[serde(default)]
    humidity: i64,
    #[serde(default)]
    wind_kph: f64,
    #[serde(default)]
    pressure_mb: f64,
    #[serde(default)]
    precip_mm: f64,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    location: ApiLocation,
    current: ApiCurrent,
}

#[derive(Debug, Deserialize)]
struct ApiHour {
    time: String,
    temp_c: f64,
}

#[derive(Debug, Deserialize)]
struct ApiForecastDay {
    #[serde(default)]
    hour: Vec<ApiHour>,
}

#[derive(Debug, Deserialize)]
struct ApiForecast {
    #[serde(default)]
    forecastday: Vec<ApiForecastDay>,
}

#[derive(Debug, Deserialize)]
struct ApiAlert {
    #[serde(default)]
    headline: String,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Deserialize, Default)]
struct ApiAlerts {
    #[serde(default)]
    alert: Vec<ApiAlert>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    location: ApiLocation,
    current: ApiCurrent,
    #[serde(default)]
    forecast: Option<ApiForecast>,
    #[serde(default)]
    alerts: Option<ApiAlerts>,
}

// =============================================================================
// Conversions
// =============================================================================

fn conditions_from(location: ApiLocation, current: ApiCurrent) -> CurrentConditions {
    CurrentConditions {
        city: location.name,
        country: location.country,
        temp_c: current.temp_c,
        condition: current.condition.text,
        icon: current.condition.icon,
        humidity: current.humidity,
        wind_kph: current.wind_kph,
        pressure_mb: current.pressure_mb,
        precip_mm: current.precip_mm,
    }
}

fn detail_from(resp: ForecastResponse) -> ForecastDetail {
    let hourly = resp
        .forecast
        .unwrap_or(ApiForecast {
            forecastday: Vec::new(),
        })
        .forecastday
        .into_iter()
        .next()
        .map(|day| {
            day.hour
                .into_iter()
                .take(FORECAST_HOURS)
                .map(|h| HourlyTemp {
                    time: h.time,
                    temp_c: h.temp_c,
                })
                .collect()
        })
        .unwrap_or_default();

    let alerts = resp
        .alerts
        .unwrap_or_default()
        .alert
        .into_iter()
        .map(|a| WeatherAlert {
            headline: a.headline,
            description: a.desc,
        })
        .collect();

    ForecastDetail {
        current: conditions_from(resp.location, resp.current),
        hourly,
        alerts,
    }
}

// =============================================================================
// Client
// =============================================================================

/// Typed wrapper over the weatherapi.com endpoints.
#[derive(Clone)]
pub struct WeatherClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl WeatherClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// GET /v1/current.json — current conditions for `city`.
    #[instrument(skip(self), name = "weather::current")]
    pub async fn current(&self, city: &str) -> Result<CurrentConditions> {
        let url = format!("{}/current.json", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", city)])
            .send()
            .await
            .with_context(|| format!("current weather request for '{city}' failed"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("current weather for '{city}' unavailable (HTTP {status})");
        }

        let body: CurrentResponse = resp
            .json()
            .await
            .with_context(|| format!("failed to decode current weather for '{city}'"))?;

        Ok(conditions_from(body.location, body.current))
    }

    /// GET /v1/forecast.json — current conditions plus the next hours and any
    /// active alerts for `city`.
    #[instrument(skip(self), name = "weather::forecast")]
    pub async fn forecast(&self, city: &str) -> Result<ForecastDetail> {
        let url = format!("{}/forecast.json", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", city),
                ("days", "1"),
                ("alerts", "yes"),
            ])
            .send()
            .await
            .with_context(|| format!("forecast request for '{city}' failed"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("forecast for '{city}' unavailable (HTTP {status})");
        }

        let body: ForecastResponse = resp
            .json()
            .await
            .with_context(|| format!("failed to decode forecast for '{city}'"))?;

        Ok(detail_from(body))
    }
}
