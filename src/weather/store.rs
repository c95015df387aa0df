// =============================================================================
// Weather Store & Poll Loop
// =============================================================================
//
// Refreshes current conditions for the configured city list on a fixed timer.
// Each city is fetched independently so one failing lookup never blanks the
// others; failures go to the error ring and the stale entry is kept.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::weather::client::{CurrentConditions, WeatherClient};

/// Latest current conditions per configured city.
pub struct WeatherStore {
    cities: RwLock<HashMap<String, CurrentConditions>>,
}

impl WeatherStore {
    pub fn new() -> Self {
        Self {
            cities: RwLock::new(HashMap::new()),
        }
    }

    pub fn update(&self, city: impl Into<String>, conditions: CurrentConditions) {
        self.cities.write().insert(city.into(), conditions);
    }

    pub fn snapshot(&self) -> HashMap<String, CurrentConditions> {
        self.cities.read().clone()
    }
}

impl Default for WeatherStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll loop: refresh every configured city every `weather_refresh_secs`.
///
/// The first tick fires immediately.  Runs until aborted at shutdown.
pub async fn run_weather_loop(state: Arc<AppState>, client: WeatherClient) {
    let refresh_secs = state.runtime_config.read().weather_refresh_secs;
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(refresh_secs));

    loop {
        interval.tick().await;

        let cities = state.runtime_config.read().cities.clone();
        let mut updated = 0usize;

        for city in &cities {
            match client.current(city).await {
                Ok(conditions) => {
                    state.weather.update(city.clone(), conditions);
                    updated += 1;
                }
                Err(e) => {
                    warn!(city = %city, error = %e, "weather fetch failed");
                    state.push_error("weather", format!("{city}: {e:#}"));
                }
            }
        }

        if updated > 0 {
            debug!(updated, total = cities.len(), "weather refreshed");
            state.increment_version();
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn conditions(city: &str, temp_c: f64) -> CurrentConditions {
        CurrentConditions {
            city: city.to_string(),
            country: "Testland".to_string(),
            temp_c,
            condition: "Clear".to_string(),
            icon: String::new(),
            humidity: 50,
            wind_kph: 10.0,
            pressure_mb: 1013.0,
            precip_mm: 0.0,
        }
    }

    #[test]
    fn update_inserts_and_overwrites() {
        let store = WeatherStore::new();
        store.update("London", conditions("London", 12.0));
        store.update("Tokyo", conditions("Tokyo", 28.0));
        assert_eq!(store.snapshot().len(), 2);

        store.update("London", conditions("London", 14.0));
        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        assert!((snap["London"].temp_c - 14.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_is_a_clone() {
        let store = WeatherStore::new();
        store.update("Toronto", conditions("Toronto", -4.0));

        let mut snap = store.snapshot();
        snap.remove("Toronto");
        // Mutating the clone must not affect the store.
        assert_eq!(store.snapshot().len(), 1);
    }
}
