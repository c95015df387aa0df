// =============================================================================
// SkyPulse Dashboard Backend — Main Entry Point
// =============================================================================
//
// Wires the live price stream, the REST collaborators (market caps, weather,
// news), the preferences store, and the dashboard API together.  Every
// collaborator is independent: a failing one logs and surfaces its error
// while the rest keep running.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod coincap;
mod market_data;
mod news;
mod preferences;
mod runtime_config;
mod types;
mod weather;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::app_state::AppState;
use crate::coincap::CoinCapClient;
use crate::market_data::market_cap::run_market_cap_loop;
use crate::market_data::PriceStreamManager;
use crate::news::{run_news_loop, NewsClient};
use crate::preferences::PreferencesStore;
use crate::runtime_config::RuntimeConfig;
use crate::weather::{run_weather_loop, WeatherClient};

/// Default config file next to the binary.
const CONFIG_PATH: &str = "skypulse_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        SkyPulse Dashboard Backend — Starting Up          ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override subscriptions from env if available.
    if let Ok(assets) = std::env::var("SKYPULSE_ASSETS") {
        config.asset_ids = assets
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(cities) = std::env::var("SKYPULSE_CITIES") {
        config.cities = cities
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    info!(asset_ids = ?config.asset_ids, cities = ?config.cities, "subscriptions configured");

    // ── 2. Build shared state ────────────────────────────────────────────
    let preferences = Arc::new(PreferencesStore::open(&config.favorites_path));
    let state = Arc::new(AppState::new(config, preferences));

    // ── 3. Build collaborator clients ────────────────────────────────────
    let (stream_url, asset_ids, coincap_base, weather_base, news_base) = {
        let config = state.runtime_config.read();
        (
            config.stream_url.clone(),
            config.asset_ids.clone(),
            config.coincap_base_url.clone(),
            config.weather_base_url.clone(),
            config.news_base_url.clone(),
        )
    };

    let coincap = CoinCapClient::new(&coincap_base);

    let weather_key = std::env::var("WEATHERAPI_KEY").unwrap_or_default();
    if weather_key.is_empty() {
        warn!("WEATHERAPI_KEY is not set — weather lookups will fail");
    }
    let weather_client = WeatherClient::new(&weather_base, weather_key);

    let news_key = std::env::var("NEWSDATA_KEY").unwrap_or_default();
    if news_key.is_empty() {
        warn!("NEWSDATA_KEY is not set — news lookups will fail");
    }
    let news_client = NewsClient::new(&news_base, news_key);

    // ── 4. Start the live price stream ───────────────────────────────────
    let stream = Arc::new(PriceStreamManager::new(
        &stream_url,
        &asset_ids,
        state.price_book.clone(),
        state.stream_status.clone(),
        state.state_version.clone(),
    ));
    stream.start();

    // ── 5. Spawn the REST poll loops ─────────────────────────────────────
    let market_task = tokio::spawn(run_market_cap_loop(state.clone(), coincap.clone()));
    let weather_task = tokio::spawn(run_weather_loop(state.clone(), weather_client.clone()));
    let news_task = tokio::spawn(run_news_loop(state.clone(), news_client.clone()));

    info!("collaborator poll loops launched");

    // ── 6. Start the API server ──────────────────────────────────────────
    let ctx = ApiContext {
        state: state.clone(),
        stream: stream.clone(),
        coincap,
        weather: weather_client,
    };
    let bind_addr =
        std::env::var("SKYPULSE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());

    let server_task = tokio::spawn(async move {
        let app = api::router(ctx);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "API server listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "API server failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind API server"),
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    // Deterministic teardown: close the stream (cancelling any pending
    // reconnect), then drop the periodic collaborators and the server.
    stream.stop().await;
    market_task.abort();
    weather_task.abort();
    news_task.abort();
    server_task.abort();

    info!("SkyPulse shut down complete.");
    Ok(())
}
