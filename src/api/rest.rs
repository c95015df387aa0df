// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`.  The dashboard is single-user with no
// authentication (by design), so every route is public.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::coincap::CoinCapClient;
use crate::market_data::PriceStreamManager;
use crate::weather::WeatherClient;

// =============================================================================
// Shared handler context
// =============================================================================

/// Everything the API handlers need: the shared state plus the collaborator
/// clients used by the on-demand detail endpoints, and the stream manager
/// handle for manual restarts.
#[derive(Clone)]
pub struct ApiContext {
    pub state: Arc<AppState>,
    pub stream: Arc<PriceStreamManager>,
    pub coincap: CoinCapClient,
    pub weather: WeatherClient,
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared context.
pub fn router(ctx: ApiContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Status ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        // ── Live market data ────────────────────────────────────────
        .route("/api/v1/prices", get(prices))
        .route("/api/v1/market", get(market))
        .route("/api/v1/crypto/:id", get(crypto_detail))
        .route("/api/v1/stream/restart", post(stream_restart))
        // ── Weather ─────────────────────────────────────────────────
        .route("/api/v1/weather", get(weather_all))
        .route("/api/v1/weather/:city", get(weather_detail))
        // ── News ────────────────────────────────────────────────────
        .route("/api/v1/news", get(news))
        // ── Favorites ───────────────────────────────────────────────
        .route("/api/v1/favorites", get(favorites).post(add_favorite))
        .route("/api/v1/favorites/:city", delete(remove_favorite))
        // ── WebSocket push feed ─────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(ctx)
}

// =============================================================================
// Status
// =============================================================================

async fn health(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "state_version": ctx.state.current_state_version(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

async fn full_state(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.build_snapshot())
}

// =============================================================================
// Live market data
// =============================================================================

async fn prices(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "prices": ctx.state.price_book.snapshot(),
        "stream": ctx.state.stream_status.snapshot(),
    }))
}

async fn market(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.market_caps.snapshot())
}

/// On-demand asset lookup: extended metrics plus the last 30 days of daily
/// prices.  The query is normalised the way the dashboard search box expects
/// ("Bitcoin Cash" -> "bitcoin-cash").
async fn crypto_detail(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let asset_id = normalize_asset_id(&id);
    if asset_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "empty asset identifier" })),
        ));
    }

    let asset = ctx.coincap.get_asset(&asset_id).await.map_err(|e| {
        warn!(asset_id = %asset_id, error = %e, "asset lookup failed");
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("{e:#}") })),
        )
    })?;

    // History is best-effort: the detail card is still useful without it.
    let history = match ctx.coincap.get_history(&asset_id).await {
        Ok(points) => points,
        Err(e) => {
            warn!(asset_id = %asset_id, error = %e, "history lookup failed");
            Vec::new()
        }
    };

    Ok(Json(serde_json::json!({
        "asset": asset,
        "history": history,
    })))
}

/// Manual recovery after terminal stream failure ("manual refresh").
async fn stream_restart(State(ctx): State<ApiContext>) -> impl IntoResponse {
    info!("price stream restart requested via API");
    ctx.stream.restart().await;
    ctx.state.increment_version();

    Json(serde_json::json!({
        "status": "restarting",
        "stream": ctx.state.stream_status.snapshot(),
    }))
}

fn normalize_asset_id(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

// =============================================================================
// Weather
// =============================================================================

async fn weather_all(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.weather.snapshot())
}

async fn weather_detail(
    State(ctx): State<ApiContext>,
    Path(city): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    match ctx.weather.forecast(&city).await {
        Ok(detail) => Ok(Json(detail)),
        Err(e) => {
            warn!(city = %city, error = %e, "forecast lookup failed");
            Err((
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("{e:#}") })),
            ))
        }
    }
}

// =============================================================================
// News
// =============================================================================

async fn news(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.news.snapshot())
}

// =============================================================================
// Favorites
// =============================================================================

async fn favorites(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "favorite_cities": ctx.state.preferences.all(),
        "recent": ctx.state.preferences.recent(),
    }))
}

#[derive(Deserialize)]
struct FavoriteRequest {
    city: String,
}

async fn add_favorite(
    State(ctx): State<ApiContext>,
    Json(req): Json<FavoriteRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let city = req.city.trim();
    if city.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "city must not be empty" })),
        ));
    }

    let added = ctx.state.preferences.add(city).map_err(internal_error)?;
    if added {
        info!(city = %city, "favorite city added");
        ctx.state.increment_version();
    }

    Ok(Json(serde_json::json!({
        "added": added,
        "favorite_cities": ctx.state.preferences.all(),
    })))
}

async fn remove_favorite(
    State(ctx): State<ApiContext>,
    Path(city): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let removed = ctx
        .state
        .preferences
        .remove(city.trim())
        .map_err(internal_error)?;
    if removed {
        info!(city = %city, "favorite city removed");
        ctx.state.increment_version();
    }

    Ok(Json(serde_json::json!({
        "removed": removed,
        "favorite_cities": ctx.state.preferences.all(),
    })))
}

fn internal_error(e: anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    warn!(error = %e, "favorites persistence failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": format!("{e:#}") })),
    )
}
