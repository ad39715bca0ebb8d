pub mod auth;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod health;
pub mod helpers;
pub mod listing;
pub mod places;
mod routes;
pub mod sessions;
pub mod validation;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use auth::ApiKeyStore;
use cache::Cache;
use directory::DirectoryEngine;
use health::HealthProbe;
use listing::ListingEngine;
use places::PlaceFetcher;
use sessions::SessionEngine;

pub struct AppState {
    pub directory: DirectoryEngine,
    pub sessions: SessionEngine,
    pub listing: ListingEngine,
    pub places: PlaceFetcher,
    pub health: HealthProbe,
    pub api_keys: Arc<dyn ApiKeyStore>,
}

impl AppState {
    /// Wire the engines over one store and one cache.
    pub fn new(
        db: fleet_db::Database,
        cache: Arc<dyn Cache>,
        cache_ttl: Duration,
        places: PlaceFetcher,
        health: HealthProbe,
        api_keys: Arc<dyn ApiKeyStore>,
    ) -> Self {
        let directory = DirectoryEngine::new(db, cache, cache_ttl);
        Self {
            sessions: SessionEngine::new(directory.clone()),
            listing: ListingEngine::new(directory.clone()),
            directory,
            places,
            health,
            api_keys,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for game-server endpoints (heartbeat, join, leave)
    pub player_per_sec: u64,
    /// Burst size for game-server endpoints
    pub player_burst: u32,
    /// Requests per second for general endpoints
    pub general_per_sec: u64,
    /// Burst size for general endpoints
    pub general_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            player_per_sec: 50,
            player_burst: 100,
            general_per_sec: 10,
            general_burst: 20,
        }
    }
}

/// Governor replenishes one request per interval; convert a per-second rate.
fn replenish_interval_ms(per_sec: u64) -> u64 {
    (1000 / per_sec.max(1)).max(1)
}

/// Create the application router with the given state and configuration
pub fn create_app(
    state: AppState,
    request_body_limit: usize,
    request_timeout: Duration,
    rate_limit: RateLimitConfig,
) -> Router {
    let state = Arc::new(state);

    // Lenient rate limit for game-server reports - every server heartbeats continuously
    let player_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_interval_ms(rate_limit.player_per_sec))
        .burst_size(rate_limit.player_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("replenish interval and burst are at least 1");

    // General rate limit for other endpoints
    let general_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_interval_ms(rate_limit.general_per_sec))
        .burst_size(rate_limit.general_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("replenish interval and burst are at least 1");

    // Routes with lenient rate limiting (high traffic from game servers)
    let player_routes = Router::new()
        .route("/api/servers/{id}/heartbeat", post(routes::heartbeat))
        .route("/api/servers/{id}/players/join", post(routes::join))
        .route("/api/servers/{id}/players/leave", post(routes::leave))
        .layer(GovernorLayer::new(player_governor));

    // Routes with general rate limiting
    let general_routes = Router::new()
        .route(
            "/api/servers",
            get(routes::list_servers).post(routes::create_server),
        )
        .route(
            "/api/servers/status/{status}",
            get(routes::list_servers_by_status),
        )
        .route(
            "/api/servers/{id}",
            get(routes::get_server)
                .put(routes::update_server)
                .delete(routes::delete_server),
        )
        .route(
            "/api/servers/{id}/config",
            get(routes::get_configuration).put(routes::update_configuration),
        )
        .route("/api/servers/{id}/health", get(routes::server_health))
        .route("/api/servers/{id}/players", get(routes::active_sessions))
        .route("/api/server-list", get(routes::server_list))
        .route("/api/places/{place_id}", get(routes::place_info))
        .route("/api/players", post(routes::create_player))
        .route(
            "/api/players/{id}",
            get(routes::get_player)
                .put(routes::update_player)
                .delete(routes::delete_player),
        )
        .layer(GovernorLayer::new(general_governor));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(player_routes)
        .merge(general_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(request_body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
