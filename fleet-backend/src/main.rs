use fleet_backend::auth::{InMemoryApiKeyStore, parse_api_keys};
use fleet_backend::cache::MemoryCache;
use fleet_backend::health::HealthProbe;
use fleet_backend::places::PlaceFetcher;
use fleet_backend::{AppState, RateLimitConfig, create_app};
use fleet_db::Database;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize tracing for structured logging; RUST_LOG overrides the default level
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting fleet directory server...");

    // Load configuration from environment variables or use defaults
    let config = fleet_backend::config::Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, body_limit={}KB, timeout={}s, cache_ttl={}s, place_api={}",
        config.port,
        config.database_path,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
        config.cache_ttl.as_secs(),
        config.place_api_url
    );
    tracing::info!(
        "Rate limits: player={}/sec (burst {}), general={}/sec (burst {})",
        config.rate_limit_player_per_sec,
        config.rate_limit_player_burst,
        config.rate_limit_general_per_sec,
        config.rate_limit_general_burst
    );

    let api_keys = parse_api_keys(&config.api_keys).expect("API_KEYS is malformed");
    if api_keys.is_empty() {
        tracing::warn!("No API keys configured; every /api request will be rejected");
    }
    let api_keys = InMemoryApiKeyStore::from_entries(api_keys).await;
    tracing::info!("Loaded {} API key(s)", api_keys.len());

    let db = Database::open(&config.database_path)
        .await
        .expect("Failed to open database");

    let places = PlaceFetcher::new(
        config.place_api_url.clone(),
        config.place_fetch_retries,
        config.place_fetch_base_delay,
        config.place_fetch_timeout,
    )
    .expect("Failed to build place API client");
    let health = HealthProbe::new(config.health_probe_timeout)
        .expect("Failed to build health probe client");

    let state = AppState::new(
        db,
        Arc::new(MemoryCache::new()),
        config.cache_ttl,
        places,
        health,
        Arc::new(api_keys),
    );
    let rate_limit = RateLimitConfig {
        player_per_sec: config.rate_limit_player_per_sec,
        player_burst: config.rate_limit_player_burst,
        general_per_sec: config.rate_limit_general_per_sec,
        general_burst: config.rate_limit_general_burst,
    };
    let app = create_app(
        state,
        config.request_body_limit,
        config.request_timeout,
        rate_limit,
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");
    tracing::info!("Server listening on {}", addr);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("Axum server error: {}", e);
    }
}
