use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use fleet_backend::auth::{InMemoryApiKeyStore, parse_api_keys};
use fleet_backend::cache::{Cache, CacheError, MemoryCache};
use fleet_backend::health::HealthProbe;
use fleet_backend::places::PlaceFetcher;
use fleet_backend::{AppState, RateLimitConfig, create_app};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ADMIN_KEY: &str = "admin-key";

/// A cache backend that is always down
struct UnreachableCache;

#[async_trait]
impl Cache for UnreachableCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

/// Helper to create an app over an in-memory database and the given cache
async fn create_test_app(cache: Arc<dyn Cache>) -> axum::Router {
    let db = fleet_db::Database::open_in_memory()
        .await
        .expect("Failed to create in-memory database");
    let keys = parse_api_keys(&format!("admin:{ADMIN_KEY}=server.manage,server.status.read"))
        .unwrap();

    let state = AppState::new(
        db,
        cache,
        Duration::from_secs(300),
        PlaceFetcher::new(
            "http://127.0.0.1:9",
            0,
            Duration::from_millis(1),
            Duration::from_secs(1),
        )
        .unwrap(),
        HealthProbe::new(Duration::from_secs(1)).unwrap(),
        Arc::new(InMemoryApiKeyStore::from_entries(keys).await),
    );

    let rate_limit = RateLimitConfig {
        player_per_sec: 1000,
        player_burst: 1000,
        general_per_sec: 1000,
        general_burst: 1000,
    };
    create_app(state, 1024 * 1024, Duration::from_secs(30), rate_limit)
}

/// Helper to send a request and get response
async fn send_request(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("X-Forwarded-For", "203.0.113.7");

    if let Some(token) = auth_token {
        request_builder = request_builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = if let Some(json_body) = body {
        request_builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&json_body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes();

    let json = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

fn arena() -> Value {
    json!({
        "name": "Arena-1",
        "place_id": 920587237,
        "game_mode": "tdm",
        "region": "NA",
        "max_players": 10
    })
}

#[tokio::test]
async fn test_error_response_format_for_unknown_server() {
    // GIVEN: An empty directory
    let app = create_test_app(Arc::new(MemoryCache::new())).await;

    // WHEN: Requesting a server that does not exist
    let (status, body) =
        send_request(app, "GET", "/api/servers/srv-nope", None, Some(ADMIN_KEY)).await;

    // THEN: Should return 404 with JSON error
    assert_eq!(status, StatusCode::NOT_FOUND);

    // AND: Error response should have proper structure
    assert!(body.get("error").is_some(), "Response should have 'error' field");
    assert!(body.get("details").is_none(), "No details for a plain 404");
    let error_msg = body["error"].as_str().unwrap();
    assert!(error_msg.contains("not found"), "Error message should be user-friendly");
}

#[tokio::test]
async fn test_error_response_for_invalid_api_key() {
    // GIVEN: A running application
    let app = create_test_app(Arc::new(MemoryCache::new())).await;

    // WHEN: Making request with an invalid API key
    let (status, body) = send_request(
        app,
        "POST",
        "/api/servers/srv-1/heartbeat",
        None,
        Some("fleet-sk-invalid12345678901234567890"),
    )
    .await;

    // THEN: Should return 401 with JSON error
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // AND: Error response should be helpful
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("Invalid") || error_msg.contains("API key"),
        "Error message: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_error_response_for_validation_failure() {
    // GIVEN: A running application
    let app = create_test_app(Arc::new(MemoryCache::new())).await;

    // WHEN: Creating a server with a 300 character name
    let mut request = arena();
    request["name"] = json!("a".repeat(300));
    let (status, body) =
        send_request(app, "POST", "/api/servers", Some(request), Some(ADMIN_KEY)).await;

    // THEN: Should return 400 with validation error
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // AND: Error message should explain the problem
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("too long") && error_msg.contains("255"),
        "Error should mention length limit: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_validation_error_has_details() {
    // GIVEN: A running application
    let app = create_test_app(Arc::new(MemoryCache::new())).await;

    // WHEN: Registering a player name with invalid characters
    let (status, body) = send_request(
        app,
        "POST",
        "/api/players",
        Some(json!({ "username": "Player-123" })),
        Some(ADMIN_KEY),
    )
    .await;

    // THEN: Error should be specific
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("invalid") || error_msg.contains("character"),
        "Should explain what's invalid: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_error_response_doesnt_expose_internals() {
    // GIVEN: An existing server
    let app = create_test_app(Arc::new(MemoryCache::new())).await;
    let (_, created) =
        send_request(app.clone(), "POST", "/api/servers", Some(arena()), Some(ADMIN_KEY)).await;
    let id = created["server_id"].as_str().unwrap();

    // WHEN: Sending an out-of-range capacity
    let (status, body) = send_request(
        app,
        "PUT",
        &format!("/api/servers/{id}"),
        Some(json!({ "max_players": 5000 })),
        Some(ADMIN_KEY),
    )
    .await;

    // THEN: Error should not expose internal details
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let error_msg = body["error"].as_str().unwrap();

    // Should NOT contain internal error details
    assert!(!error_msg.contains("SQL"), "Should not expose SQL details");
    assert!(
        !error_msg.contains("rusqlite"),
        "Should not expose library names"
    );
    assert!(
        !error_msg.contains("CHECK constraint"),
        "Should not expose schema details"
    );

    // Should contain user-friendly message
    assert!(
        error_msg.contains("between 1 and 1000"),
        "Should have user-friendly message"
    );
}

#[tokio::test]
async fn test_cache_outage_does_not_fail_requests() {
    // GIVEN: An application whose cache backend is down
    let app = create_test_app(Arc::new(UnreachableCache)).await;

    // WHEN: Creating, reading and updating a server
    let (create_status, created) =
        send_request(app.clone(), "POST", "/api/servers", Some(arena()), Some(ADMIN_KEY)).await;
    let id = created["server_id"].as_str().unwrap().to_string();
    let (read_status, read) =
        send_request(app.clone(), "GET", &format!("/api/servers/{id}"), None, Some(ADMIN_KEY))
            .await;
    let (update_status, updated) = send_request(
        app,
        "PUT",
        &format!("/api/servers/{id}"),
        Some(json!({ "name": "Arena-2" })),
        Some(ADMIN_KEY),
    )
    .await;

    // THEN: Every call succeeds straight from the store
    assert_eq!(create_status, StatusCode::CREATED);
    assert_eq!(read_status, StatusCode::OK);
    assert_eq!(read["name"], "Arena-1");
    assert_eq!(update_status, StatusCode::OK);
    assert_eq!(updated["name"], "Arena-2");
}
