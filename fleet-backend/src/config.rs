use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Database file path
    /// Env: DATABASE_PATH (default: "fleet.db")
    pub database_path: String,

    /// Sliding expiration of cached server projections
    /// Env: CACHE_EXPIRATION_MINUTES (default: 5, minimum: 1)
    pub cache_ttl: Duration,

    /// Base URL of the places API
    /// Env: PLACE_API_URL (default: "https://apis.roblox.com")
    pub place_api_url: String,

    /// Retries after a failed place lookup
    /// Env: PLACE_FETCH_RETRIES (default: 3)
    pub place_fetch_retries: u32,

    /// First backoff delay of place lookups, doubled on every retry
    /// Env: PLACE_FETCH_BASE_DELAY_MS (default: 1000)
    pub place_fetch_base_delay: Duration,

    /// Timeout of a single place lookup attempt
    /// Env: PLACE_FETCH_TIMEOUT_SECS (default: 10)
    pub place_fetch_timeout: Duration,

    /// Timeout of a game server health probe
    /// Env: HEALTH_PROBE_TIMEOUT_SECS (default: 5)
    pub health_probe_timeout: Duration,

    /// API keys, as `name:key=permission,permission;name2:key2=permission`
    /// Env: API_KEYS (default: none)
    pub api_keys: String,

    /// Rate limit for heartbeat, join and leave (requests per second)
    /// Env: RATE_LIMIT_PLAYER_PER_SEC (default: 50)
    /// This is lenient since every game server reports in continuously
    pub rate_limit_player_per_sec: u64,

    /// Burst size for heartbeat, join and leave
    /// Env: RATE_LIMIT_PLAYER_BURST (default: 100)
    pub rate_limit_player_burst: u32,

    /// Rate limit for general endpoints (requests per second)
    /// Env: RATE_LIMIT_GENERAL_PER_SEC (default: 10)
    pub rate_limit_general_per_sec: u64,

    /// Burst size for general endpoints
    /// Env: RATE_LIMIT_GENERAL_BURST (default: 20)
    pub rate_limit_general_burst: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", defaults.request_body_limit),
            request_timeout: Duration::from_secs(env_or_default(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            port: env_or_default("PORT", defaults.port),
            database_path: env_or_default_string("DATABASE_PATH", &defaults.database_path),
            cache_ttl: cache_ttl_from_minutes(env_or_default(
                "CACHE_EXPIRATION_MINUTES",
                defaults.cache_ttl.as_secs() / 60,
            )),
            place_api_url: env_or_default_string("PLACE_API_URL", &defaults.place_api_url),
            place_fetch_retries: env_or_default("PLACE_FETCH_RETRIES", defaults.place_fetch_retries),
            place_fetch_base_delay: Duration::from_millis(env_or_default(
                "PLACE_FETCH_BASE_DELAY_MS",
                defaults.place_fetch_base_delay.as_millis() as u64,
            )),
            place_fetch_timeout: Duration::from_secs(env_or_default(
                "PLACE_FETCH_TIMEOUT_SECS",
                defaults.place_fetch_timeout.as_secs(),
            )),
            health_probe_timeout: Duration::from_secs(env_or_default(
                "HEALTH_PROBE_TIMEOUT_SECS",
                defaults.health_probe_timeout.as_secs(),
            )),
            api_keys: env_or_default_string("API_KEYS", &defaults.api_keys),
            rate_limit_player_per_sec: env_or_default(
                "RATE_LIMIT_PLAYER_PER_SEC",
                defaults.rate_limit_player_per_sec,
            ),
            rate_limit_player_burst: env_or_default(
                "RATE_LIMIT_PLAYER_BURST",
                defaults.rate_limit_player_burst,
            ),
            rate_limit_general_per_sec: env_or_default(
                "RATE_LIMIT_GENERAL_PER_SEC",
                defaults.rate_limit_general_per_sec,
            ),
            rate_limit_general_burst: env_or_default(
                "RATE_LIMIT_GENERAL_BURST",
                defaults.rate_limit_general_burst,
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            database_path: "fleet.db".to_string(),
            cache_ttl: Duration::from_secs(5 * 60),
            place_api_url: "https://apis.roblox.com".to_string(),
            place_fetch_retries: 3,
            place_fetch_base_delay: Duration::from_millis(1000),
            place_fetch_timeout: Duration::from_secs(10),
            health_probe_timeout: Duration::from_secs(5),
            api_keys: String::new(),
            rate_limit_player_per_sec: 50,
            rate_limit_player_burst: 100,
            rate_limit_general_per_sec: 10,
            rate_limit_general_burst: 20,
        }
    }
}

/// Cache entries live at least a minute; a zero TTL would make every fill fail.
fn cache_ttl_from_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.max(1).saturating_mul(60))
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.request_body_limit, 1024 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.port, 3000);
        assert_eq!(config.database_path, "fleet.db");
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.place_fetch_retries, 3);
        assert_eq!(config.place_fetch_base_delay, Duration::from_secs(1));
        assert!(config.api_keys.is_empty());
        assert_eq!(config.rate_limit_player_per_sec, 50);
        assert_eq!(config.rate_limit_player_burst, 100);
        assert_eq!(config.rate_limit_general_per_sec, 10);
        assert_eq!(config.rate_limit_general_burst, 20);
    }

    #[test]
    fn test_cache_ttl_is_at_least_a_minute() {
        assert_eq!(cache_ttl_from_minutes(0), Duration::from_secs(60));
        assert_eq!(cache_ttl_from_minutes(5), Duration::from_secs(300));
    }

    #[test]
    fn test_env_or_default_falls_back_on_garbage() {
        // Not a variable anyone sets
        assert_eq!(env_or_default("FLEET_TEST_UNSET_VARIABLE", 7u32), 7);
        assert_eq!(env_or_default_string("FLEET_TEST_UNSET_VARIABLE", "x"), "x");
    }
}
