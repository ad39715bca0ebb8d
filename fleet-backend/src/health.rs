use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Health document a game server reports on `GET /health`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerHealth {
    pub status: Option<String>,
    pub cpu_usage_percent: Option<f64>,
    pub memory_usage_mb: Option<u64>,
    pub uptime_seconds: Option<u64>,
    pub player_count: Option<u32>,
    pub tick_rate: Option<f64>,
}

/// Asks a game server for its own health report. One attempt, no retries.
#[derive(Clone)]
pub struct HealthProbe {
    client: Client,
}

impl HealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// None if the server is unreachable, answers with an error or sends garbage.
    pub async fn probe(&self, server_id: &str, address: &str, port: u16) -> Option<ServerHealth> {
        let url = format!("http://{address}:{port}/health");

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(server_id, %url, error = %e, "server health endpoint unreachable");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(server_id, %url, status = %response.status(), "server health endpoint returned an error");
            return None;
        }

        match response.json::<ServerHealth>().await {
            Ok(health) => Some(health),
            Err(e) => {
                warn!(server_id, %url, error = %e, "server health document could not be decoded");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::get};
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn probe() -> HealthProbe {
        HealthProbe::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_probe_decodes_partial_document() {
        let port = serve(Router::new().route(
            "/health",
            get(|| async { Json(serde_json::json!({ "status": "ok", "player_count": 4 })) }),
        ))
        .await;

        let health = probe().probe("srv-1", "127.0.0.1", port).await.unwrap();
        assert_eq!(health.status.as_deref(), Some("ok"));
        assert_eq!(health.player_count, Some(4));
        assert_eq!(health.cpu_usage_percent, None);
    }

    #[tokio::test]
    async fn test_probe_error_status() {
        let port = serve(Router::new().route(
            "/health",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;

        assert!(probe().probe("srv-1", "127.0.0.1", port).await.is_none());
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(probe().probe("srv-1", "127.0.0.1", port).await.is_none());
    }
}
