//! Place metadata lookups against the external places API.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceInfo {
    #[serde(alias = "id")]
    pub place_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub creator: Option<String>,
    pub max_players: Option<u32>,
    pub visits: Option<u64>,
}

/// Fetches place metadata with bounded retries.
///
/// Network errors and 5xx answers are retried with exponential backoff;
/// a 4xx answer means the place does not exist and is not retried. Every
/// failure ends in `None`.
#[derive(Clone)]
pub struct PlaceFetcher {
    client: Client,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl PlaceFetcher {
    pub fn new(
        base_url: impl Into<String>,
        max_retries: u32,
        base_delay: Duration,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            max_retries,
            base_delay,
        })
    }

    fn url(&self, place_id: i64) -> String {
        format!("{}/v1/places/{}", self.base_url.trim_end_matches('/'), place_id)
    }

    pub async fn fetch(&self, place_id: i64) -> Option<PlaceInfo> {
        let url = self.url(place_id);

        for attempt in 0..=self.max_retries {
            debug!(place_id, %url, attempt, "fetching place info");

            let failure = match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    return match response.json::<PlaceInfo>().await {
                        Ok(info) => Some(info),
                        Err(e) => {
                            warn!(place_id, error = %e, "place info response could not be decoded");
                            None
                        }
                    };
                }
                Ok(response) if response.status().is_client_error() => {
                    debug!(place_id, status = %response.status(), "place not available");
                    return None;
                }
                Ok(response) => format!("status {}", response.status()),
                Err(e) => e.to_string(),
            };

            if attempt < self.max_retries {
                let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
                warn!(
                    place_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "retrying place info request"
                );
                tokio::time::sleep(delay).await;
            } else {
                error!(
                    place_id,
                    %url,
                    retries = self.max_retries,
                    error = %failure,
                    "place info request failed after retries"
                );
            }
        }

        None
    }
}
