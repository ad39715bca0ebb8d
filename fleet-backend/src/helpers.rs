use rand::distr::{Alphanumeric, SampleString};
use rand::rng;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn generate_server_id() -> String {
  format!("srv-{}", Alphanumeric.sample_string(&mut rng(), 20))
}

pub fn generate_session_id() -> String {
  format!("sess-{}", Alphanumeric.sample_string(&mut rng(), 24))
}

pub fn generate_player_id() -> String {
  format!("plr-{}", Alphanumeric.sample_string(&mut rng(), 20))
}

pub fn hash_api_key(key: &str) -> String {
  format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// Current Unix time in seconds.
pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or_default()
}
