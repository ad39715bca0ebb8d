//! Server directory: CRUD, cache-aside reads, heartbeats and configuration.
//!
//! Single-server reads go through the cache; list reads and every write go to
//! the store. Every write to a server row drops that server's cache entry
//! before returning, so a read after a write never sees the old projection.
//! Each invalidation also bumps a per-server generation; a read that raced a
//! write does not leave its projection behind in the cache.

use std::sync::Arc;
use std::time::Duration;

use scc::HashMap;
use scc::hash_map::Entry;

use fleet_db::{
    ConfigurationPatch, Database, NewServer, ServerConfiguration, ServerPatch, ServerRecord,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheError, server_key};
use crate::error::ServiceError;
use crate::helpers;
use crate::validation;

/// A server whose previous heartbeat is older than this is reported as timed out.
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 5 * 60;

/// Read-model projection of a server. This, not the stored row, is what gets cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerView {
    pub server_id: String,
    pub name: String,
    pub place_id: i64,
    pub game_mode: String,
    pub region: String,
    pub max_players: u32,
    pub current_players: u32,
    pub status: String,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub last_heartbeat: Option<i64>,
}

impl From<&ServerRecord> for ServerView {
    fn from(server: &ServerRecord) -> Self {
        Self {
            server_id: server.server_id.clone(),
            name: server.name.clone(),
            place_id: server.place_id,
            game_mode: server.game_mode.clone(),
            region: server.region.clone(),
            max_players: server.max_players,
            current_players: server.current_players,
            status: server.status.to_string(),
            address: server.address.clone(),
            port: server.port,
            last_heartbeat: server.last_heartbeat,
        }
    }
}

/// What a heartbeat found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// No such server; nothing was written.
    UnknownServer,
    Alive,
    /// The previous heartbeat was older than [`HEARTBEAT_TIMEOUT_SECS`].
    TimedOut { silent_for_secs: i64 },
}

/// Liveness from the heartbeat that was stored *before* the current one.
///
/// A server that never sent a heartbeat has nothing to time out from.
pub fn liveness(previous_heartbeat: Option<i64>, now: i64) -> HeartbeatOutcome {
    match previous_heartbeat {
        Some(previous) if now - previous > HEARTBEAT_TIMEOUT_SECS => HeartbeatOutcome::TimedOut {
            silent_for_secs: now - previous,
        },
        _ => HeartbeatOutcome::Alive,
    }
}

#[derive(Clone)]
pub struct DirectoryEngine {
    db: Database,
    cache: Arc<dyn Cache>,
    cache_ttl: Duration,
    generations: Arc<HashMap<String, u64>>,
}

impl DirectoryEngine {
    pub fn new(db: Database, cache: Arc<dyn Cache>, cache_ttl: Duration) -> Self {
        Self {
            db,
            cache,
            cache_ttl,
            generations: Arc::new(HashMap::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Get one server, from the cache if present.
    ///
    /// A cache hit is returned as-is; staleness is bounded by the TTL and by
    /// the invalidation every write performs.
    pub async fn get(&self, server_id: &str) -> Result<Option<ServerView>, ServiceError> {
        let key = server_key(server_id);

        if let Some(view) = self.cached(&key).await {
            return Ok(Some(view));
        }

        let generation = self.generation(server_id).await;
        let record = self
            .db
            .get_server(server_id.to_string())
            .await
            .map_err(|e| ServiceError::from_store("get_server", server_id, e))?;

        let Some(record) = record else {
            return Ok(None);
        };

        let view = ServerView::from(&record);
        if self.generation(server_id).await == generation {
            self.populate(&key, &view).await;
            if self.generation(server_id).await != generation {
                debug!(server_id, "server written during cache fill; dropping entry");
                self.evict(&key).await;
            }
        }
        Ok(Some(view))
    }

    /// All servers, straight from the store.
    pub async fn list_all(&self) -> Result<Vec<ServerView>, ServiceError> {
        let servers = self
            .db
            .list_servers()
            .await
            .map_err(|e| ServiceError::from_store("list_servers", "*", e))?;

        Ok(servers.iter().map(ServerView::from).collect())
    }

    /// Servers with exactly this status, straight from the store.
    pub async fn list_by_status(&self, status: &str) -> Result<Vec<ServerView>, ServiceError> {
        let servers = self
            .db
            .list_servers_by_status(status.to_string())
            .await
            .map_err(|e| ServiceError::from_store("list_servers_by_status", status, e))?;

        Ok(servers.iter().map(ServerView::from).collect())
    }

    /// Register a server in `Starting` state along with its default configuration.
    pub async fn create(&self, new: NewServer, now: i64) -> Result<ServerView, ServiceError> {
        validation::validate_new_server(&new)?;

        let server_id = helpers::generate_server_id();
        info!(%server_id, name = %new.name, place_id = new.place_id, "creating game server");

        let record = self
            .db
            .create_server(server_id.clone(), new, now)
            .await
            .map_err(|e| ServiceError::from_store("create_server", &server_id, e))?;

        self.invalidate(&record.server_id).await;
        Ok(ServerView::from(&record))
    }

    /// Apply a sparse patch. Returns None if the server does not exist.
    pub async fn update(
        &self,
        server_id: &str,
        patch: ServerPatch,
        now: i64,
    ) -> Result<Option<ServerView>, ServiceError> {
        validation::validate_server_patch(&patch)?;

        if patch.game_mode.is_some() || patch.max_players.is_some() {
            let current = self
                .db
                .get_server(server_id.to_string())
                .await
                .map_err(|e| ServiceError::from_store("get_server", server_id, e))?;
            if let Some(current) = current {
                validation::validate_patched_server(&patch, &current)?;
            }
        }

        let updated = self
            .db
            .update_server(server_id.to_string(), patch, now)
            .await
            .map_err(|e| ServiceError::from_store("update_server", server_id, e))?;

        let Some(record) = updated else {
            return Ok(None);
        };

        self.invalidate(server_id).await;
        Ok(Some(ServerView::from(&record)))
    }

    /// Delete a server. Returns whether it existed.
    pub async fn delete(&self, server_id: &str) -> Result<bool, ServiceError> {
        let deleted = self
            .db
            .delete_server(server_id.to_string())
            .await
            .map_err(|e| ServiceError::from_store("delete_server", server_id, e))?;

        self.invalidate(server_id).await;
        if deleted {
            info!(server_id, "deleted game server");
        }
        Ok(deleted)
    }

    /// Record a heartbeat and derive liveness from the one it replaces.
    ///
    /// Heartbeats for unknown servers are ignored. A timeout is observed once,
    /// on the first heartbeat after the silence; the heartbeat that follows is
    /// measured against this one and is fresh again.
    pub async fn heartbeat(&self, server_id: &str, now: i64) -> Result<HeartbeatOutcome, ServiceError> {
        let update = self
            .db
            .record_heartbeat(server_id.to_string(), now)
            .await
            .map_err(|e| ServiceError::from_store("record_heartbeat", server_id, e))?;

        let Some(update) = update else {
            debug!(server_id, "heartbeat for unknown server ignored");
            return Ok(HeartbeatOutcome::UnknownServer);
        };

        self.invalidate(server_id).await;

        let outcome = liveness(update.previous_heartbeat, now);
        if let HeartbeatOutcome::TimedOut { silent_for_secs } = outcome {
            warn!(server_id, silent_for_secs, "server heartbeat timeout detected");
        }
        Ok(outcome)
    }

    pub async fn configuration(
        &self,
        server_id: &str,
    ) -> Result<Option<ServerConfiguration>, ServiceError> {
        self.db
            .get_configuration(server_id.to_string())
            .await
            .map_err(|e| ServiceError::from_store("get_configuration", server_id, e))
    }

    /// Apply a sparse patch to a server's configuration. None if it has none.
    pub async fn update_configuration(
        &self,
        server_id: &str,
        patch: ConfigurationPatch,
    ) -> Result<Option<ServerConfiguration>, ServiceError> {
        let updated = self
            .db
            .update_configuration(server_id.to_string(), patch)
            .await
            .map_err(|e| ServiceError::from_store("update_configuration", server_id, e))?;

        if updated.is_some() {
            debug!(server_id, "updated server configuration");
        }
        Ok(updated)
    }

    /// Drop the cached projection of a server. Cache failures are logged only.
    ///
    /// The generation is bumped before the entry is removed; `get` checks it
    /// after filling the cache.
    pub(crate) async fn invalidate(&self, server_id: &str) {
        match self.generations.entry_async(server_id.to_string()).await {
            Entry::Occupied(mut occupied) => {
                *occupied.get_mut() += 1;
            }
            Entry::Vacant(vacant) => {
                vacant.insert_entry(1);
            }
        }
        self.evict(&server_key(server_id)).await;
    }

    async fn generation(&self, server_id: &str) -> u64 {
        self.generations
            .read_async(server_id, |_, generation| *generation)
            .await
            .unwrap_or(0)
    }

    async fn evict(&self, key: &str) {
        if let Err(err) = self.cache.remove(key).await {
            warn!(key, error = %err, "cache invalidation failed");
        }
    }

    async fn cached(&self, key: &str) -> Option<ServerView> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(view) => Some(view),
                Err(err) => {
                    let err = CacheError::Corrupt(err.to_string());
                    warn!(key, error = %err, "dropping undecodable cache entry");
                    self.evict(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "cache read failed");
                None
            }
        }
    }

    async fn populate(&self, key: &str, view: &ServerView) {
        let bytes = match serde_json::to_vec(view) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key, error = %err, "could not encode server for cache");
                return;
            }
        };

        if let Err(err) = self.cache.set(key, bytes, self.cache_ttl).await {
            warn!(key, error = %err, "cache write failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    pub(crate) const TTL: Duration = Duration::from_secs(300);

    fn now() -> i64 {
        1700000000 // Fixed timestamp for testing
    }

    pub(crate) fn arena(name: &str, region: &str, max_players: u32) -> NewServer {
        NewServer {
            name: name.to_string(),
            place_id: 920587237,
            game_mode: "tdm".to_string(),
            region: region.to_string(),
            max_players,
            address: None,
            port: None,
        }
    }

    /// A cache whose backend is always down.
    pub(crate) struct FailingCache;

    #[async_trait]
    impl Cache for FailingCache {
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

    /// A memory cache that can hold the next `set` until released.
    #[derive(Default)]
    struct GatedCache {
        inner: MemoryCache,
        hold_next_set: AtomicBool,
        set_reached: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Cache for GatedCache {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
            if self.hold_next_set.swap(false, Ordering::SeqCst) {
                self.set_reached.notify_one();
                self.release.notified().await;
            }
            self.inner.set(key, value, ttl).await
        }

        async fn remove(&self, key: &str) -> Result<(), CacheError> {
            self.inner.remove(key).await
        }
    }

    async fn engine() -> (DirectoryEngine, Arc<MemoryCache>) {
        let db = Database::open_in_memory().await.unwrap();
        let cache = Arc::new(MemoryCache::new());
        (DirectoryEngine::new(db, cache.clone(), TTL), cache)
    }

    #[test]
    fn test_liveness() {
        assert_eq!(liveness(None, now()), HeartbeatOutcome::Alive);
        assert_eq!(liveness(Some(now() - 300), now()), HeartbeatOutcome::Alive);
        assert_eq!(
            liveness(Some(now() - 301), now()),
            HeartbeatOutcome::TimedOut { silent_for_secs: 301 }
        );
    }

    #[tokio::test]
    async fn test_create_then_read_populates_cache() {
        let (directory, cache) = engine().await;

        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();
        assert_eq!(created.status, "Starting");
        assert_eq!(created.current_players, 0);
        assert!(!cache.contains(&server_key(&created.server_id)).await);

        let read = directory.get(&created.server_id).await.unwrap().unwrap();
        assert_eq!(read, created);
        assert!(cache.contains(&server_key(&created.server_id)).await);

        // The default configuration exists
        let config = directory.configuration(&created.server_id).await.unwrap();
        assert!(config.is_some());
    }

    #[tokio::test]
    async fn test_cache_hit_is_not_rechecked() {
        let (directory, _cache) = engine().await;
        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();
        directory.get(&created.server_id).await.unwrap();

        // Write behind the engine's back: the cached projection still wins
        directory
            .database()
            .update_server(
                created.server_id.clone(),
                ServerPatch {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
                now(),
            )
            .await
            .unwrap();

        let read = directory.get(&created.server_id).await.unwrap().unwrap();
        assert_eq!(read.name, "Arena-1");
    }

    #[tokio::test]
    async fn test_update_invalidates_before_returning() {
        let (directory, cache) = engine().await;
        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();
        directory.get(&created.server_id).await.unwrap();

        let updated = directory
            .update(
                &created.server_id,
                ServerPatch {
                    name: Some("Arena-2".to_string()),
                    status: Some("Running".to_string()),
                    ..Default::default()
                },
                now() + 5,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Arena-2");
        assert!(!cache.contains(&server_key(&created.server_id)).await);

        let read = directory.get(&created.server_id).await.unwrap().unwrap();
        assert_eq!(read.name, "Arena-2");
        assert_eq!(read.status, "Running");
    }

    #[tokio::test]
    async fn test_read_racing_delete_does_not_resurrect_server() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = Arc::new(GatedCache::default());
        let directory = DirectoryEngine::new(db, cache.clone(), TTL);
        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();
        let key = server_key(&created.server_id);

        // A miss reads the store, then stalls while filling the cache
        cache.hold_next_set.store(true, Ordering::SeqCst);
        let reader = {
            let directory = directory.clone();
            let id = created.server_id.clone();
            tokio::spawn(async move { directory.get(&id).await })
        };
        cache.set_reached.notified().await;

        assert!(directory.delete(&created.server_id).await.unwrap());
        cache.release.notify_one();

        // The racing read answered from its own snapshot
        let raced = reader.await.unwrap().unwrap();
        assert_eq!(raced.map(|v| v.name), Some("Arena-1".to_string()));

        // ...but left nothing behind
        assert!(!cache.inner.contains(&key).await);
        assert!(directory.get(&created.server_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_racing_update_never_serves_old_projection() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = Arc::new(GatedCache::default());
        let directory = DirectoryEngine::new(db, cache.clone(), TTL);
        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();

        cache.hold_next_set.store(true, Ordering::SeqCst);
        let reader = {
            let directory = directory.clone();
            let id = created.server_id.clone();
            tokio::spawn(async move { directory.get(&id).await })
        };
        cache.set_reached.notified().await;

        directory
            .update(
                &created.server_id,
                ServerPatch {
                    name: Some("Arena-2".to_string()),
                    ..Default::default()
                },
                now() + 5,
            )
            .await
            .unwrap();
        cache.release.notify_one();
        reader.await.unwrap().unwrap();

        let read = directory.get(&created.server_id).await.unwrap().unwrap();
        assert_eq!(read.name, "Arena-2");
    }

    #[tokio::test]
    async fn test_update_checks_mode_against_stored_server() {
        let (directory, _cache) = engine().await;
        let ffa = NewServer {
            game_mode: "ffa".to_string(),
            ..arena("Brawl-1", "EU", 20)
        };
        let created = directory.create(ffa, now()).await.unwrap();

        let result = directory
            .update(
                &created.server_id,
                ServerPatch {
                    max_players: Some(200),
                    ..Default::default()
                },
                now(),
            )
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::InvalidInput(
                validation::ValidationError::PlayerCountInvalidForMode { .. }
            ))
        ));

        let read = directory.get(&created.server_id).await.unwrap().unwrap();
        assert_eq!(read.max_players, 20);
    }

    #[tokio::test]
    async fn test_read_missing_server() {
        let (directory, cache) = engine().await;
        assert!(directory.get("srv-missing").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_server() {
        let (directory, _cache) = engine().await;
        let result = directory
            .update("srv-missing", ServerPatch::default(), now())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_empty_name() {
        let (directory, _cache) = engine().await;
        let result = directory.create(arena("", "NA", 10), now()).await;
        assert!(matches!(
            result,
            Err(ServiceError::InvalidInput(
                validation::ValidationError::ServerNameEmpty
            ))
        ));
        assert!(directory.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_invalidates() {
        let (directory, cache) = engine().await;
        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();
        directory.get(&created.server_id).await.unwrap();

        assert!(directory.delete(&created.server_id).await.unwrap());
        assert!(!cache.contains(&server_key(&created.server_id)).await);
        assert!(directory.get(&created.server_id).await.unwrap().is_none());
        assert!(!directory.delete(&created.server_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_server_is_noop() {
        let (directory, _cache) = engine().await;
        let outcome = directory.heartbeat("srv-missing", now()).await.unwrap();
        assert_eq!(outcome, HeartbeatOutcome::UnknownServer);
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_observed_once() {
        let (directory, _cache) = engine().await;
        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();
        let id = &created.server_id;

        assert_eq!(directory.heartbeat(id, now()).await.unwrap(), HeartbeatOutcome::Alive);
        assert_eq!(
            directory.heartbeat(id, now() + 30).await.unwrap(),
            HeartbeatOutcome::Alive
        );

        // Ten minutes of silence
        assert_eq!(
            directory.heartbeat(id, now() + 630).await.unwrap(),
            HeartbeatOutcome::TimedOut { silent_for_secs: 600 }
        );

        // Back to regular heartbeats: no further timeouts
        assert_eq!(
            directory.heartbeat(id, now() + 660).await.unwrap(),
            HeartbeatOutcome::Alive
        );
        assert_eq!(
            directory.heartbeat(id, now() + 690).await.unwrap(),
            HeartbeatOutcome::Alive
        );

        let read = directory.get(id).await.unwrap().unwrap();
        assert_eq!(read.last_heartbeat, Some(now() + 690));
    }

    #[tokio::test]
    async fn test_heartbeat_invalidates_cached_projection() {
        let (directory, _cache) = engine().await;
        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();
        directory.get(&created.server_id).await.unwrap();

        directory.heartbeat(&created.server_id, now() + 10).await.unwrap();

        let read = directory.get(&created.server_id).await.unwrap().unwrap();
        assert_eq!(read.last_heartbeat, Some(now() + 10));
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let (directory, _cache) = engine().await;
        let a = directory.create(arena("A", "NA", 10), now()).await.unwrap();
        directory.create(arena("B", "NA", 10), now()).await.unwrap();
        directory
            .update(
                &a.server_id,
                ServerPatch {
                    status: Some("Draining".to_string()),
                    ..Default::default()
                },
                now(),
            )
            .await
            .unwrap();

        let draining = directory.list_by_status("Draining").await.unwrap();
        assert_eq!(draining.len(), 1);
        assert_eq!(draining[0].server_id, a.server_id);
        assert_eq!(directory.list_by_status("Starting").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_configuration_patch() {
        let (directory, _cache) = engine().await;
        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();

        let config = directory
            .update_configuration(
                &created.server_id,
                ConfigurationPatch {
                    map_name: Some("Harbor".to_string()),
                    reserved_ports: Some(4),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.map_name, "Harbor");
        assert_eq!(config.reserved_ports, 4);

        assert!(
            directory
                .update_configuration("srv-missing", ConfigurationPatch::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_cache_failures_do_not_fail_operations() {
        let db = Database::open_in_memory().await.unwrap();
        let directory = DirectoryEngine::new(db, Arc::new(FailingCache), TTL);

        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();
        let read = directory.get(&created.server_id).await.unwrap().unwrap();
        assert_eq!(read, created);

        let updated = directory
            .update(
                &created.server_id,
                ServerPatch {
                    name: Some("Arena-2".to_string()),
                    ..Default::default()
                },
                now(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Arena-2");
        assert!(directory.delete(&created.server_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_falls_back_to_store() {
        let (directory, cache) = engine().await;
        let created = directory.create(arena("Arena-1", "NA", 10), now()).await.unwrap();
        let key = server_key(&created.server_id);

        cache.set(&key, b"not json".to_vec(), TTL).await.unwrap();

        let read = directory.get(&created.server_id).await.unwrap().unwrap();
        assert_eq!(read, created);
        // Re-populated with a good projection
        let bytes = cache.get(&key).await.unwrap().unwrap();
        let cached: ServerView = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(cached, created);
    }
}
