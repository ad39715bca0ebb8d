//! Player join/leave bookkeeping and the player registry.

use fleet_db::{JoinOutcome, Player, PlayerPatch, PlayerSession};
use tracing::{debug, info};

use crate::directory::DirectoryEngine;
use crate::error::ServiceError;
use crate::helpers;
use crate::validation;

/// What a player update did.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerUpdate {
    Updated(Player),
    NotFound,
    /// Another player already has the requested username; nothing changed.
    UsernameTaken,
}

/// Join/leave on top of the directory's store and cache.
///
/// Each join and each leave is a single store transaction: the session write
/// and the player-count change commit together or not at all.
#[derive(Clone)]
pub struct SessionEngine {
    directory: DirectoryEngine,
}

impl SessionEngine {
    pub fn new(directory: DirectoryEngine) -> Self {
        Self { directory }
    }

    pub async fn join(
        &self,
        server_id: &str,
        player_id: &str,
        client_address: Option<String>,
        now: i64,
    ) -> Result<JoinOutcome, ServiceError> {
        validation::validate_player_id(player_id)?;

        let outcome = self
            .directory
            .database()
            .join_server(
                helpers::generate_session_id(),
                server_id.to_string(),
                player_id.to_string(),
                client_address,
                now,
            )
            .await
            .map_err(|e| ServiceError::from_atomic_unit("join_server", server_id, e))?;

        match &outcome {
            JoinOutcome::Joined(session) => {
                self.directory.invalidate(server_id).await;
                info!(server_id, player_id, session_id = %session.session_id, "player joined server");
            }
            JoinOutcome::AlreadyJoined(session) => {
                debug!(server_id, player_id, session_id = %session.session_id, "player already on server");
            }
            JoinOutcome::ServerFull => debug!(server_id, player_id, "join rejected: server full"),
            JoinOutcome::ServerNotFound | JoinOutcome::PlayerNotFound => {}
        }

        Ok(outcome)
    }

    /// Close the player's active session. False if there was none.
    pub async fn leave(&self, server_id: &str, player_id: &str, now: i64) -> Result<bool, ServiceError> {
        validation::validate_player_id(player_id)?;

        let closed = self
            .directory
            .database()
            .leave_server(server_id.to_string(), player_id.to_string(), now)
            .await
            .map_err(|e| ServiceError::from_atomic_unit("leave_server", server_id, e))?;

        if closed.is_none() {
            return Ok(false);
        }

        self.directory.invalidate(server_id).await;
        info!(server_id, player_id, "player left server");
        Ok(true)
    }

    pub async fn active_sessions(&self, server_id: &str) -> Result<Vec<PlayerSession>, ServiceError> {
        self.directory
            .database()
            .active_sessions(server_id.to_string())
            .await
            .map_err(|e| ServiceError::from_store("active_sessions", server_id, e))
    }

    /// Register a player under a fresh id. `Ok(None)` if the username is taken.
    pub async fn register_player(&self, username: &str, now: i64) -> Result<Option<Player>, ServiceError> {
        validation::validate_username(username)?;

        let player_id = helpers::generate_player_id();
        match self
            .directory
            .database()
            .create_player(player_id.clone(), username.to_string(), now)
            .await
        {
            Ok(player) => Ok(Some(player)),
            Err(fleet_db::DbError::UsernameTaken) => Ok(None),
            Err(e) => Err(ServiceError::from_store("create_player", &player_id, e)),
        }
    }

    pub async fn player(&self, player_id: &str) -> Result<Option<Player>, ServiceError> {
        self.directory
            .database()
            .get_player(player_id.to_string())
            .await
            .map_err(|e| ServiceError::from_store("get_player", player_id, e))
    }

    /// Rename a player. A missing or blank username leaves the player unchanged.
    pub async fn update_player(
        &self,
        player_id: &str,
        patch: PlayerPatch,
    ) -> Result<PlayerUpdate, ServiceError> {
        if let Some(username) = patch.username.as_deref().filter(|u| !u.trim().is_empty()) {
            validation::validate_username(username)?;
        }

        match self
            .directory
            .database()
            .update_player(player_id.to_string(), patch)
            .await
        {
            Ok(Some(player)) => Ok(PlayerUpdate::Updated(player)),
            Ok(None) => Ok(PlayerUpdate::NotFound),
            Err(fleet_db::DbError::UsernameTaken) => Ok(PlayerUpdate::UsernameTaken),
            Err(e) => Err(ServiceError::from_store("update_player", player_id, e)),
        }
    }

    /// Delete a player. Their past sessions are kept.
    pub async fn remove_player(&self, player_id: &str) -> Result<bool, ServiceError> {
        self.directory
            .database()
            .delete_player(player_id.to_string())
            .await
            .map_err(|e| ServiceError::from_store("delete_player", player_id, e))
    }
}
