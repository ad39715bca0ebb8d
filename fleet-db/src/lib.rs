mod error;
mod models;

pub use error::{DbError, Result};
pub use models::{
  ConfigurationPatch, HeartbeatUpdate, JoinOutcome, NewServer, Player, PlayerPatch, PlayerSession,
  ServerConfiguration, ServerPatch, ServerRecord, ServerStatus,
};

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row, params};
use tracing::{debug, info};

const SELECT_SERVER: &str = "SELECT server_id, name, place_id, game_mode, region, max_players, \
   current_players, status, address, port, created_at, updated_at, last_heartbeat FROM servers";

const SELECT_CONFIGURATION: &str = "SELECT server_id, map_name, time_limit_minutes, friendly_fire, \
   game_rules, command_line_args, reserved_ports, cpu_cores_limit, memory_limit_mb \
   FROM server_configurations";

const SELECT_SESSION: &str =
  "SELECT session_id, server_id, player_id, joined_at, left_at, client_address FROM player_sessions";

/// Database wrapper for all directory and session storage.
///
/// Every multi-row write runs inside a single SQLite transaction on the
/// connection thread, so it commits as a unit or not at all.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| {
                // Enable WAL mode for better concurrent read/write performance
                conn.pragma_update(None, "journal_mode", "WAL")?;

                // Enable foreign key constraints (must be set per-connection)
                conn.pragma_update(None, "foreign_keys", "ON")?;

                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS servers (
                        server_id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        place_id INTEGER NOT NULL,
                        game_mode TEXT NOT NULL,
                        region TEXT NOT NULL,
                        max_players INTEGER NOT NULL CHECK (max_players > 0),
                        current_players INTEGER NOT NULL DEFAULT 0
                            CHECK (current_players >= 0 AND current_players <= max_players),
                        status TEXT NOT NULL,
                        address TEXT,
                        port INTEGER,
                        created_at INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL,
                        last_heartbeat INTEGER
                    );

                    CREATE INDEX IF NOT EXISTS idx_servers_status ON servers(status);

                    -- One configuration per server, removed with it
                    CREATE TABLE IF NOT EXISTS server_configurations (
                        server_id TEXT PRIMARY KEY REFERENCES servers(server_id) ON DELETE CASCADE,
                        map_name TEXT NOT NULL,
                        time_limit_minutes INTEGER NOT NULL,
                        friendly_fire INTEGER NOT NULL,
                        game_rules TEXT NOT NULL,
                        command_line_args TEXT NOT NULL,
                        reserved_ports INTEGER NOT NULL,
                        cpu_cores_limit REAL NOT NULL,
                        memory_limit_mb INTEGER NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS players (
                        player_id TEXT PRIMARY KEY,
                        username TEXT NOT NULL UNIQUE,
                        created_at INTEGER NOT NULL
                    );

                    -- Session history is kept for audit, so no foreign keys here
                    CREATE TABLE IF NOT EXISTS player_sessions (
                        session_id TEXT PRIMARY KEY,
                        server_id TEXT NOT NULL,
                        player_id TEXT NOT NULL,
                        joined_at INTEGER NOT NULL,
                        left_at INTEGER,
                        client_address TEXT
                    );

                    -- At most one active session per (server, player)
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active
                        ON player_sessions(server_id, player_id) WHERE left_at IS NULL;

                    CREATE INDEX IF NOT EXISTS idx_sessions_server ON player_sessions(server_id);
                    "#,
                )?;
                Ok(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Servers
  // ========================================================================

  /// Create a server together with its default configuration.
  ///
  /// Both rows are written in one transaction. If the configuration insert
  /// fails the server row is rolled back and `DbError::PartialCreate` is
  /// returned.
  pub async fn create_server(
    &self,
    server_id: String,
    new: NewServer,
    now: i64,
  ) -> Result<ServerRecord> {
    let server = self
      .conn
      .call(move |conn| {
        let server = ServerRecord {
          server_id,
          name: new.name,
          place_id: new.place_id,
          game_mode: new.game_mode,
          region: new.region,
          max_players: new.max_players,
          current_players: 0,
          status: ServerStatus::Starting,
          address: new.address,
          port: new.port,
          created_at: now,
          updated_at: now,
          last_heartbeat: None,
        };

        let tx = conn.transaction()?;

        tx.prepare_cached(
          "INSERT INTO servers (server_id, name, place_id, game_mode, region, max_players, \
           current_players, status, address, port, created_at, updated_at, last_heartbeat) \
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?
        .execute(params![
          &server.server_id,
          &server.name,
          server.place_id,
          &server.game_mode,
          &server.region,
          server.max_players,
          server.current_players,
          server.status.as_str(),
          &server.address,
          server.port,
          server.created_at,
          server.updated_at,
          server.last_heartbeat,
        ])?;

        let config = ServerConfiguration::default_for(server.server_id.as_str());
        if let Err(source) = insert_configuration(&tx, &config) {
          return Ok(Err(DbError::PartialCreate {
            server_id: server.server_id,
            source,
          }));
        }

        tx.commit()?;
        Ok(Ok(server))
      })
      .await??;

    debug!(%server.server_id, %server.name, "created server");
    Ok(server)
  }

  /// Get a server by id.
  /// Returns None if not found.
  pub async fn get_server(&self, server_id: String) -> Result<Option<ServerRecord>> {
    let server = self
      .conn
      .call(move |conn| read_server(conn, &server_id))
      .await?;

    Ok(server)
  }

  /// Get every registered server.
  pub async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
    let servers = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(SELECT_SERVER)?;

        let servers = stmt
          .query_map([], server_from_row)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(servers)
      })
      .await?;

    Ok(servers)
  }

  /// Get servers whose status matches exactly.
  pub async fn list_servers_by_status(&self, status: String) -> Result<Vec<ServerRecord>> {
    let servers = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!("{SELECT_SERVER} WHERE status = ?1"))?;

        let servers = stmt
          .query_map(params![&status], server_from_row)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(servers)
      })
      .await?;

    Ok(servers)
  }

  /// Apply a sparse patch to a server.
  ///
  /// Returns None if the server does not exist. `updated_at` is always
  /// re-stamped, even when the patch changes nothing.
  pub async fn update_server(
    &self,
    server_id: String,
    patch: ServerPatch,
    now: i64,
  ) -> Result<Option<ServerRecord>> {
    let updated = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let mut server = match read_server(&tx, &server_id)? {
          Some(s) => s,
          None => return Ok(Ok(None)),
        };

        patch.apply(&mut server);
        if server.max_players < server.current_players {
          return Ok(Err(DbError::CapacityBelowPlayers {
            max_players: server.max_players,
            current_players: server.current_players,
          }));
        }
        server.updated_at = server.updated_at.max(now);

        tx.prepare_cached(
          "UPDATE servers SET name = ?2, game_mode = ?3, region = ?4, max_players = ?5, \
           status = ?6, address = ?7, port = ?8, updated_at = ?9 WHERE server_id = ?1",
        )?
        .execute(params![
          &server.server_id,
          &server.name,
          &server.game_mode,
          &server.region,
          server.max_players,
          server.status.as_str(),
          &server.address,
          server.port,
          server.updated_at,
        ])?;

        tx.commit()?;
        Ok(Ok(Some(server)))
      })
      .await??;

    if let Some(server) = &updated {
      debug!(%server.server_id, "updated server");
    }
    Ok(updated)
  }

  /// Delete a server (and, by cascade, its configuration).
  /// Session history is left in place. Returns whether a row existed.
  pub async fn delete_server(&self, server_id: String) -> Result<bool> {
    let server_id_log = server_id.clone();

    let deleted = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM servers WHERE server_id = ?1")?
          .execute(params![&server_id])?;
        Ok(deleted > 0)
      })
      .await?;

    if deleted {
      debug!(server_id = %server_id_log, "deleted server");
    }
    Ok(deleted)
  }

  /// Record a heartbeat.
  ///
  /// Reads the previous heartbeat and overwrites it in one transaction.
  /// Returns None if the server does not exist.
  pub async fn record_heartbeat(
    &self,
    server_id: String,
    now: i64,
  ) -> Result<Option<HeartbeatUpdate>> {
    let update = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let previous: Option<Option<i64>> = tx
          .prepare_cached("SELECT last_heartbeat FROM servers WHERE server_id = ?1")?
          .query_row(params![&server_id], |row| row.get(0))
          .optional()?;

        let previous_heartbeat = match previous {
          Some(p) => p,
          None => return Ok(None),
        };

        tx.prepare_cached(
          "UPDATE servers SET last_heartbeat = ?2, updated_at = MAX(updated_at, ?2) \
           WHERE server_id = ?1",
        )?
        .execute(params![&server_id, now])?;

        tx.commit()?;
        Ok(Some(HeartbeatUpdate { previous_heartbeat }))
      })
      .await?;

    Ok(update)
  }

  // ========================================================================
  // Server Configurations
  // ========================================================================

  /// Get the configuration of a server.
  pub async fn get_configuration(&self, server_id: String) -> Result<Option<ServerConfiguration>> {
    let config = self
      .conn
      .call(move |conn| read_configuration(conn, &server_id))
      .await?;

    Ok(config)
  }

  /// Apply a sparse patch to a server configuration.
  /// Returns None if no configuration exists for the server.
  pub async fn update_configuration(
    &self,
    server_id: String,
    patch: ConfigurationPatch,
  ) -> Result<Option<ServerConfiguration>> {
    let updated = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let mut config = match read_configuration(&tx, &server_id)? {
          Some(c) => c,
          None => return Ok(None),
        };

        patch.apply(&mut config);

        tx.prepare_cached(
          "UPDATE server_configurations SET map_name = ?2, time_limit_minutes = ?3, \
           friendly_fire = ?4, game_rules = ?5, command_line_args = ?6, reserved_ports = ?7, \
           cpu_cores_limit = ?8, memory_limit_mb = ?9 WHERE server_id = ?1",
        )?
        .execute(params![
          &config.server_id,
          &config.map_name,
          config.time_limit_minutes,
          config.friendly_fire,
          &config.game_rules,
          &config.command_line_args,
          config.reserved_ports,
          config.cpu_cores_limit,
          config.memory_limit_mb,
        ])?;

        tx.commit()?;
        Ok(Some(config))
      })
      .await?;

    Ok(updated)
  }

  // ========================================================================
  // Players
  // ========================================================================

  /// Register a player.
  /// Returns an error if the username is already taken.
  pub async fn create_player(
    &self,
    player_id: String,
    username: String,
    now: i64,
  ) -> Result<Player> {
    let player = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let taken: bool = tx
          .prepare_cached("SELECT EXISTS(SELECT 1 FROM players WHERE username = ?1)")?
          .query_row(params![&username], |row| row.get(0))?;

        if taken {
          return Ok(Err(DbError::UsernameTaken));
        }

        tx.prepare_cached(
          "INSERT INTO players (player_id, username, created_at) VALUES (?1, ?2, ?3)",
        )?
        .execute(params![&player_id, &username, now])?;

        tx.commit()?;
        Ok(Ok(Player {
          player_id,
          username,
          created_at: now,
        }))
      })
      .await??;

    debug!(%player.player_id, %player.username, "created player");
    Ok(player)
  }

  /// Get a player by id.
  pub async fn get_player(&self, player_id: String) -> Result<Option<Player>> {
    let player = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached("SELECT player_id, username, created_at FROM players WHERE player_id = ?1")?
          .query_row(params![&player_id], |row| {
            Ok(Player {
              player_id: row.get(0)?,
              username: row.get(1)?,
              created_at: row.get(2)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(player)
  }

  /// Apply a sparse patch to a player. `None` if the player does not exist;
  /// `DbError::UsernameTaken` if another player already has the new name.
  pub async fn update_player(
    &self,
    player_id: String,
    patch: PlayerPatch,
  ) -> Result<Option<Player>> {
    let player = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing = tx
          .prepare_cached("SELECT player_id, username, created_at FROM players WHERE player_id = ?1")?
          .query_row(params![&player_id], |row| {
            Ok(Player {
              player_id: row.get(0)?,
              username: row.get(1)?,
              created_at: row.get(2)?,
            })
          })
          .optional()?;

        let Some(mut player) = existing else {
          return Ok(Ok(None));
        };

        patch.apply(&mut player);

        let taken: bool = tx
          .prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM players WHERE username = ?1 AND player_id != ?2)",
          )?
          .query_row(params![&player.username, &player.player_id], |row| row.get(0))?;

        if taken {
          return Ok(Err(DbError::UsernameTaken));
        }

        tx.prepare_cached("UPDATE players SET username = ?2 WHERE player_id = ?1")?
          .execute(params![&player.player_id, &player.username])?;

        tx.commit()?;
        Ok(Ok(Some(player)))
      })
      .await??;

    if let Some(player) = &player {
      debug!(%player.player_id, %player.username, "updated player");
    }
    Ok(player)
  }

  /// Delete a player. Their session history stays.
  pub async fn delete_player(&self, player_id: String) -> Result<bool> {
    let deleted = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM players WHERE player_id = ?1")?
          .execute(params![&player_id])?;
        Ok(deleted > 0)
      })
      .await?;

    Ok(deleted)
  }

  // ========================================================================
  // Player Sessions
  // ========================================================================

  /// Open a session for a player on a server and bump the player count.
  ///
  /// The existence checks, the session insert and the counter increment run
  /// in one transaction, so concurrent joins cannot both observe the same
  /// count. Every outcome other than `Joined` leaves the database unchanged.
  pub async fn join_server(
    &self,
    session_id: String,
    server_id: String,
    player_id: String,
    client_address: Option<String>,
    now: i64,
  ) -> Result<JoinOutcome> {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let capacity: Option<(u32, u32)> = tx
          .prepare_cached("SELECT current_players, max_players FROM servers WHERE server_id = ?1")?
          .query_row(params![&server_id], |row| Ok((row.get(0)?, row.get(1)?)))
          .optional()?;

        let (current_players, max_players) = match capacity {
          Some(c) => c,
          None => return Ok(JoinOutcome::ServerNotFound),
        };

        let player_exists: bool = tx
          .prepare_cached("SELECT EXISTS(SELECT 1 FROM players WHERE player_id = ?1)")?
          .query_row(params![&player_id], |row| row.get(0))?;

        if !player_exists {
          return Ok(JoinOutcome::PlayerNotFound);
        }

        if let Some(existing) = read_active_session(&tx, &server_id, &player_id)? {
          return Ok(JoinOutcome::AlreadyJoined(existing));
        }

        if current_players >= max_players {
          return Ok(JoinOutcome::ServerFull);
        }

        let session = PlayerSession {
          session_id,
          server_id,
          player_id,
          joined_at: now,
          left_at: None,
          client_address,
        };

        tx.prepare_cached(
          "INSERT INTO player_sessions (session_id, server_id, player_id, joined_at, left_at, \
           client_address) VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
        )?
        .execute(params![
          &session.session_id,
          &session.server_id,
          &session.player_id,
          session.joined_at,
          &session.client_address,
        ])?;

        tx.prepare_cached(
          "UPDATE servers SET current_players = current_players + 1, \
           updated_at = MAX(updated_at, ?2) WHERE server_id = ?1",
        )?
        .execute(params![&session.server_id, now])?;

        tx.commit()?;
        Ok(JoinOutcome::Joined(session))
      })
      .await?;

    if let JoinOutcome::Joined(session) = &outcome {
      debug!(%session.server_id, %session.player_id, %session.session_id, "player joined");
    }
    Ok(outcome)
  }

  /// Close the active session of a player on a server.
  ///
  /// The session stamp and the counter decrement commit together. The counter
  /// never goes below zero. Returns None (and changes nothing) if the player
  /// has no active session there.
  pub async fn leave_server(
    &self,
    server_id: String,
    player_id: String,
    now: i64,
  ) -> Result<Option<PlayerSession>> {
    let closed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let mut session = match read_active_session(&tx, &server_id, &player_id)? {
          Some(s) => s,
          None => return Ok(None),
        };

        tx.prepare_cached("UPDATE player_sessions SET left_at = ?2 WHERE session_id = ?1")?
          .execute(params![&session.session_id, now])?;

        tx.prepare_cached(
          "UPDATE servers SET \
           current_players = CASE WHEN current_players > 0 THEN current_players - 1 ELSE 0 END, \
           updated_at = MAX(updated_at, ?2) WHERE server_id = ?1",
        )?
        .execute(params![&server_id, now])?;

        tx.commit()?;
        session.left_at = Some(now);
        Ok(Some(session))
      })
      .await?;

    if let Some(session) = &closed {
      debug!(%session.server_id, %session.player_id, "player left");
    }
    Ok(closed)
  }

  /// Get the active sessions on a server, oldest first.
  pub async fn active_sessions(&self, server_id: String) -> Result<Vec<PlayerSession>> {
    let sessions = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "{SELECT_SESSION} WHERE server_id = ?1 AND left_at IS NULL ORDER BY joined_at, session_id"
        ))?;

        let sessions = stmt
          .query_map(params![&server_id], session_from_row)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
      })
      .await?;

    Ok(sessions)
  }

  /// Get every session a player ever had on a server, active or not.
  pub async fn session_history(
    &self,
    server_id: String,
    player_id: String,
  ) -> Result<Vec<PlayerSession>> {
    let sessions = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "{SELECT_SESSION} WHERE server_id = ?1 AND player_id = ?2 ORDER BY joined_at, session_id"
        ))?;

        let sessions = stmt
          .query_map(params![&server_id, &player_id], session_from_row)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
      })
      .await?;

    Ok(sessions)
  }
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<ServerRecord> {
  Ok(ServerRecord {
    server_id: row.get(0)?,
    name: row.get(1)?,
    place_id: row.get(2)?,
    game_mode: row.get(3)?,
    region: row.get(4)?,
    max_players: row.get(5)?,
    current_players: row.get(6)?,
    status: ServerStatus::from(row.get::<_, String>(7)?),
    address: row.get(8)?,
    port: row.get(9)?,
    created_at: row.get(10)?,
    updated_at: row.get(11)?,
    last_heartbeat: row.get(12)?,
  })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<PlayerSession> {
  Ok(PlayerSession {
    session_id: row.get(0)?,
    server_id: row.get(1)?,
    player_id: row.get(2)?,
    joined_at: row.get(3)?,
    left_at: row.get(4)?,
    client_address: row.get(5)?,
  })
}

fn read_server(conn: &rusqlite::Connection, server_id: &str) -> rusqlite::Result<Option<ServerRecord>> {
  conn
    .prepare_cached(&format!("{SELECT_SERVER} WHERE server_id = ?1"))?
    .query_row(params![server_id], server_from_row)
    .optional()
}

fn read_configuration(
  conn: &rusqlite::Connection,
  server_id: &str,
) -> rusqlite::Result<Option<ServerConfiguration>> {
  conn
    .prepare_cached(&format!("{SELECT_CONFIGURATION} WHERE server_id = ?1"))?
    .query_row(params![server_id], |row| {
      Ok(ServerConfiguration {
        server_id: row.get(0)?,
        map_name: row.get(1)?,
        time_limit_minutes: row.get(2)?,
        friendly_fire: row.get(3)?,
        game_rules: row.get(4)?,
        command_line_args: row.get(5)?,
        reserved_ports: row.get(6)?,
        cpu_cores_limit: row.get(7)?,
        memory_limit_mb: row.get(8)?,
      })
    })
    .optional()
}

fn insert_configuration(
  conn: &rusqlite::Connection,
  config: &ServerConfiguration,
) -> rusqlite::Result<()> {
  conn
    .prepare_cached(
      "INSERT INTO server_configurations (server_id, map_name, time_limit_minutes, friendly_fire, \
       game_rules, command_line_args, reserved_ports, cpu_cores_limit, memory_limit_mb) \
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?
    .execute(params![
      &config.server_id,
      &config.map_name,
      config.time_limit_minutes,
      config.friendly_fire,
      &config.game_rules,
      &config.command_line_args,
      config.reserved_ports,
      config.cpu_cores_limit,
      config.memory_limit_mb,
    ])?;
  Ok(())
}

fn read_active_session(
  conn: &rusqlite::Connection,
  server_id: &str,
  player_id: &str,
) -> rusqlite::Result<Option<PlayerSession>> {
  conn
    .prepare_cached(&format!(
      "{SELECT_SESSION} WHERE server_id = ?1 AND player_id = ?2 AND left_at IS NULL"
    ))?
    .query_row(params![server_id, player_id], session_from_row)
    .optional()
}
