use std::fmt;

/// Lifecycle status of a game server.
///
/// The four well-known states are modelled explicitly; anything else a caller
/// sends is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
  Starting,
  Running,
  Draining,
  Stopped,
  Custom(String),
}

impl ServerStatus {
  pub fn as_str(&self) -> &str {
    match self {
      ServerStatus::Starting => "Starting",
      ServerStatus::Running => "Running",
      ServerStatus::Draining => "Draining",
      ServerStatus::Stopped => "Stopped",
      ServerStatus::Custom(s) => s,
    }
  }
}

impl From<&str> for ServerStatus {
  fn from(s: &str) -> Self {
    match s {
      "Starting" => ServerStatus::Starting,
      "Running" => ServerStatus::Running,
      "Draining" => ServerStatus::Draining,
      "Stopped" => ServerStatus::Stopped,
      other => ServerStatus::Custom(other.to_string()),
    }
  }
}

impl From<String> for ServerStatus {
  fn from(s: String) -> Self {
    ServerStatus::from(s.as_str())
  }
}

impl fmt::Display for ServerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A registered game server instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRecord {
  /// Opaque identifier, assigned at creation
  pub server_id: String,
  pub name: String,
  /// External place identifier the server is running
  pub place_id: i64,
  pub game_mode: String,
  pub region: String,
  pub max_players: u32,
  pub current_players: u32,
  pub status: ServerStatus,
  pub address: Option<String>,
  pub port: Option<u16>,
  /// Unix timestamp when the server was registered
  pub created_at: i64,
  /// Unix timestamp of the last mutation
  pub updated_at: i64,
  /// Unix timestamp of the last heartbeat, absent until the first one arrives
  pub last_heartbeat: Option<i64>,
}

/// Caller-supplied fields for a new server.
#[derive(Debug, Clone, Default)]
pub struct NewServer {
  pub name: String,
  pub place_id: i64,
  pub game_mode: String,
  pub region: String,
  pub max_players: u32,
  pub address: Option<String>,
  pub port: Option<u16>,
}

/// Sparse update of a server. Blank strings and `None` leave a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ServerPatch {
  pub name: Option<String>,
  pub game_mode: Option<String>,
  pub region: Option<String>,
  pub max_players: Option<u32>,
  pub status: Option<String>,
  pub address: Option<String>,
  pub port: Option<u16>,
}

impl ServerPatch {
  /// Apply the supplied fields to `server`. Does not touch timestamps.
  pub fn apply(&self, server: &mut ServerRecord) {
    if let Some(name) = supplied(&self.name) {
      server.name = name.to_string();
    }
    if let Some(game_mode) = supplied(&self.game_mode) {
      server.game_mode = game_mode.to_string();
    }
    if let Some(region) = supplied(&self.region) {
      server.region = region.to_string();
    }
    if let Some(max_players) = self.max_players {
      server.max_players = max_players;
    }
    if let Some(status) = supplied(&self.status) {
      server.status = ServerStatus::from(status);
    }
    if let Some(address) = supplied(&self.address) {
      server.address = Some(address.to_string());
    }
    if let Some(port) = self.port {
      server.port = Some(port);
    }
  }
}

/// Per-server runtime configuration, created together with its server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfiguration {
  pub server_id: String,
  pub map_name: String,
  /// Match length in minutes, 0 for unlimited
  pub time_limit_minutes: u32,
  pub friendly_fire: bool,
  /// Opaque rules document handed to the game server
  pub game_rules: String,
  pub command_line_args: String,
  pub reserved_ports: u32,
  /// CPU cores, 0 for unlimited
  pub cpu_cores_limit: f64,
  /// Memory in MB, 0 for unlimited
  pub memory_limit_mb: u32,
}

impl ServerConfiguration {
  pub fn default_for(server_id: impl Into<String>) -> Self {
    Self {
      server_id: server_id.into(),
      map_name: String::new(),
      time_limit_minutes: 0,
      friendly_fire: false,
      game_rules: "{}".to_string(),
      command_line_args: String::new(),
      reserved_ports: 0,
      cpu_cores_limit: 0.0,
      memory_limit_mb: 0,
    }
  }
}

/// Sparse update of a server configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationPatch {
  pub map_name: Option<String>,
  pub time_limit_minutes: Option<u32>,
  pub friendly_fire: Option<bool>,
  pub game_rules: Option<String>,
  pub command_line_args: Option<String>,
  pub reserved_ports: Option<u32>,
  pub cpu_cores_limit: Option<f64>,
  pub memory_limit_mb: Option<u32>,
}

impl ConfigurationPatch {
  pub fn apply(&self, config: &mut ServerConfiguration) {
    if let Some(map_name) = supplied(&self.map_name) {
      config.map_name = map_name.to_string();
    }
    if let Some(minutes) = self.time_limit_minutes {
      config.time_limit_minutes = minutes;
    }
    if let Some(friendly_fire) = self.friendly_fire {
      config.friendly_fire = friendly_fire;
    }
    if let Some(rules) = supplied(&self.game_rules) {
      config.game_rules = rules.to_string();
    }
    if let Some(args) = supplied(&self.command_line_args) {
      config.command_line_args = args.to_string();
    }
    if let Some(ports) = self.reserved_ports {
      config.reserved_ports = ports;
    }
    if let Some(cores) = self.cpu_cores_limit {
      config.cpu_cores_limit = cores;
    }
    if let Some(memory) = self.memory_limit_mb {
      config.memory_limit_mb = memory;
    }
  }
}

/// A known player account.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
  pub player_id: String,
  pub username: String,
  pub created_at: i64,
}

/// Sparse update of a player. A blank username is not an update.
#[derive(Debug, Clone, Default)]
pub struct PlayerPatch {
  pub username: Option<String>,
}

impl PlayerPatch {
  pub fn apply(&self, player: &mut Player) {
    if let Some(username) = supplied(&self.username) {
      player.username = username.to_string();
    }
  }
}

/// One stay of a player on a server.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSession {
  pub session_id: String,
  pub server_id: String,
  pub player_id: String,
  /// Unix timestamp when they joined
  pub joined_at: i64,
  /// Unix timestamp when they left, absent while the session is active
  pub left_at: Option<i64>,
  pub client_address: Option<String>,
}

impl PlayerSession {
  pub fn is_active(&self) -> bool {
    self.left_at.is_none()
  }
}

/// Result of an atomic join.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
  /// A new session was opened and the player count incremented.
  Joined(PlayerSession),
  /// The player already had an active session on this server; nothing changed.
  AlreadyJoined(PlayerSession),
  ServerNotFound,
  PlayerNotFound,
  /// The server is at `max_players`.
  ServerFull,
}

/// What a heartbeat write observed before it overwrote the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatUpdate {
  pub previous_heartbeat: Option<i64>,
}

fn supplied(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn server() -> ServerRecord {
    ServerRecord {
      server_id: "srv-1".to_string(),
      name: "Arena-1".to_string(),
      place_id: 42,
      game_mode: "tdm".to_string(),
      region: "NA".to_string(),
      max_players: 10,
      current_players: 0,
      status: ServerStatus::Starting,
      address: None,
      port: None,
      created_at: 1,
      updated_at: 1,
      last_heartbeat: None,
    }
  }

  #[test]
  fn test_status_round_trip() {
    assert_eq!(ServerStatus::from("Running"), ServerStatus::Running);
    assert_eq!(
      ServerStatus::from("Maintenance"),
      ServerStatus::Custom("Maintenance".to_string())
    );
    assert_eq!(ServerStatus::Custom("Maintenance".to_string()).as_str(), "Maintenance");
    assert_eq!(ServerStatus::Draining.to_string(), "Draining");
  }

  #[test]
  fn test_server_patch_skips_blank_fields() {
    let mut s = server();
    ServerPatch {
      name: Some("   ".to_string()),
      region: Some("EU".to_string()),
      status: Some(String::new()),
      max_players: Some(20),
      ..Default::default()
    }
    .apply(&mut s);

    assert_eq!(s.name, "Arena-1");
    assert_eq!(s.region, "EU");
    assert_eq!(s.status, ServerStatus::Starting);
    assert_eq!(s.max_players, 20);
    assert_eq!(s.updated_at, 1);
  }

  #[test]
  fn test_configuration_patch() {
    let mut config = ServerConfiguration::default_for("srv-1");
    ConfigurationPatch {
      map_name: Some("Docks".to_string()),
      friendly_fire: Some(true),
      game_rules: Some("".to_string()),
      ..Default::default()
    }
    .apply(&mut config);

    assert_eq!(config.map_name, "Docks");
    assert!(config.friendly_fire);
    assert_eq!(config.game_rules, "{}");
    assert_eq!(config.time_limit_minutes, 0);
  }
}
