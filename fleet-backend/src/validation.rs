/// Input validation for server, configuration and player requests
use thiserror::Error;

const MAX_SERVER_NAME_LEN: usize = 255;
const MAX_REGION_LEN: usize = 50;
const MAX_GAME_MODE_LEN: usize = 100;
const MAX_USERNAME_LEN: usize = 32;
const MAX_PLAYERS_LIMIT: u32 = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Server name cannot be empty")]
    ServerNameEmpty,

    #[error("Server name too long (max 255 characters, got {0})")]
    ServerNameTooLong(usize),

    #[error("Server name can only contain letters, numbers, spaces, underscores, and hyphens")]
    ServerNameInvalidChars,

    #[error("Place ID must be a positive number")]
    PlaceIdNotPositive,

    #[error("Max players must be between 1 and 1000 (got {0})")]
    MaxPlayersOutOfRange(u32),

    #[error("Region cannot be empty")]
    RegionEmpty,

    #[error("Region too long (max 50 characters, got {0})")]
    RegionTooLong(usize),

    #[error("Region can only contain letters, numbers, and spaces")]
    RegionInvalidChars,

    #[error("Game mode cannot be empty")]
    GameModeEmpty,

    #[error("Game mode too long (max 100 characters, got {0})")]
    GameModeTooLong(usize),

    #[error("Game mode can only contain letters, numbers, spaces, underscores, and hyphens")]
    GameModeInvalidChars,

    #[error("Max players ({max_players}) is not valid for game mode '{game_mode}'")]
    PlayerCountInvalidForMode { game_mode: String, max_players: u32 },

    #[error("Max players ({max_players}) cannot be below current players ({current_players})")]
    CapacityBelowPlayers {
        max_players: u32,
        current_players: u32,
    },

    #[error("Username cannot be empty")]
    UsernameEmpty,

    #[error("Username too long (max 32 characters, got {0})")]
    UsernameTooLong(usize),

    #[error("Username contains invalid characters (only alphanumeric and underscore allowed)")]
    UsernameInvalidChars,

    #[error("Player ID cannot be empty")]
    PlayerIdEmpty,
}

/// Validates a server display name
///
/// Rules:
/// - Cannot be empty or blank
/// - Max 255 characters
/// - Only letters, digits, spaces, underscores and hyphens
pub fn validate_server_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::ServerNameEmpty);
    }

    let len = name.chars().count();
    if len > MAX_SERVER_NAME_LEN {
        return Err(ValidationError::ServerNameTooLong(len));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-')
    {
        return Err(ValidationError::ServerNameInvalidChars);
    }

    Ok(())
}

pub fn validate_place_id(place_id: i64) -> Result<(), ValidationError> {
    if place_id <= 0 {
        return Err(ValidationError::PlaceIdNotPositive);
    }
    Ok(())
}

pub fn validate_max_players(max_players: u32) -> Result<(), ValidationError> {
    if !(1..=MAX_PLAYERS_LIMIT).contains(&max_players) {
        return Err(ValidationError::MaxPlayersOutOfRange(max_players));
    }
    Ok(())
}

pub fn validate_region(region: &str) -> Result<(), ValidationError> {
    if region.trim().is_empty() {
        return Err(ValidationError::RegionEmpty);
    }

    let len = region.chars().count();
    if len > MAX_REGION_LEN {
        return Err(ValidationError::RegionTooLong(len));
    }

    if !region.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
        return Err(ValidationError::RegionInvalidChars);
    }

    Ok(())
}

pub fn validate_game_mode(game_mode: &str) -> Result<(), ValidationError> {
    if game_mode.trim().is_empty() {
        return Err(ValidationError::GameModeEmpty);
    }

    let len = game_mode.chars().count();
    if len > MAX_GAME_MODE_LEN {
        return Err(ValidationError::GameModeTooLong(len));
    }

    if !game_mode
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-')
    {
        return Err(ValidationError::GameModeInvalidChars);
    }

    Ok(())
}

/// Cross-field rule: some game modes bound the lobby size.
///
/// - `ffa` allows at most 50 players
/// - `tdm` needs room for at least 2
pub fn validate_players_for_mode(game_mode: &str, max_players: u32) -> Result<(), ValidationError> {
    let mode = game_mode.to_lowercase();
    let valid = match mode.as_str() {
        "ffa" => max_players <= 50,
        "tdm" => max_players >= 2,
        _ => true,
    };

    if !valid {
        return Err(ValidationError::PlayerCountInvalidForMode {
            game_mode: game_mode.to_string(),
            max_players,
        });
    }
    Ok(())
}

/// Validates a player username
///
/// Rules:
/// - Cannot be empty
/// - Max 32 characters
/// - Only alphanumeric characters and underscores
pub fn validate_username(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::UsernameEmpty);
    }

    let len = name.chars().count();
    if len > MAX_USERNAME_LEN {
        return Err(ValidationError::UsernameTooLong(len));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(ValidationError::UsernameInvalidChars);
    }

    Ok(())
}

pub fn validate_player_id(player_id: &str) -> Result<(), ValidationError> {
    if player_id.trim().is_empty() {
        return Err(ValidationError::PlayerIdEmpty);
    }
    Ok(())
}

/// Validates every field of a server-creation request.
pub fn validate_new_server(server: &fleet_db::NewServer) -> Result<(), ValidationError> {
    validate_server_name(&server.name)?;
    validate_place_id(server.place_id)?;
    validate_max_players(server.max_players)?;
    validate_region(&server.region)?;
    validate_game_mode(&server.game_mode)?;
    validate_players_for_mode(&server.game_mode, server.max_players)?;
    Ok(())
}

/// Validates the fields a server patch actually supplies. Blank strings are
/// "not supplied" and pass.
pub fn validate_server_patch(patch: &fleet_db::ServerPatch) -> Result<(), ValidationError> {
    if let Some(name) = supplied(&patch.name) {
        validate_server_name(name)?;
    }
    if let Some(region) = supplied(&patch.region) {
        validate_region(region)?;
    }
    if let Some(game_mode) = supplied(&patch.game_mode) {
        validate_game_mode(game_mode)?;
    }
    if let Some(max_players) = patch.max_players {
        validate_max_players(max_players)?;
    }
    if let (Some(game_mode), Some(max_players)) = (supplied(&patch.game_mode), patch.max_players) {
        validate_players_for_mode(game_mode, max_players)?;
    }
    Ok(())
}

/// Validates the mode/capacity pair a patch would leave on an existing server.
pub fn validate_patched_server(
    patch: &fleet_db::ServerPatch,
    current: &fleet_db::ServerRecord,
) -> Result<(), ValidationError> {
    let game_mode = supplied(&patch.game_mode).unwrap_or(&current.game_mode);
    let max_players = patch.max_players.unwrap_or(current.max_players);
    validate_players_for_mode(game_mode, max_players)
}

fn supplied(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
