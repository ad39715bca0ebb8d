use crate::AppState;
use crate::auth::{Caller, Operation};
use crate::directory::ServerView;
use crate::error::AppError;
use crate::helpers::now;
use crate::listing::ListingQuery;
use crate::sessions::PlayerUpdate;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_macros::debug_handler;
use fleet_db::{
    ConfigurationPatch, JoinOutcome, NewServer, Player, PlayerPatch, PlayerSession,
    ServerConfiguration, ServerPatch,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub(crate) struct CreateServerRequest {
    name: String,
    place_id: i64,
    game_mode: String,
    region: String,
    max_players: u32,
    address: Option<String>,
    port: Option<u16>,
}

impl From<CreateServerRequest> for NewServer {
    fn from(req: CreateServerRequest) -> Self {
        NewServer {
            name: req.name,
            place_id: req.place_id,
            game_mode: req.game_mode,
            region: req.region,
            max_players: req.max_players,
            address: req.address,
            port: req.port,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(crate) struct UpdateServerRequest {
    name: Option<String>,
    game_mode: Option<String>,
    region: Option<String>,
    max_players: Option<u32>,
    status: Option<String>,
    address: Option<String>,
    port: Option<u16>,
}

impl From<UpdateServerRequest> for ServerPatch {
    fn from(req: UpdateServerRequest) -> Self {
        ServerPatch {
            name: req.name,
            game_mode: req.game_mode,
            region: req.region,
            max_players: req.max_players,
            status: req.status,
            address: req.address,
            port: req.port,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct ConfigurationResponse {
    server_id: String,
    map_name: String,
    time_limit_minutes: u32,
    friendly_fire: bool,
    game_rules: String,
    command_line_args: String,
    reserved_ports: u32,
    cpu_cores_limit: f64,
    memory_limit_mb: u32,
}

impl From<ServerConfiguration> for ConfigurationResponse {
    fn from(config: ServerConfiguration) -> Self {
        Self {
            server_id: config.server_id,
            map_name: config.map_name,
            time_limit_minutes: config.time_limit_minutes,
            friendly_fire: config.friendly_fire,
            game_rules: config.game_rules,
            command_line_args: config.command_line_args,
            reserved_ports: config.reserved_ports,
            cpu_cores_limit: config.cpu_cores_limit,
            memory_limit_mb: config.memory_limit_mb,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(crate) struct UpdateConfigurationRequest {
    map_name: Option<String>,
    time_limit_minutes: Option<u32>,
    friendly_fire: Option<bool>,
    game_rules: Option<String>,
    command_line_args: Option<String>,
    reserved_ports: Option<u32>,
    cpu_cores_limit: Option<f64>,
    memory_limit_mb: Option<u32>,
}

impl From<UpdateConfigurationRequest> for ConfigurationPatch {
    fn from(req: UpdateConfigurationRequest) -> Self {
        ConfigurationPatch {
            map_name: req.map_name,
            time_limit_minutes: req.time_limit_minutes,
            friendly_fire: req.friendly_fire,
            game_rules: req.game_rules,
            command_line_args: req.command_line_args,
            reserved_ports: req.reserved_ports,
            cpu_cores_limit: req.cpu_cores_limit,
            memory_limit_mb: req.memory_limit_mb,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct JoinRequest {
    player_id: String,
    client_address: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct JoinResponse {
    session_id: String,
    joined_at: i64,
}

#[derive(Deserialize)]
pub(crate) struct LeaveRequest {
    player_id: String,
}

#[derive(Serialize)]
pub(crate) struct SessionResponse {
    session_id: String,
    server_id: String,
    player_id: String,
    joined_at: i64,
    client_address: Option<String>,
}

impl From<PlayerSession> for SessionResponse {
    fn from(session: PlayerSession) -> Self {
        Self {
            session_id: session.session_id,
            server_id: session.server_id,
            player_id: session.player_id,
            joined_at: session.joined_at,
            client_address: session.client_address,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct CreatePlayerRequest {
    username: String,
}

#[derive(Deserialize)]
pub(crate) struct UpdatePlayerRequest {
    username: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct PlayerResponse {
    player_id: String,
    username: String,
    created_at: i64,
}

impl From<Player> for PlayerResponse {
    fn from(player: Player) -> Self {
        Self {
            player_id: player.player_id,
            username: player.username,
            created_at: player.created_at,
        }
    }
}

// ============================================================================
// Servers
// ============================================================================

#[debug_handler]
pub(crate) async fn list_servers(
    caller: Caller,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ServerView>>, AppError> {
    caller.require(Operation::ListServers)?;
    Ok(Json(state.directory.list_all().await?))
}

#[debug_handler]
pub(crate) async fn list_servers_by_status(
    caller: Caller,
    Path(status): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ServerView>>, AppError> {
    caller.require(Operation::ListServers)?;
    Ok(Json(state.directory.list_by_status(&status).await?))
}

#[debug_handler]
pub(crate) async fn get_server(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ServerView>, AppError> {
    caller.require(Operation::ReadServer)?;

    let server = state
        .directory
        .get(&server_id)
        .await?
        .ok_or(AppError::NotFound("Server not found"))?;

    Ok(Json(server))
}

#[debug_handler]
pub(crate) async fn create_server(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Operation::CreateServer)?;

    let server = state.directory.create(payload.into(), now()).await?;

    Ok((StatusCode::CREATED, Json(server)))
}

#[debug_handler]
pub(crate) async fn update_server(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateServerRequest>,
) -> Result<Json<ServerView>, AppError> {
    caller.require(Operation::UpdateServer)?;

    let server = state
        .directory
        .update(&server_id, payload.into(), now())
        .await?
        .ok_or(AppError::NotFound("Server not found"))?;

    Ok(Json(server))
}

#[debug_handler]
pub(crate) async fn delete_server(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    caller.require(Operation::DeleteServer)?;

    if !state.directory.delete(&server_id).await? {
        return Err(AppError::NotFound("Server not found"));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Always 200: a heartbeat from an unknown server is ignored, and a timeout
/// is only reported in the logs.
#[debug_handler]
pub(crate) async fn heartbeat(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    caller.require(Operation::Heartbeat)?;

    state.directory.heartbeat(&server_id, now()).await?;
    Ok(StatusCode::OK)
}

#[debug_handler]
pub(crate) async fn get_configuration(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConfigurationResponse>, AppError> {
    caller.require(Operation::ReadConfiguration)?;

    let config = state
        .directory
        .configuration(&server_id)
        .await?
        .ok_or(AppError::NotFound("Server configuration not found"))?;

    Ok(Json(config.into()))
}

#[debug_handler]
pub(crate) async fn update_configuration(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateConfigurationRequest>,
) -> Result<Json<ConfigurationResponse>, AppError> {
    caller.require(Operation::UpdateConfiguration)?;

    let config = state
        .directory
        .update_configuration(&server_id, payload.into())
        .await?
        .ok_or(AppError::NotFound("Server configuration not found"))?;

    Ok(Json(config.into()))
}

#[debug_handler]
pub(crate) async fn server_health(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Operation::ReadHealth)?;

    let server = state
        .directory
        .get(&server_id)
        .await?
        .ok_or(AppError::NotFound("Server not found"))?;

    let (Some(address), Some(port)) = (server.address.as_deref(), server.port) else {
        return Err(AppError::NotFound("Server health information not available"));
    };

    let health = state
        .health
        .probe(&server_id, address, port)
        .await
        .ok_or(AppError::NotFound("Server health information not available"))?;

    Ok(Json(health))
}

// ============================================================================
// Sessions
// ============================================================================

#[debug_handler]
pub(crate) async fn join(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, AppError> {
    caller.require(Operation::JoinServer)?;

    let outcome = state
        .sessions
        .join(&server_id, &payload.player_id, payload.client_address, now())
        .await?;

    match outcome {
        JoinOutcome::Joined(session) | JoinOutcome::AlreadyJoined(session) => {
            Ok(Json(JoinResponse {
                session_id: session.session_id,
                joined_at: session.joined_at,
            }))
        }
        JoinOutcome::ServerNotFound => Err(AppError::NotFound("Server not found")),
        JoinOutcome::PlayerNotFound => Err(AppError::NotFound("Player not found")),
        JoinOutcome::ServerFull => Err(AppError::Conflict("Server is full")),
    }
}

#[debug_handler]
pub(crate) async fn leave(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LeaveRequest>,
) -> Result<StatusCode, AppError> {
    caller.require(Operation::LeaveServer)?;

    if !state
        .sessions
        .leave(&server_id, &payload.player_id, now())
        .await?
    {
        return Err(AppError::NotFound("Active session not found"));
    }

    Ok(StatusCode::OK)
}

#[debug_handler]
pub(crate) async fn active_sessions(
    caller: Caller,
    Path(server_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionResponse>>, AppError> {
    caller.require(Operation::ListSessions)?;

    let sessions = state.sessions.active_sessions(&server_id).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

// ============================================================================
// Server list, places, players
// ============================================================================

#[debug_handler]
pub(crate) async fn server_list(
    caller: Caller,
    Query(query): Query<ListingQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ServerView>>, AppError> {
    caller.require(Operation::ListServers)?;
    Ok(Json(state.listing.list(&query).await?))
}

#[debug_handler]
pub(crate) async fn place_info(
    caller: Caller,
    Path(place_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Operation::ReadPlace)?;

    let place = state
        .places
        .fetch(place_id)
        .await
        .ok_or(AppError::NotFound("Place not found or could not be fetched"))?;

    Ok(Json(place))
}

#[debug_handler]
pub(crate) async fn create_player(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePlayerRequest>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Operation::ManagePlayers)?;

    let player = state
        .sessions
        .register_player(&payload.username, now())
        .await?
        .ok_or(AppError::Conflict("Username already taken"))?;

    Ok((StatusCode::CREATED, Json(PlayerResponse::from(player))))
}

#[debug_handler]
pub(crate) async fn get_player(
    caller: Caller,
    Path(player_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<PlayerResponse>, AppError> {
    caller.require(Operation::ManagePlayers)?;

    let player = state
        .sessions
        .player(&player_id)
        .await?
        .ok_or(AppError::NotFound("Player not found"))?;

    Ok(Json(player.into()))
}

#[debug_handler]
pub(crate) async fn update_player(
    caller: Caller,
    Path(player_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdatePlayerRequest>,
) -> Result<Json<PlayerResponse>, AppError> {
    caller.require(Operation::ManagePlayers)?;

    let patch = PlayerPatch {
        username: payload.username,
    };
    match state.sessions.update_player(&player_id, patch).await? {
        PlayerUpdate::Updated(player) => Ok(Json(player.into())),
        PlayerUpdate::NotFound => Err(AppError::NotFound("Player not found")),
        PlayerUpdate::UsernameTaken => Err(AppError::Conflict("Username already taken")),
    }
}

#[debug_handler]
pub(crate) async fn delete_player(
    caller: Caller,
    Path(player_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    caller.require(Operation::ManagePlayers)?;

    if !state.sessions.remove_player(&player_id).await? {
        return Err(AppError::NotFound("Player not found"));
    }

    Ok(StatusCode::NO_CONTENT)
}
