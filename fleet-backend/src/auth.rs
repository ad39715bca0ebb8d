//! API-key authentication and permission checks.
//!
//! Keys arrive as `Authorization: Bearer <key>` and are looked up by their
//! SHA-256 hash; the plaintext key is never stored.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::Authorization;
use headers::authorization::Bearer;
use scc::HashMap;
use scc::hash_map::Entry;
use thiserror::Error;

use crate::AppState;
use crate::error::AppError;
use crate::helpers::hash_api_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Create, update and delete servers, configurations and players.
    ServerManage,
    /// Read servers, sessions, configurations, health and places.
    ServerStatusRead,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ServerManage => "server.manage",
            Permission::ServerStatusRead => "server.status.read",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "server.manage" => Some(Permission::ServerManage),
            "server.status.read" => Some(Permission::ServerStatusRead),
            _ => None,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every operation the HTTP surface exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadServer,
    ListServers,
    CreateServer,
    UpdateServer,
    DeleteServer,
    Heartbeat,
    ReadConfiguration,
    UpdateConfiguration,
    ReadHealth,
    JoinServer,
    LeaveServer,
    ListSessions,
    ReadPlace,
    ManagePlayers,
}

impl Operation {
    /// The permission this operation needs, if any beyond a valid key.
    pub fn required_permission(&self) -> Option<Permission> {
        match self {
            Operation::CreateServer
            | Operation::UpdateServer
            | Operation::DeleteServer
            | Operation::UpdateConfiguration
            | Operation::ManagePlayers => Some(Permission::ServerManage),
            Operation::ReadServer
            | Operation::ListServers
            | Operation::ReadConfiguration
            | Operation::ReadHealth
            | Operation::ListSessions
            | Operation::ReadPlace => Some(Permission::ServerStatusRead),
            // Game servers report in with any valid key
            Operation::Heartbeat | Operation::JoinServer | Operation::LeaveServer => None,
        }
    }
}

pub fn is_allowed(permissions: &[Permission], operation: Operation) -> bool {
    match operation.required_permission() {
        Some(required) => permissions.contains(&required),
        None => true,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiKeyDetails {
    pub developer_name: String,
    pub permissions: Vec<Permission>,
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Resolve a plaintext key. None if it is unknown.
    async fn lookup(&self, api_key: &str) -> Option<ApiKeyDetails>;
}

/// Key table held in memory, keyed by key hash.
pub struct InMemoryApiKeyStore {
    keys: HashMap<String, ApiKeyDetails>,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Build a store from `API_KEYS`-style entries.
    pub async fn from_entries(entries: Vec<ApiKeyEntry>) -> Self {
        let store = Self::new();
        for entry in entries {
            store.insert(&entry.api_key, entry.details).await;
        }
        store
    }

    /// Add or replace a key.
    pub async fn insert(&self, api_key: &str, details: ApiKeyDetails) {
        match self.keys.entry_async(hash_api_key(api_key)).await {
            Entry::Occupied(mut occupied) => {
                *occupied.get_mut() = details;
            }
            Entry::Vacant(vacant) => {
                vacant.insert_entry(details);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Default for InMemoryApiKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn lookup(&self, api_key: &str) -> Option<ApiKeyDetails> {
        self.keys
            .read_async(&hash_api_key(api_key), |_, details| details.clone())
            .await
    }
}

/// One configured key.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKeyEntry {
    pub api_key: String,
    pub details: ApiKeyDetails,
}

#[derive(Debug, Error, PartialEq)]
pub enum ApiKeyConfigError {
    #[error("API key entry '{0}' must look like name:key=permission,permission")]
    Malformed(String),

    #[error("unknown permission '{0}'")]
    UnknownPermission(String),
}

/// Parse `name:key=perm,perm;name2:key2=perm`. Blank input yields no keys.
pub fn parse_api_keys(raw: &str) -> Result<Vec<ApiKeyEntry>, ApiKeyConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (identity, permissions) = entry
                .split_once('=')
                .ok_or_else(|| ApiKeyConfigError::Malformed(entry.to_string()))?;
            let (developer_name, api_key) = identity
                .split_once(':')
                .ok_or_else(|| ApiKeyConfigError::Malformed(entry.to_string()))?;

            if developer_name.trim().is_empty() || api_key.trim().is_empty() {
                return Err(ApiKeyConfigError::Malformed(entry.to_string()));
            }

            let permissions = permissions
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .map(|p| {
                    Permission::parse(p)
                        .ok_or_else(|| ApiKeyConfigError::UnknownPermission(p.trim().to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(ApiKeyEntry {
                api_key: api_key.trim().to_string(),
                details: ApiKeyDetails {
                    developer_name: developer_name.trim().to_string(),
                    permissions,
                },
            })
        })
        .collect()
}

/// An authenticated caller. Extracting it rejects requests without a known key.
#[derive(Debug, Clone)]
pub struct Caller {
    pub details: ApiKeyDetails,
}

impl Caller {
    pub fn require(&self, operation: Operation) -> Result<(), AppError> {
        if is_allowed(&self.details.permissions, operation) {
            return Ok(());
        }

        let missing = operation
            .required_permission()
            .map(|p| p.as_str())
            .unwrap_or_default();
        tracing::warn!(
            developer = %self.details.developer_name,
            ?operation,
            permission = missing,
            "API key lacks permission"
        );
        Err(AppError::Forbidden(missing))
    }
}

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(auth) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    tracing::warn!("API key missing from request");
                    AppError::Unauthorized
                })?;

        let details = state.api_keys.lookup(auth.token()).await.ok_or_else(|| {
            tracing::warn!("Invalid API key provided");
            AppError::Unauthorized
        })?;

        tracing::debug!(developer = %details.developer_name, "API key authenticated");
        Ok(Caller { details })
    }
}
