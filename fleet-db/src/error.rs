use thiserror::Error;
use tokio_rusqlite::rusqlite;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("server {server_id} was written but its configuration was not: {source}")]
    PartialCreate {
        server_id: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("username already taken")]
    UsernameTaken,

    #[error("max players ({max_players}) cannot be below current players ({current_players})")]
    CapacityBelowPlayers {
        max_players: u32,
        current_players: u32,
    },
}

pub type Result<T> = std::result::Result<T, DbError>;
