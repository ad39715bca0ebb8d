//! Server-browser queries: filter and sort over the full directory snapshot.

use serde::Deserialize;
use std::cmp::Ordering;

use crate::directory::{DirectoryEngine, ServerView};
use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Name,
    Region,
    Status,
    #[default]
    Players,
}

impl SortKey {
    /// Unknown keys sort by player count.
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "name" => SortKey::Name,
            "region" => SortKey::Region,
            "status" => SortKey::Status,
            _ => SortKey::Players,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Anything other than "asc" is descending.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }
}

/// Query string of the server list. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingQuery {
    pub status: Option<String>,
    pub game_mode: Option<String>,
    pub region: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ListingQuery {
    /// Key and direction to sort by. The direction only applies once a key is
    /// given; without one the list is players descending.
    pub fn ordering(&self) -> (SortKey, SortOrder) {
        match self.sort_by.as_deref() {
            None | Some("") => (SortKey::Players, SortOrder::Desc),
            Some(key) => (
                SortKey::parse(key),
                self.sort_order
                    .as_deref()
                    .map(SortOrder::parse)
                    .unwrap_or_default(),
            ),
        }
    }
}

fn matches(filter: &Option<String>, value: &str) -> bool {
    match filter.as_deref() {
        None | Some("") => true,
        Some(wanted) => wanted.to_lowercase() == value.to_lowercase(),
    }
}

/// Case-insensitive, with the raw strings as tiebreak.
fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn compare(key: SortKey, a: &ServerView, b: &ServerView) -> Ordering {
    match key {
        SortKey::Name => compare_text(&a.name, &b.name),
        SortKey::Region => compare_text(&a.region, &b.region),
        SortKey::Status => compare_text(&a.status, &b.status),
        SortKey::Players => a.current_players.cmp(&b.current_players),
    }
}

/// Filter then sort. Ties keep their snapshot order.
pub fn apply(servers: Vec<ServerView>, query: &ListingQuery) -> Vec<ServerView> {
    let mut servers: Vec<ServerView> = servers
        .into_iter()
        .filter(|s| {
            matches(&query.status, &s.status)
                && matches(&query.game_mode, &s.game_mode)
                && matches(&query.region, &s.region)
        })
        .collect();

    let (key, order) = query.ordering();
    match order {
        SortOrder::Asc => servers.sort_by(|a, b| compare(key, a, b)),
        SortOrder::Desc => servers.sort_by(|a, b| compare(key, b, a)),
    }
    servers
}

#[derive(Clone)]
pub struct ListingEngine {
    directory: DirectoryEngine,
}

impl ListingEngine {
    pub fn new(directory: DirectoryEngine) -> Self {
        Self { directory }
    }

    pub async fn list(&self, query: &ListingQuery) -> Result<Vec<ServerView>, ServiceError> {
        let snapshot = self.directory.list_all().await?;
        Ok(apply(snapshot, query))
    }
}
