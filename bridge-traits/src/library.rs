//! Media Library Abstractions
//!
//! The downstream catalog server that imports proxies and refreshes metadata.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Catalog item kinds the resolver cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LibraryItemKind {
    Movie,
    Series,
    Season,
    Episode,
    Other,
}

impl LibraryItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "Movie",
            Self::Series => "Series",
            Self::Season => "Season",
            Self::Episode => "Episode",
            Self::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "Movie" => Self::Movie,
            "Series" => Self::Series,
            "Season" => Self::Season,
            "Episode" => Self::Episode,
            _ => Self::Other,
        }
    }
}

/// Reference to an item in the media library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    pub name: String,
    pub kind: LibraryItemKind,
    pub path: Option<String>,
    pub production_year: Option<i32>,
    /// Season number for seasons, episode number for episodes
    pub index_number: Option<u32>,
}

/// Media-library server trait
///
/// Lookups return `Ok(None)`/empty when nothing matches; errors are reserved
/// for transport and server failures.
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Exact item whose library path equals `path`
    async fn find_item_by_path(&self, path: &str) -> Result<Option<LibraryItem>>;

    /// Items of the given kind whose title matches
    async fn search_by_title(&self, title: &str, kind: LibraryItemKind)
        -> Result<Vec<LibraryItem>>;

    async fn list_seasons(&self, series_id: &str) -> Result<Vec<LibraryItem>>;

    async fn list_episodes(&self, series_id: &str, season: u32) -> Result<Vec<LibraryItem>>;

    /// Ask the server to re-import metadata for an item
    async fn refresh_item(&self, item_id: &str) -> Result<()>;
}
