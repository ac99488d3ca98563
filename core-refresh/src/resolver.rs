//! # Library Item Resolution
//!
//! Finds the media-library item a proxy path corresponds to.
//!
//! Two strategies, in order:
//!
//! 1. **Path lookup**: map the proxy path into the library's path space and
//!    ask for the exact item there.
//! 2. **Name lookup**: parse title, year, season and episode out of the path,
//!    search by title, then walk series → season → episode.
//!
//! A season or episode the path names but the library lacks resolves to
//! nothing, so the attempt backs off until the server has imported it.

use crate::naming::{parse_media_path, ParsedMedia};
use crate::{MediaType, Result};
use bridge_traits::{BridgeError, LibraryItem, LibraryItemKind, MediaLibrary};
use core_runtime::PathMapper;
use std::sync::Arc;
use tracing::debug;

pub struct ItemResolver {
    library: Arc<dyn MediaLibrary>,
    mapper: PathMapper,
}

impl ItemResolver {
    pub fn new(library: Arc<dyn MediaLibrary>, mapper: PathMapper) -> Self {
        Self { library, mapper }
    }

    /// Library item for a proxy path, `None` if neither strategy finds one
    pub async fn resolve(&self, path: &str, media_type: MediaType) -> Result<Option<LibraryItem>> {
        if let Some(item) = self.by_path(path).await? {
            debug!(path = %path, item_id = %item.id, "Resolved by library path");
            return Ok(Some(item));
        }

        let parsed = parse_media_path(path);
        if parsed.title.is_empty() {
            return Ok(None);
        }

        let found = match media_type {
            MediaType::Movie => self.movie(&parsed).await?,
            MediaType::Series | MediaType::Season | MediaType::Episode => {
                self.episode(&parsed).await?
            }
            MediaType::Unknown if parsed.is_episode() => self.episode(&parsed).await?,
            MediaType::Unknown => match self.movie(&parsed).await? {
                Some(movie) => Some(movie),
                None => self.episode(&parsed).await?,
            },
        };

        if let Some(item) = &found {
            debug!(path = %path, item_id = %item.id, kind = item.kind.as_str(), "Resolved by name");
        }
        Ok(found)
    }

    async fn by_path(&self, path: &str) -> Result<Option<LibraryItem>> {
        let library_path = self.mapper.to_library(path)?;
        match self.library.find_item_by_path(&library_path).await {
            Ok(found) => Ok(found),
            Err(BridgeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn movie(&self, parsed: &ParsedMedia) -> Result<Option<LibraryItem>> {
        let candidates = self
            .library
            .search_by_title(&parsed.title, LibraryItemKind::Movie)
            .await?;
        Ok(pick_best(candidates, &parsed.title, parsed.year))
    }

    async fn episode(&self, parsed: &ParsedMedia) -> Result<Option<LibraryItem>> {
        let candidates = self
            .library
            .search_by_title(&parsed.title, LibraryItemKind::Series)
            .await?;
        let Some(series) = pick_best(candidates, &parsed.title, parsed.year) else {
            return Ok(None);
        };

        let Some(season_number) = parsed.season else {
            return Ok(Some(series));
        };
        let season = self
            .library
            .list_seasons(&series.id)
            .await?
            .into_iter()
            .find(|s| s.index_number == Some(season_number));
        let Some(season) = season else {
            debug!(series_id = %series.id, season = season_number, "Season not in library yet");
            return Ok(None);
        };

        let Some(episode_number) = parsed.episode else {
            return Ok(Some(season));
        };
        let episode = self
            .library
            .list_episodes(&series.id, season_number)
            .await?
            .into_iter()
            .find(|e| e.index_number == Some(episode_number));
        if episode.is_none() {
            debug!(
                series_id = %series.id,
                season = season_number,
                episode = episode_number,
                "Episode not in library yet"
            );
        }

        Ok(episode)
    }
}

/// Prefer a matching year, then an exact (case-insensitive) title, then the first hit
fn pick_best(candidates: Vec<LibraryItem>, title: &str, year: Option<i32>) -> Option<LibraryItem> {
    let title = title.to_lowercase();
    let score = |item: &LibraryItem| {
        let year_match = year.is_some() && item.production_year == year;
        let title_match = item.name.to_lowercase() == title;
        (year_match as u8) * 2 + title_match as u8
    };

    let mut best: Option<(u8, LibraryItem)> = None;
    for item in candidates {
        let item_score = score(&item);
        if best.as_ref().map_or(true, |(s, _)| item_score > *s) {
            best = Some((item_score, item));
        }
    }
    best.map(|(_, item)| item)
}
