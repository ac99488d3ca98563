//! Media naming heuristics
//!
//! Pulls title, year, season and episode numbers out of a proxy path so the
//! resolver can search the library when the path-mapped lookup misses.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::item::MediaType;

static EPISODE_SXXEYY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^a-z0-9])s(\d{1,2})[\s._-]*e(\d{1,3})").expect("valid regex"));

static EPISODE_NXMM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^a-z0-9])(\d{1,2})x(\d{2,3})(?:[^a-z0-9]|$)").expect("valid regex"));

static SEASON_DIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:season[\s._-]*(\d{1,2})|s(\d{1,2})|第\s*(\d{1,2})\s*季)$").expect("valid regex")
});

static YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\(\[\s._-]((?:19|20)\d{2})(?:[\)\]\s._-]|$)").expect("valid regex"));

static RELEASE_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[\s._-](?:2160p|1080p|720p|480p|4k|uhd|blu-?ray|web-?dl|web-?rip|hdtv|remux|x26[45]|h\.?26[45]|hevc|hdr|dv|aac|dts|atmos)(?:[\s._-]|$).*$",
    )
    .expect("valid regex")
});

/// What could be read out of a proxy path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedMedia {
    pub title: String,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl ParsedMedia {
    pub fn is_episode(&self) -> bool {
        self.episode.is_some()
    }
}

/// Parse a proxy-relative path such as `tv/Show (2019)/Season 1/Show S01E02.strm`
pub fn parse_media_path(path: &str) -> ParsedMedia {
    let normalized = path.replace('\\', "/");
    let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    let Some((file_name, dirs)) = segments.split_last() else {
        return ParsedMedia::default();
    };
    let stem = strip_extension(file_name);

    let season_dir = dirs
        .iter()
        .enumerate()
        .rev()
        .find_map(|(idx, dir)| season_from_dir(dir).map(|season| (idx, season)));

    if let Some((season, episode, marker_start)) = episode_marker(stem) {
        let from_folder = season_dir
            .and_then(|(idx, _)| idx.checked_sub(1))
            .and_then(|idx| dirs.get(idx))
            .map(|dir| split_title_year(dir));
        let from_file = split_title_year(&stem[..marker_start]);
        let from_parent = dirs.last().map(|dir| split_title_year(dir));

        let (title, year) = [from_folder, Some(from_file), from_parent]
            .into_iter()
            .flatten()
            .find(|(title, _)| !title.is_empty())
            .unwrap_or_default();

        return ParsedMedia {
            title,
            year,
            season: Some(season),
            episode: Some(episode),
        };
    }

    let (mut title, mut year) = split_title_year(stem);
    if title.is_empty() {
        if let Some(parent) = dirs.last() {
            (title, year) = split_title_year(parent);
        }
    }

    ParsedMedia {
        title,
        year,
        season: season_dir.map(|(_, season)| season),
        episode: None,
    }
}

/// Best guess at the media type of a proxy path
pub fn infer_media_type(path: &str) -> MediaType {
    let parsed = parse_media_path(path);
    if parsed.is_episode() {
        MediaType::Episode
    } else if parsed.season.is_some() {
        MediaType::Season
    } else if parsed.year.is_some() {
        MediaType::Movie
    } else {
        MediaType::Unknown
    }
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() <= 5 && !ext.contains(' ') => stem,
        _ => name,
    }
}

fn season_from_dir(dir: &str) -> Option<u32> {
    let captures = SEASON_DIR.captures(dir.trim())?;
    (1..=3)
        .find_map(|group| captures.get(group))
        .and_then(|m| m.as_str().parse().ok())
}

/// Season, episode and the byte offset where the marker starts
fn episode_marker(stem: &str) -> Option<(u32, u32, usize)> {
    for pattern in [&*EPISODE_SXXEYY, &*EPISODE_NXMM] {
        if let Some(captures) = pattern.captures(stem) {
            let whole = captures.get(0)?;
            let season = captures.get(1)?.as_str().parse().ok()?;
            let episode = captures.get(2)?.as_str().parse().ok()?;
            return Some((season, episode, whole.start()));
        }
    }
    None
}

fn split_title_year(raw: &str) -> (String, Option<i32>) {
    let without_noise = RELEASE_NOISE.replace(raw, "");
    let (title_part, year) = match YEAR.captures(&without_noise) {
        Some(captures) => {
            let start = captures.get(0).map(|m| m.start()).unwrap_or(without_noise.len());
            let year = captures.get(1).and_then(|m| m.as_str().parse().ok());
            (without_noise[..start].to_string(), year)
        }
        None => (without_noise.to_string(), None),
    };
    (clean_title(&title_part), year)
}

fn clean_title(raw: &str) -> String {
    raw.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == '(' || c == '[' || c.is_whitespace())
        .to_string()
}
