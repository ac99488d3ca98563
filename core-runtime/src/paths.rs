//! # Path Mapper
//!
//! Translation between the three path spaces the subsystem works in:
//!
//! | Space   | Example                              |
//! |---------|--------------------------------------|
//! | proxy   | `movies/Alien (1979).strm` (relative to `proxy_root`) |
//! | remote  | `/media/movies/Alien (1979).mkv`     |
//! | library | `/data/strm/movies/Alien (1979).strm` |
//!
//! Every mapping is a prefix substitution. Input paths are normalised first:
//! backslashes become `/` and duplicate separators collapse. Only absolute
//! paths have the root stripped; a path without a leading slash, or one that
//! does not live under the expected root, is taken to be relative already.

use crate::config::CoreConfig;
use crate::error::{Error, Result};

/// Extension of generated proxy files
pub const PROXY_EXTENSION: &str = "strm";

/// Prefix substitution between proxy, remote and library roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    proxy_root: String,
    remote_root: String,
    library_root: String,
}

impl PathMapper {
    /// Roots are stored as given; emptiness is checked when a mapping runs.
    pub fn new(
        proxy_root: impl Into<String>,
        remote_root: impl Into<String>,
        library_root: impl Into<String>,
    ) -> Self {
        Self {
            proxy_root: normalize(&proxy_root.into()),
            remote_root: normalize(&remote_root.into()),
            library_root: normalize(&library_root.into()),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(
            config.proxy_root.clone(),
            config.remote_root.clone(),
            config.library_root.clone(),
        )
    }

    pub fn proxy_root(&self) -> &str {
        &self.proxy_root
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Proxy path (relative or under the proxy root) to its remote counterpart
    pub fn to_remote(&self, local_path: &str) -> Result<String> {
        let remote_root = require_root("remote", &self.remote_root)?;
        let relative = self.relative_to_proxy(local_path)?;
        Ok(join(remote_root, &relative))
    }

    /// Proxy path to the path the media-library server sees
    pub fn to_library(&self, local_path: &str) -> Result<String> {
        let library_root = require_root("library", &self.library_root)?;
        let relative = self.relative_to_proxy(local_path)?;
        Ok(join(library_root, &relative))
    }

    /// Absolute local filesystem path for a proxy-relative path
    pub fn to_local(&self, local_path: &str) -> Result<String> {
        let proxy_root = require_root("proxy", &self.proxy_root)?;
        let relative = self.relative_to_proxy(local_path)?;
        Ok(join(proxy_root, &relative))
    }

    /// Strip the proxy root, yielding the canonical relative form
    pub fn relative_to_proxy(&self, local_path: &str) -> Result<String> {
        let proxy_root = require_root("proxy", &self.proxy_root)?;
        Ok(strip_root(proxy_root, &normalize(local_path)))
    }

    /// Remote path to its position relative to the remote root
    pub fn relative_from_remote(&self, remote_path: &str) -> Result<String> {
        let remote_root = require_root("remote", &self.remote_root)?;
        Ok(strip_root(remote_root, &normalize(remote_path)))
    }

    /// Relative media path to the relative path of its proxy file
    ///
    /// `movies/A.mkv` becomes `movies/A.strm`.
    pub fn proxy_path_for(media_relative: &str) -> String {
        let normalized = normalize(media_relative);
        let trimmed = normalized.trim_start_matches('/');
        let (dir, name) = match trimmed.rsplit_once('/') {
            Some((dir, name)) => (Some(dir), name),
            None => (None, trimmed),
        };
        let stem = match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        };
        match dir {
            Some(dir) => format!("{}/{}.{}", dir, stem, PROXY_EXTENSION),
            None => format!("{}.{}", stem, PROXY_EXTENSION),
        }
    }
}

fn require_root<'a>(label: &str, root: &'a str) -> Result<&'a str> {
    if root.is_empty() {
        return Err(Error::Config(format!(
            "{} root is not configured",
            capitalize(label)
        )));
    }
    Ok(root)
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Forward slashes, no duplicate or trailing separators (except bare `/`)
pub fn normalize(path: &str) -> String {
    let replaced = path.trim().replace('\\', "/");
    let absolute = replaced.starts_with('/');
    let joined = replaced
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");

    match (absolute, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", joined),
        (false, _) => joined,
    }
}

/// Only absolute paths carry the root; anything else is already relative
fn strip_root(root: &str, path: &str) -> String {
    let Some(bare_path) = path.strip_prefix('/') else {
        return path.to_string();
    };
    let bare_root = root.trim_start_matches('/');
    if bare_root.is_empty() {
        return bare_path.to_string();
    }
    if bare_path == bare_root {
        return String::new();
    }
    match bare_path.strip_prefix(bare_root) {
        Some(rest) if rest.starts_with('/') => rest[1..].to_string(),
        _ => bare_path.to_string(),
    }
}

fn join(root: &str, relative: &str) -> String {
    if relative.is_empty() {
        return root.to_string();
    }
    if root == "/" {
        return format!("/{}", relative);
    }
    format!("{}/{}", root, relative)
}
