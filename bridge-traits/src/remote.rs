//! Remote Source Abstractions
//!
//! Contracts for the cloud-drive style file tree the proxies point into.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single entry in a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Entry name (last path component)
    pub name: String,
    /// Absolute remote path, `/`-separated
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Last modification time (Unix seconds), when the source reports one
    pub modified_at: Option<i64>,
}

impl RemoteEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        Self {
            name: file_name(&path).to_string(),
            path,
            is_dir: false,
            size,
            modified_at: None,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: file_name(&path).to_string(),
            path,
            is_dir: true,
            size: 0,
            modified_at: None,
        }
    }

    /// Lower-cased extension of the entry name, if any
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Remote directory listing trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::remote::RemoteLister;
///
/// async fn count_files(lister: &dyn RemoteLister) -> Result<usize> {
///     let entries = lister.list_directory("/media/movies").await?;
///     Ok(entries.iter().filter(|e| !e.is_dir).count())
/// }
/// ```
#[async_trait]
pub trait RemoteLister: Send + Sync {
    /// List the immediate children of a remote directory
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Unreachable`](crate::error::BridgeError::Unreachable) when the source cannot be contacted
    /// - [`BridgeError::NotFound`](crate::error::BridgeError::NotFound) when the directory does not exist
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Check whether a single remote file exists
    ///
    /// Absence is `Ok(false)`; only transport failures are errors.
    async fn probe_file(&self, path: &str) -> Result<bool>;
}

/// Source of "what changed" hints for incremental scans
#[async_trait]
pub trait ChangeHintSource: Send + Sync {
    /// Remote directories changed after the given Unix timestamp (seconds)
    async fn changed_directories(&self, since: i64) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_and_extension() {
        let entry = RemoteEntry::file("/media/movies/Alien (1979).MKV", 42);
        assert_eq!(entry.name, "Alien (1979).MKV");
        assert_eq!(entry.extension(), Some("mkv".to_string()));
        assert!(!entry.is_dir);

        let dir = RemoteEntry::dir("/media/movies/");
        assert_eq!(dir.name, "movies");
        assert_eq!(dir.extension(), None);

        assert_eq!(RemoteEntry::file("/a/.hidden", 0).extension(), None);
    }
}
