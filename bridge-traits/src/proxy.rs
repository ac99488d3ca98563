//! Proxy Tree Abstractions
//!
//! The local tree of pointer files, and the collaborator that writes new ones.
//! All proxy paths here are relative to the proxy root, `/`-separated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::remote::RemoteEntry;

/// A proxy file found in the local tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyFile {
    /// Path relative to the proxy root, e.g. `movies/Alien (1979).strm`
    pub path: String,
    /// Absolute remote path the proxy resolves to; `None` if unparseable
    pub target: Option<String>,
}

/// Read/delete access to the local proxy tree
#[async_trait]
pub trait ProxyTree: Send + Sync {
    /// Every proxy file under the root
    async fn list_proxies(&self) -> Result<Vec<ProxyFile>>;

    /// A single proxy, or `None` if the file does not exist
    async fn read_proxy(&self, path: &str) -> Result<Option<ProxyFile>>;

    /// Delete a proxy file
    ///
    /// Returns `false` if it was already gone.
    async fn delete_proxy(&self, path: &str) -> Result<bool>;
}

/// Proxy-generation collaborator
///
/// # Example
///
/// ```ignore
/// let entry = RemoteEntry::file("/media/movies/A.mkv", 0);
/// let local = generator.generate_proxy(&entry).await?;
/// assert_eq!(local, "movies/A.strm");
/// ```
#[async_trait]
pub trait ProxyGenerator: Send + Sync {
    /// Write the proxy for a remote entry, returning its proxy-relative path
    async fn generate_proxy(&self, entry: &RemoteEntry) -> Result<String>;
}
