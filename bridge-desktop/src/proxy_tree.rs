//! Local `.strm` proxy tree backed by `tokio::fs`

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    proxy::{ProxyFile, ProxyTree},
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PROXY_EXTENSION: &str = "strm";

/// Proxy tree rooted at a local directory
///
/// Proxy files contain a single URL of the form `{url_base}/d{remote_path}`,
/// with the remote path optionally percent-encoded.
pub struct LocalProxyTree {
    root: PathBuf,
    url_base: String,
}

impl LocalProxyTree {
    pub fn new(root: impl Into<PathBuf>, url_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_base: url_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in relative.split(['/', '\\']).filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    fn relative(&self, absolute: &Path) -> Option<String> {
        let rest = absolute.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = rest
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }

    /// Extract the remote path a proxy's contents point to
    pub fn parse_target(&self, contents: &str) -> Option<String> {
        let url = contents.lines().map(str::trim).find(|l| !l.is_empty())?;

        let encoded = match url.strip_prefix(&self.url_base) {
            Some(rest) => rest.strip_prefix("/d")?,
            None => {
                // Base URL changed since the proxy was written; fall back to the path part
                let after_scheme = url.split_once("://")?.1;
                let path = &after_scheme[after_scheme.find('/')?..];
                path.strip_prefix("/d")?
            }
        };

        if !encoded.starts_with('/') {
            return None;
        }

        let decoded = urlencoding::decode(encoded).ok()?;
        Some(decoded.into_owned())
    }

    fn map_io_error(path: &Path, e: std::io::Error) -> BridgeError {
        BridgeError::OperationFailed(format!("{}: {}", path.display(), e))
    }
}

fn is_proxy_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(PROXY_EXTENSION))
        .unwrap_or(false)
}

#[async_trait]
impl ProxyTree for LocalProxyTree {
    async fn list_proxies(&self) -> Result<Vec<ProxyFile>> {
        let mut proxies = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound && dir == self.root => {
                    debug!(root = %self.root.display(), "Proxy root does not exist yet");
                    return Ok(proxies);
                }
                Err(e) => return Err(Self::map_io_error(&dir, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Self::map_io_error(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Self::map_io_error(&path, e))?;

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !is_proxy_file(&path) {
                    continue;
                }

                let Some(relative) = self.relative(&path) else {
                    continue;
                };
                let target = match tokio::fs::read_to_string(&path).await {
                    Ok(contents) => self.parse_target(&contents),
                    Err(e) => {
                        warn!(path = %relative, error = %e, "Unreadable proxy file");
                        None
                    }
                };
                proxies.push(ProxyFile {
                    path: relative,
                    target,
                });
            }
        }

        debug!(count = proxies.len(), "Listed proxy tree");
        Ok(proxies)
    }

    async fn read_proxy(&self, path: &str) -> Result<Option<ProxyFile>> {
        let absolute = self.absolute(path);
        match tokio::fs::read_to_string(&absolute).await {
            Ok(contents) => Ok(Some(ProxyFile {
                path: path.trim_start_matches('/').replace('\\', "/"),
                target: self.parse_target(&contents),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io_error(&absolute, e)),
        }
    }

    async fn delete_proxy(&self, path: &str) -> Result<bool> {
        let absolute = self.absolute(path);
        match tokio::fs::remove_file(&absolute).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(&absolute, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, contents).await.unwrap();
    }

    #[test]
    fn test_parse_target() {
        let tree = LocalProxyTree::new("/tmp/none", "http://alist.local:5244/");

        assert_eq!(
            tree.parse_target("http://alist.local:5244/d/media/movies/A.mkv\n"),
            Some("/media/movies/A.mkv".to_string())
        );
        assert_eq!(
            tree.parse_target("http://alist.local:5244/d/media/Alien%20%281979%29.mkv"),
            Some("/media/Alien (1979).mkv".to_string())
        );
        assert_eq!(
            tree.parse_target("http://old-host:5244/d/media/B.mkv"),
            Some("/media/B.mkv".to_string())
        );
        assert_eq!(tree.parse_target("garbage"), None);
        assert_eq!(tree.parse_target(""), None);
    }

    #[tokio::test]
    async fn test_list_read_and_delete() {
        let dir = TempDir::new().unwrap();
        let tree = LocalProxyTree::new(dir.path(), "http://alist.local");

        write(dir.path(), "movies/A.strm", "http://alist.local/d/media/movies/A.mkv").await;
        write(dir.path(), "tv/Show/Season 1/S01E01.strm", "not a url").await;
        write(dir.path(), "movies/poster.jpg", "binary").await;

        let mut proxies = tree.list_proxies().await.unwrap();
        proxies.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0].path, "movies/A.strm");
        assert_eq!(proxies[0].target.as_deref(), Some("/media/movies/A.mkv"));
        assert_eq!(proxies[1].path, "tv/Show/Season 1/S01E01.strm");
        assert_eq!(proxies[1].target, None);

        let read = tree.read_proxy("movies/A.strm").await.unwrap().unwrap();
        assert_eq!(read, proxies[0]);
        assert!(tree.read_proxy("movies/missing.strm").await.unwrap().is_none());

        assert!(tree.delete_proxy("movies/A.strm").await.unwrap());
        assert!(!tree.delete_proxy("movies/A.strm").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let tree = LocalProxyTree::new(dir.path().join("absent"), "http://alist.local");
        assert!(tree.list_proxies().await.unwrap().is_empty());
    }
}
