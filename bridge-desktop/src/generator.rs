//! `.strm` proxy generation

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    proxy::ProxyGenerator,
    remote::RemoteEntry,
};
use std::path::PathBuf;
use tracing::info;

/// Writes `<stem>.strm` files mirroring the remote directory layout
pub struct StrmProxyGenerator {
    proxy_root: PathBuf,
    remote_root: String,
    url_base: String,
    encode_urls: bool,
}

impl StrmProxyGenerator {
    pub fn new(
        proxy_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
        url_base: impl Into<String>,
    ) -> Self {
        let remote_root = remote_root.into().replace('\\', "/");
        Self {
            proxy_root: proxy_root.into(),
            remote_root: remote_root.trim_end_matches('/').to_string(),
            url_base: url_base.into().trim_end_matches('/').to_string(),
            encode_urls: false,
        }
    }

    /// Percent-encode each path segment written into the proxy
    pub fn with_url_encoding(mut self, enabled: bool) -> Self {
        self.encode_urls = enabled;
        self
    }

    fn relative_media_path<'a>(&self, remote_path: &'a str) -> Option<&'a str> {
        if self.remote_root.is_empty() {
            return Some(remote_path.trim_start_matches('/'));
        }
        let rest = remote_path.strip_prefix(&self.remote_root)?;
        rest.strip_prefix('/')
    }

    /// File contents for a remote path
    pub fn proxy_contents(&self, remote_path: &str) -> String {
        let path = if self.encode_urls {
            remote_path
                .split('/')
                .map(|segment| urlencoding::encode(segment).into_owned())
                .collect::<Vec<_>>()
                .join("/")
        } else {
            remote_path.to_string()
        };
        format!("{}/d{}", self.url_base, path)
    }
}

#[async_trait]
impl ProxyGenerator for StrmProxyGenerator {
    async fn generate_proxy(&self, entry: &RemoteEntry) -> Result<String> {
        if entry.is_dir {
            return Err(BridgeError::OperationFailed(format!(
                "Cannot generate a proxy for directory {}",
                entry.path
            )));
        }

        let relative = self.relative_media_path(&entry.path).ok_or_else(|| {
            BridgeError::OperationFailed(format!(
                "{} is outside remote root {}",
                entry.path, self.remote_root
            ))
        })?;

        let proxy_relative = match relative.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() && !stem.ends_with('/') => {
                format!("{}.strm", stem)
            }
            _ => format!("{}.strm", relative),
        };

        let mut target = self.proxy_root.clone();
        for segment in proxy_relative.split('/') {
            target.push(segment);
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, self.proxy_contents(&entry.path)).await?;

        info!(path = %proxy_relative, remote = %entry.path, "Proxy file written");
        Ok(proxy_relative)
    }
}
