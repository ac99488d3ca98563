//! # Core Configuration Module
//!
//! Builder-based configuration for the reconciliation core.
//!
//! ## Overview
//!
//! `CoreConfig` carries the three path spaces the subsystem translates between
//! (local proxy root, remote source root, media-library root), the two HTTP
//! endpoints it talks to, and the settings for the proxy files it writes.
//! `build()` validates everything up front so a misconfigured root surfaces as
//! [`Error::Config`] at startup rather than halfway through a scan.
//!
//! ## Required Settings
//!
//! - `proxy_root`, `remote_root`, `library_root`
//! - `remote_endpoint` (base URL + token)
//! - `library_endpoint` (base URL + API key)
//!
//! ## Optional Settings
//!
//! - `database_path` - defaults to `reconcile.db` next to the proxy root
//! - `proxy_url_base` - defaults to the remote endpoint's base URL
//! - `video_extensions` - defaults to [`DEFAULT_VIDEO_EXTENSIONS`]
//! - `HttpClient` - desktop default (reqwest) when `desktop-shims` is enabled
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .proxy_root("/mnt/strm")
//!     .remote_root("/media")
//!     .library_root("/data/strm")
//!     .remote_endpoint("http://alist.local:5244", "alist-token")
//!     .library_endpoint("http://emby.local:8096", "emby-key")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::logging::redact_if_sensitive;
use bridge_traits::HttpClient;
use std::path::PathBuf;
use std::sync::Arc;

/// Extensions treated as media when scanning the remote tree
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "m4v", "rmvb", "ts", "webm",
];

/// Remote source (Alist-like) endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub base_url: String,
    pub token: String,
}

impl std::fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("base_url", &self.base_url)
            .field("token", &redact_if_sensitive("token", &self.token))
            .finish()
    }
}

/// Media-library (Emby-like) endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct LibraryEndpoint {
    pub base_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for LibraryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &redact_if_sensitive("api_key", &self.api_key))
            .finish()
    }
}

/// Core configuration for the reconciliation subsystem.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Local directory holding the proxy tree
    pub proxy_root: String,

    /// Directory on the remote source mirrored by the proxy tree
    pub remote_root: String,

    /// The proxy root as the media-library server sees it
    pub library_root: String,

    /// Path to the SQLite database file
    pub database_path: PathBuf,

    pub remote_endpoint: RemoteEndpoint,

    pub library_endpoint: LibraryEndpoint,

    /// URL prefix written into proxy files (`{base}/d{remote_path}`)
    pub proxy_url_base: String,

    /// Percent-encode the remote path inside proxy files
    pub encode_proxy_urls: bool,

    /// Lower-case extensions, without the dot
    pub video_extensions: Vec<String>,

    /// HTTP client for the provider connectors (optional with desktop default)
    pub http_client: Option<Arc<dyn HttpClient>>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("proxy_root", &self.proxy_root)
            .field("remote_root", &self.remote_root)
            .field("library_root", &self.library_root)
            .field("database_path", &self.database_path)
            .field("remote_endpoint", &self.remote_endpoint)
            .field("library_endpoint", &self.library_endpoint)
            .field("proxy_url_base", &self.proxy_url_base)
            .field("encode_proxy_urls", &self.encode_proxy_urls)
            .field("video_extensions", &self.video_extensions)
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - All three path roots are non-empty
    /// - Both endpoints have a base URL and a credential
    /// - At least one video extension is configured
    pub fn validate(&self) -> Result<()> {
        if self.proxy_root.trim().is_empty() {
            return Err(Error::Config("Proxy root cannot be empty".to_string()));
        }

        if self.remote_root.trim().is_empty() {
            return Err(Error::Config("Remote root cannot be empty".to_string()));
        }

        if self.library_root.trim().is_empty() {
            return Err(Error::Config("Library root cannot be empty".to_string()));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        validate_url("Remote endpoint", &self.remote_endpoint.base_url)?;
        if self.remote_endpoint.token.is_empty() {
            return Err(Error::Config(
                "Remote endpoint token cannot be empty".to_string(),
            ));
        }

        validate_url("Library endpoint", &self.library_endpoint.base_url)?;
        if self.library_endpoint.api_key.is_empty() {
            return Err(Error::Config(
                "Library endpoint API key cannot be empty".to_string(),
            ));
        }

        validate_url("Proxy URL base", &self.proxy_url_base)?;

        if self.video_extensions.is_empty() {
            return Err(Error::Config(
                "At least one video extension must be configured".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a file name carries one of the configured video extensions
    pub fn is_video_file(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.video_extensions.iter().any(|v| *v == ext)
            }
            _ => false,
        }
    }
}

fn validate_url(label: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::Config(format!("{} URL cannot be empty", label)));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(Error::Config(format!(
            "{} URL must start with http:// or https:// (got '{}')",
            label, url
        )));
    }
    Ok(())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for the remote and library connectors. \
                 Enable the 'desktop-shims' feature to use the default reqwest client, \
                 or inject one with .http_client()."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) once all required roots and
/// endpoints are set; missing values produce actionable [`Error::Config`]s.
#[derive(Default)]
pub struct CoreConfigBuilder {
    proxy_root: Option<String>,
    remote_root: Option<String>,
    library_root: Option<String>,
    database_path: Option<PathBuf>,
    remote_endpoint: Option<RemoteEndpoint>,
    library_endpoint: Option<LibraryEndpoint>,
    proxy_url_base: Option<String>,
    encode_proxy_urls: bool,
    video_extensions: Option<Vec<String>>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl CoreConfigBuilder {
    /// Sets the local proxy root.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().proxy_root("/mnt/strm");
    /// ```
    pub fn proxy_root(mut self, root: impl Into<String>) -> Self {
        self.proxy_root = Some(root.into());
        self
    }

    /// Sets the remote source root mirrored by the proxy tree.
    pub fn remote_root(mut self, root: impl Into<String>) -> Self {
        self.remote_root = Some(root.into());
        self
    }

    /// Sets the proxy root as seen by the media-library server.
    ///
    /// When the library server runs in a container this is usually the
    /// container-side mount point of `proxy_root`.
    pub fn library_root(mut self, root: impl Into<String>) -> Self {
        self.library_root = Some(root.into());
        self
    }

    /// Sets the database path.
    ///
    /// Default: `reconcile.db` inside the proxy root's parent directory.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the remote source endpoint.
    ///
    /// # Arguments
    ///
    /// * `base_url` - e.g. `http://alist.local:5244`
    /// * `token` - sent verbatim in the `Authorization` header
    pub fn remote_endpoint(mut self, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        self.remote_endpoint = Some(RemoteEndpoint {
            base_url: trim_url(base_url.into()),
            token: token.into(),
        });
        self
    }

    /// Sets the media-library endpoint.
    ///
    /// # Arguments
    ///
    /// * `base_url` - e.g. `http://emby.local:8096`
    /// * `api_key` - passed as the `api_key` query parameter
    pub fn library_endpoint(
        mut self,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        self.library_endpoint = Some(LibraryEndpoint {
            base_url: trim_url(base_url.into()),
            api_key: api_key.into(),
        });
        self
    }

    /// Sets the URL prefix written into proxy files.
    ///
    /// Default: the remote endpoint's base URL.
    pub fn proxy_url_base(mut self, base: impl Into<String>) -> Self {
        self.proxy_url_base = Some(trim_url(base.into()));
        self
    }

    /// Percent-encodes the remote path written into proxy files.
    ///
    /// Default: false
    pub fn encode_proxy_urls(mut self, enabled: bool) -> Self {
        self.encode_proxy_urls = enabled;
        self
    }

    /// Replaces the set of video extensions (case-insensitive, dot optional).
    pub fn video_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.video_extensions = Some(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        );
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - A required root or endpoint is missing or empty
    /// - No HTTP client is available
    pub fn build(self) -> Result<CoreConfig> {
        let proxy_root = self.proxy_root.ok_or_else(|| {
            Error::Config("Proxy root is required. Use .proxy_root() to set it.".to_string())
        })?;

        let remote_root = self.remote_root.ok_or_else(|| {
            Error::Config("Remote root is required. Use .remote_root() to set it.".to_string())
        })?;

        let library_root = self.library_root.ok_or_else(|| {
            Error::Config("Library root is required. Use .library_root() to set it.".to_string())
        })?;

        let remote_endpoint = self.remote_endpoint.ok_or_else(|| {
            Error::Config(
                "Remote endpoint is required. Use .remote_endpoint() to set it.".to_string(),
            )
        })?;

        let library_endpoint = self.library_endpoint.ok_or_else(|| {
            Error::Config(
                "Library endpoint is required. Use .library_endpoint() to set it.".to_string(),
            )
        })?;

        let database_path = self.database_path.unwrap_or_else(|| {
            PathBuf::from(&proxy_root)
                .parent()
                .map(|parent| parent.join("reconcile.db"))
                .unwrap_or_else(|| PathBuf::from("reconcile.db"))
        });

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = CoreConfig {
            proxy_url_base: self
                .proxy_url_base
                .unwrap_or_else(|| remote_endpoint.base_url.clone()),
            proxy_root,
            remote_root,
            library_root,
            database_path,
            remote_endpoint,
            library_endpoint,
            encode_proxy_urls: self.encode_proxy_urls,
            video_extensions: self.video_extensions.unwrap_or_else(|| {
                DEFAULT_VIDEO_EXTENSIONS
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect()
            }),
            http_client: Some(http_client),
        };

        config.validate()?;

        Ok(config)
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HttpRequest, HttpResponse};

    struct NoopHttpClient;

    #[async_trait]
    impl HttpClient for NoopHttpClient {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpResponse, BridgeError> {
            Err(BridgeError::NotAvailable("noop".to_string()))
        }
    }

    fn base_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .proxy_root("/mnt/strm")
            .remote_root("/media")
            .library_root("/data/strm")
            .remote_endpoint("http://alist.local:5244/", "token")
            .library_endpoint("http://emby.local:8096", "key")
            .http_client(Arc::new(NoopHttpClient))
    }

    #[test]
    fn test_build_with_defaults() {
        let config = base_builder().build().unwrap();

        assert_eq!(config.remote_endpoint.base_url, "http://alist.local:5244");
        assert_eq!(config.proxy_url_base, "http://alist.local:5244");
        assert_eq!(config.database_path, PathBuf::from("/mnt/reconcile.db"));
        assert!(config.video_extensions.contains(&"mkv".to_string()));
        assert!(!config.encode_proxy_urls);
        assert!(config.http_client.is_some());
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let result = CoreConfig::builder()
            .remote_root("/media")
            .library_root("/data/strm")
            .build();

        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("Proxy root is required")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_root_fails_validation() {
        let result = base_builder().library_root("  ").build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("Library root")));
    }

    #[test]
    fn test_endpoint_url_scheme_validated() {
        let result = base_builder()
            .library_endpoint("emby.local:8096", "key")
            .build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("http://")));
    }

    #[test]
    fn test_empty_token_rejected() {
        let result = base_builder().remote_endpoint("http://alist.local", "").build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("token")));
    }

    #[test]
    fn test_video_extensions_normalised() {
        let config = base_builder()
            .video_extensions([".MKV", "mp4", ""])
            .build()
            .unwrap();

        assert_eq!(config.video_extensions, vec!["mkv", "mp4"]);
        assert!(config.is_video_file("Alien (1979).MkV"));
        assert!(!config.is_video_file("poster.jpg"));
        assert!(!config.is_video_file(".mkv"));
    }

    #[test]
    fn test_empty_extension_list_rejected() {
        let result = base_builder().video_extensions(Vec::<String>::new()).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = base_builder().build().unwrap();
        let rendered = format!("{:?}", config);

        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("\"token\""));
        assert!(rendered.contains("HttpClient { ... }"));
    }
}
