//! Emby API connector
//!
//! Implements [`MediaLibrary`] against the Emby REST API. The API key travels
//! as the `api_key` query parameter on every request.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::library::{LibraryItem, LibraryItemKind, MediaLibrary};
use core_runtime::config::LibraryEndpoint;
use core_runtime::paths::normalize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{EmbyError, Result};
use crate::types::ItemsResponse;

const ITEM_FIELDS: &str = "Path,ProductionYear";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Emby API connector
///
/// # Example
///
/// ```ignore
/// use provider_emby::EmbyConnector;
/// use bridge_traits::library::MediaLibrary;
///
/// let library = EmbyConnector::new(http_client, &config.library_endpoint);
/// if let Some(item) = library.find_item_by_path("/data/strm/movies/A.strm").await? {
///     library.refresh_item(&item.id).await?;
/// }
/// ```
pub struct EmbyConnector {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    api_key: String,
    retry_policy: RetryPolicy,
}

impl EmbyConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, endpoint: &LibraryEndpoint) -> Self {
        Self {
            http_client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}?api_key={}",
            self.base_url,
            path,
            urlencoding::encode(&self.api_key)
        )
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self
            .http_client
            .execute_with_retry(
                request.header("Accept", "application/json").timeout(REQUEST_TIMEOUT),
                self.retry_policy.clone(),
            )
            .await?;

        if !response.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(EmbyError::from_status(response.status, message));
        }
        Ok(response)
    }

    async fn get_items(&self, request: HttpRequest) -> Result<Vec<LibraryItem>> {
        let response = self.send(request).await?;
        let parsed: ItemsResponse = response
            .json()
            .map_err(|e| EmbyError::ParseError(e.to_string()))?;

        debug!(
            returned = parsed.items.len(),
            total = parsed.total_record_count,
            "Emby items query"
        );
        Ok(parsed.items.into_iter().map(LibraryItem::from).collect())
    }
}

#[async_trait]
impl MediaLibrary for EmbyConnector {
    /// Exact match on the item's `Path`
    #[instrument(skip(self))]
    async fn find_item_by_path(&self, path: &str) -> BridgeResult<Option<LibraryItem>> {
        let wanted = normalize(path);
        let request = HttpRequest::get(self.url("/Items"))
            .query("Recursive", "true")
            .query("Fields", ITEM_FIELDS)
            .query("Path", &urlencoding::encode(path));

        let items = self.get_items(request).await?;
        Ok(items.into_iter().find(|item| {
            item.path
                .as_deref()
                .map_or(false, |candidate| normalize(candidate) == wanted)
        }))
    }

    #[instrument(skip(self))]
    async fn search_by_title(
        &self,
        title: &str,
        kind: LibraryItemKind,
    ) -> BridgeResult<Vec<LibraryItem>> {
        let item_types = match kind {
            LibraryItemKind::Movie | LibraryItemKind::Series => kind.as_str(),
            _ => "Movie,Series",
        };
        let request = HttpRequest::get(self.url("/Items"))
            .query("Recursive", "true")
            .query("IncludeItemTypes", item_types)
            .query("Fields", ITEM_FIELDS)
            .query("SearchTerm", &urlencoding::encode(title));

        Ok(self.get_items(request).await?)
    }

    async fn list_seasons(&self, series_id: &str) -> BridgeResult<Vec<LibraryItem>> {
        let request = HttpRequest::get(self.url(&format!(
            "/Shows/{}/Seasons",
            urlencoding::encode(series_id)
        )))
        .query("Fields", ITEM_FIELDS);

        Ok(self.get_items(request).await?)
    }

    async fn list_episodes(&self, series_id: &str, season: u32) -> BridgeResult<Vec<LibraryItem>> {
        let request = HttpRequest::get(self.url(&format!(
            "/Shows/{}/Episodes",
            urlencoding::encode(series_id)
        )))
        .query("Season", &season.to_string())
        .query("Fields", ITEM_FIELDS);

        Ok(self.get_items(request).await?)
    }

    #[instrument(skip(self))]
    async fn refresh_item(&self, item_id: &str) -> BridgeResult<()> {
        let request = HttpRequest::post(self.url(&format!(
            "/Items/{}/Refresh",
            urlencoding::encode(item_id)
        )))
        .query("Recursive", "true")
        .query("MetadataRefreshMode", "FullRefresh")
        .query("ImageRefreshMode", "FullRefresh");

        match self.send(request).await {
            Ok(response) => {
                info!(item_id, status = response.status, "Library refresh requested");
                Ok(())
            }
            Err(EmbyError::ApiError {
                status_code: 404, ..
            }) => Err(EmbyError::ItemNotFound {
                item_id: item_id.to_string(),
            }
            .into()),
            Err(e) => {
                warn!(item_id, error = %e, "Library refresh failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bridge_traits::http::HttpMethod;
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
            async fn execute_with_retry(
                &self,
                request: HttpRequest,
                policy: RetryPolicy,
            ) -> BridgeResult<HttpResponse>;
        }
    }

    fn endpoint() -> LibraryEndpoint {
        LibraryEndpoint {
            base_url: "http://emby.local:8096/emby/".to_string(),
            api_key: "key-1".to_string(),
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn test_find_item_by_path_requires_exact_match() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .times(1)
            .withf(|request, _| {
                request.method == HttpMethod::Get
                    && request.url.starts_with("http://emby.local:8096/emby/Items?api_key=key-1")
                    && request.url.contains("Path=%2Fdata%2Fstrm%2Fmovies%2FA.strm")
            })
            .returning(|_, _| {
                Ok(response(
                    200,
                    r#"{"Items":[
                        {"Id":"1","Name":"A Sequel","Type":"Movie","Path":"/data/strm/movies/A2.strm"},
                        {"Id":"2","Name":"A","Type":"Movie","Path":"/data/strm/movies/A.strm"}
                    ],"TotalRecordCount":2}"#,
                ))
            });

        let library = EmbyConnector::new(Arc::new(mock_http), &endpoint());
        let item = library
            .find_item_by_path("/data/strm/movies/A.strm")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(item.id, "2");
    }

    #[tokio::test]
    async fn test_find_item_by_path_none() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .returning(|_, _| Ok(response(200, r#"{"Items":[],"TotalRecordCount":0}"#)));

        let library = EmbyConnector::new(Arc::new(mock_http), &endpoint());
        assert!(library
            .find_item_by_path("/data/strm/movies/Z.strm")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_search_by_title_restricts_type() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .withf(|request, _| {
                request.url.contains("IncludeItemTypes=Series")
                    && request.url.contains("SearchTerm=Breaking%20Bad")
            })
            .returning(|_, _| {
                Ok(response(
                    200,
                    r#"{"Items":[{"Id":"s1","Name":"Breaking Bad","Type":"Series","ProductionYear":2008}]}"#,
                ))
            });

        let library = EmbyConnector::new(Arc::new(mock_http), &endpoint());
        let items = library
            .search_by_title("Breaking Bad", LibraryItemKind::Series)
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, LibraryItemKind::Series);
    }

    #[tokio::test]
    async fn test_seasons_and_episodes() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .returning(|request, _| {
                let body = if request.url.contains("/Shows/s1/Seasons") {
                    r#"{"Items":[{"Id":"season-2","Name":"Season 2","Type":"Season","IndexNumber":2}]}"#
                } else if request.url.contains("/Shows/s1/Episodes") && request.url.contains("Season=2") {
                    r#"{"Items":[{"Id":"e5","Name":"Pilot","Type":"Episode","IndexNumber":5}]}"#
                } else {
                    r#"{"Items":[]}"#
                };
                Ok(response(200, body))
            });

        let library = EmbyConnector::new(Arc::new(mock_http), &endpoint());

        let seasons = library.list_seasons("s1").await.unwrap();
        assert_eq!(seasons[0].index_number, Some(2));

        let episodes = library.list_episodes("s1", 2).await.unwrap();
        assert_eq!(episodes[0].id, "e5");
        assert_eq!(episodes[0].kind, LibraryItemKind::Episode);
    }

    #[tokio::test]
    async fn test_refresh_item() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .times(1)
            .withf(|request, _| {
                request.method == HttpMethod::Post
                    && request.url.contains("/Items/42/Refresh?api_key=key-1")
                    && request.url.contains("Recursive=true")
                    && request.url.contains("MetadataRefreshMode=FullRefresh")
                    && request.url.contains("ImageRefreshMode=FullRefresh")
            })
            .returning(|_, _| Ok(response(204, "")));

        let library = EmbyConnector::new(Arc::new(mock_http), &endpoint());
        library.refresh_item("42").await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_errors_map_to_bridge_errors() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .returning(|request, _| {
                if request.url.contains("/Items/gone/") {
                    Ok(response(404, "Not Found"))
                } else {
                    Ok(response(503, "Service Unavailable"))
                }
            });

        let library = EmbyConnector::new(Arc::new(mock_http), &endpoint());

        assert!(matches!(
            library.refresh_item("gone").await,
            Err(BridgeError::NotFound(id)) if id == "gone"
        ));
        assert!(matches!(
            library.refresh_item("busy").await,
            Err(BridgeError::Unreachable(_))
        ));
    }
}
