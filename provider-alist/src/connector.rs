//! AList API connector
//!
//! Implements [`RemoteLister`] and [`ChangeHintSource`] over the AList
//! filesystem API.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::remote::{ChangeHintSource, RemoteEntry, RemoteLister};
use chrono::{DateTime, Utc};
use core_runtime::config::RemoteEndpoint;
use core_runtime::paths::normalize;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{AlistError, Result};
use crate::types::{Envelope, FsObject, GetRequest, ListData, ListRequest};

/// Entries requested per `fs/list` page
const DEFAULT_PAGE_SIZE: u32 = 200;

/// Listing a large directory through a cloud driver can be slow
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// AList API connector
///
/// # Example
///
/// ```ignore
/// use provider_alist::AlistConnector;
/// use bridge_traits::remote::RemoteLister;
///
/// let connector = AlistConnector::new(http_client, &config.remote_endpoint, "/media");
/// let entries = connector.list_directory("/media/movies").await?;
/// ```
pub struct AlistConnector {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    token: String,
    /// Root whose top-level directories are reported as change hints
    remote_root: String,
    page_size: u32,
    refresh: bool,
    retry_policy: RetryPolicy,
}

impl AlistConnector {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        endpoint: &RemoteEndpoint,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            token: endpoint.token.clone(),
            remote_root: normalize(&remote_root.into()),
            page_size: DEFAULT_PAGE_SIZE,
            refresh: false,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Ask AList to bypass its directory cache on every listing
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn parse_timestamp(rfc3339: &str) -> Option<i64> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).timestamp())
    }

    fn convert_entry(parent: &str, object: FsObject) -> RemoteEntry {
        let path = if parent == "/" {
            format!("/{}", object.name)
        } else {
            format!("{}/{}", parent, object.name)
        };
        RemoteEntry {
            name: object.name,
            path,
            is_dir: object.is_dir,
            size: object.size,
            modified_at: object.modified.as_deref().and_then(Self::parse_timestamp),
        }
    }

    /// POST a JSON body and unwrap the AList envelope
    async fn call<B, T>(&self, endpoint: &str, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let request = HttpRequest::post(format!("{}{}", self.base_url, endpoint))
            .authorization(self.token.clone())
            .header("Accept", "application/json")
            .json(body)?
            .timeout(REQUEST_TIMEOUT);

        let response: HttpResponse = self
            .http_client
            .execute_with_retry(request, self.retry_policy.clone())
            .await?;

        if response.status == 401 || response.status == 403 {
            return Err(AlistError::AuthenticationFailed(format!(
                "HTTP {} from {}",
                response.status, endpoint
            )));
        }
        if !response.is_success() {
            return Err(AlistError::HttpStatus {
                status: response.status,
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .map_err(|e| AlistError::ParseError(e.to_string()))?;
        if envelope.code != 200 {
            return Err(AlistError::from_envelope(
                path,
                envelope.code,
                &envelope.message,
            ));
        }

        envelope
            .data
            .ok_or_else(|| AlistError::ParseError(format!("{} returned no data", endpoint)))
    }

    /// Every entry of a directory, following pagination
    #[instrument(skip(self))]
    async fn list_all(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = normalize(path);
        let mut entries = Vec::new();
        let mut page = 1;

        loop {
            let body = ListRequest {
                path: &path,
                password: "",
                page,
                per_page: self.page_size,
                refresh: self.refresh && page == 1,
            };
            let data: ListData = self.call("/api/fs/list", &path, &body).await?;

            let Some(content) = data.content else {
                if page == 1 {
                    debug!(path = %path, "Directory is empty or not accessible");
                }
                break;
            };
            let received = content.len();
            entries.extend(
                content
                    .into_iter()
                    .map(|object| Self::convert_entry(&path, object)),
            );

            if received == 0 || received < self.page_size as usize || entries.len() as u64 >= data.total {
                break;
            }
            page += 1;
        }

        debug!(path = %path, count = entries.len(), pages = page, "Listed remote directory");
        Ok(entries)
    }
}

#[async_trait]
impl RemoteLister for AlistConnector {
    async fn list_directory(&self, path: &str) -> BridgeResult<Vec<RemoteEntry>> {
        Ok(self.list_all(path).await?)
    }

    #[instrument(skip(self))]
    async fn probe_file(&self, path: &str) -> BridgeResult<bool> {
        let path = normalize(path);
        let body = GetRequest {
            path: &path,
            password: "",
        };

        match self.call::<_, FsObject>("/api/fs/get", &path, &body).await {
            Ok(object) => Ok(!object.is_dir),
            Err(AlistError::ObjectNotFound { .. }) => Ok(false),
            Err(e) => {
                warn!(path = %path, error = %e, "Probe failed");
                Err(BridgeError::from(e))
            }
        }
    }
}

#[async_trait]
impl ChangeHintSource for AlistConnector {
    /// Top-level directories under the remote root modified after `since`
    #[instrument(skip(self))]
    async fn changed_directories(&self, since: i64) -> BridgeResult<Vec<String>> {
        let entries = self.list_all(&self.remote_root).await?;

        let mut changed: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.is_dir)
            .filter(|entry| entry.modified_at.map_or(true, |modified| modified > since))
            .map(|entry| entry.path)
            .collect();
        changed.sort();

        debug!(count = changed.len(), since, "Collected change hints");
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::http::HttpRequest;
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

    fn endpoint() -> RemoteEndpoint {
        RemoteEndpoint {
            base_url: "http://alist.local/".to_string(),
            token: "alist-token".to_string(),
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn body_json(request: &HttpRequest) -> serde_json::Value {
        serde_json::from_slice(request.body.as_ref().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_list_directory_converts_entries() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .times(1)
            .withf(|request, _| {
                let body = body_json(request);
                request.url == "http://alist.local/api/fs/list"
                    && request.headers.get("Authorization") == Some(&"alist-token".to_string())
                    && body["path"] == "/media/movies"
                    && body["page"] == 1
            })
            .returning(|_, _| {
                Ok(response(
                    200,
                    r#"{"code":200,"message":"success","data":{"total":2,"content":[
                        {"name":"Alien (1979).mkv","size":1024,"is_dir":false,"modified":"2024-01-02T00:00:00Z"},
                        {"name":"Extras","size":0,"is_dir":true,"modified":"2024-01-03T00:00:00+08:00"}
                    ]}}"#,
                ))
            });

        let connector = AlistConnector::new(Arc::new(mock_http), &endpoint(), "/media");
        let entries = connector.list_directory("/media/movies/").await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/media/movies/Alien (1979).mkv");
        assert_eq!(entries[0].size, 1024);
        assert_eq!(entries[0].modified_at, Some(1_704_153_600));
        assert!(entries[1].is_dir);
        assert_eq!(entries[1].path, "/media/movies/Extras");
    }

    #[tokio::test]
    async fn test_list_directory_follows_pages() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .times(2)
            .returning(|request, _| {
                let page = body_json(&request)["page"].as_u64().unwrap();
                let name = if page == 1 { "a.mkv" } else { "b.mkv" };
                Ok(response(
                    200,
                    &format!(
                        r#"{{"code":200,"data":{{"total":2,"content":[{{"name":"{}","is_dir":false}}]}}}}"#,
                        name
                    ),
                ))
            });

        let connector =
            AlistConnector::new(Arc::new(mock_http), &endpoint(), "/media").with_page_size(1);
        let entries = connector.list_directory("/media/tv").await.unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.mkv", "b.mkv"]);
    }

    #[tokio::test]
    async fn test_null_content_is_empty() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .times(1)
            .returning(|_, _| {
                Ok(response(
                    200,
                    r#"{"code":200,"data":{"content":null,"total":0}}"#,
                ))
            });

        let connector = AlistConnector::new(Arc::new(mock_http), &endpoint(), "/media");
        assert!(connector.list_directory("/media/empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_found() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .returning(|_, _| {
                Ok(response(
                    200,
                    r#"{"code":500,"message":"object not found","data":null}"#,
                ))
            });

        let connector = AlistConnector::new(Arc::new(mock_http), &endpoint(), "/media");
        let result = connector.list_directory("/media/gone").await;

        assert!(matches!(result, Err(BridgeError::NotFound(p)) if p == "/media/gone"));
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .returning(|_, _| Ok(response(503, "")));

        let connector = AlistConnector::new(Arc::new(mock_http), &endpoint(), "/media");
        let result = connector.list_directory("/media").await;

        assert!(matches!(result, Err(BridgeError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_probe_file() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .withf(|request, _| request.url.ends_with("/api/fs/get"))
            .returning(|request, _| {
                let path = body_json(&request)["path"].as_str().unwrap().to_string();
                let body = match path.as_str() {
                    "/media/movies/A.mkv" => {
                        r#"{"code":200,"data":{"name":"A.mkv","size":5,"is_dir":false}}"#
                    }
                    "/media/movies" => {
                        r#"{"code":200,"data":{"name":"movies","size":0,"is_dir":true}}"#
                    }
                    _ => r#"{"code":500,"message":"failed get file: object not found","data":null}"#,
                };
                Ok(response(200, body))
            });

        let connector = AlistConnector::new(Arc::new(mock_http), &endpoint(), "/media");

        assert!(connector.probe_file("/media/movies/A.mkv").await.unwrap());
        assert!(!connector.probe_file("/media/movies").await.unwrap());
        assert!(!connector.probe_file("/media/movies/B.mkv").await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_auth_failure_is_error() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .returning(|_, _| Ok(response(401, "")));

        let connector = AlistConnector::new(Arc::new(mock_http), &endpoint(), "/media");
        let result = connector.probe_file("/media/movies/A.mkv").await;

        assert!(matches!(result, Err(BridgeError::OperationFailed(m)) if m.contains("Authentication")));
    }

    #[tokio::test]
    async fn test_changed_directories() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .times(1)
            .withf(|request, _| body_json(request)["path"] == "/media")
            .returning(|_, _| {
                Ok(response(
                    200,
                    r#"{"code":200,"data":{"total":4,"content":[
                        {"name":"tv","is_dir":true,"modified":"2024-03-01T00:00:00Z"},
                        {"name":"movies","is_dir":true,"modified":"2023-01-01T00:00:00Z"},
                        {"name":"anime","is_dir":true},
                        {"name":"readme.txt","is_dir":false,"modified":"2024-03-01T00:00:00Z"}
                    ]}}"#,
                ))
            });

        let connector = AlistConnector::new(Arc::new(mock_http), &endpoint(), "/media");
        let since = AlistConnector::parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let changed = connector.changed_directories(since).await.unwrap();

        assert_eq!(changed, vec!["/media/anime".to_string(), "/media/tv".to_string()]);
    }
}
