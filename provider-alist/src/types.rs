//! AList API request and response types

use serde::{Deserialize, Serialize};

/// Every AList endpoint wraps its payload in this envelope
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// `POST /api/fs/list` body
#[derive(Debug, Serialize)]
pub struct ListRequest<'a> {
    pub path: &'a str,
    pub password: &'a str,
    pub page: u32,
    pub per_page: u32,
    pub refresh: bool,
}

/// `POST /api/fs/get` body
#[derive(Debug, Serialize)]
pub struct GetRequest<'a> {
    pub path: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ListData {
    /// `null` for an empty or access-denied directory
    pub content: Option<Vec<FsObject>>,
    #[serde(default)]
    pub total: u64,
}

/// A file or directory as AList reports it
#[derive(Debug, Clone, Deserialize)]
pub struct FsObject {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_dir: bool,
    /// RFC 3339
    #[serde(default)]
    pub modified: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_content_deserializes() {
        let body = r#"{"code":200,"message":"success","data":{"content":null,"total":0}}"#;
        let envelope: Envelope<ListData> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.code, 200);
        assert!(envelope.data.unwrap().content.is_none());
    }

    #[test]
    fn test_error_envelope_without_data() {
        let body = r#"{"code":500,"message":"object not found","data":null}"#;
        let envelope: Envelope<FsObject> = serde_json::from_str(body).unwrap();
        assert!(envelope.data.is_none());
        assert_eq!(envelope.message, "object not found");
    }
}
