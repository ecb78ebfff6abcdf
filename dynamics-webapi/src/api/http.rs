//! Plain-data HTTP shapes exchanged with the transport
//!
//! The composers produce [`ComposedRequest`] values and the interpreter consumes
//! [`ResponseEnvelope`] values; neither ever touches the network.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use super::request::Method;

/// Serialized request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    Binary(Vec<u8>),
}

impl RequestBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RequestBody::Text(text) => text.as_bytes(),
            RequestBody::Binary(bytes) => bytes,
        }
    }
}

/// Output of composition: everything the transport needs for one physical call
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedRequest {
    pub method: Method,
    /// Path relative to the data API URL, or absolute when built from a full URL
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub is_async: bool,
    /// Forwarded to the transport; the core imposes no timeout itself
    pub timeout: Option<Duration>,
    /// Whether a non-GET request may join a batch changeset
    pub in_change_set: bool,
}

impl ComposedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Copy of this request carrying a bearer token
    pub fn with_bearer_token(&self, token: &str) -> Self {
        let mut authorized = self.clone();
        authorized
            .headers
            .insert("Authorization".to_string(), format!("Bearer {}", token));
        authorized
    }
}

/// Response payload as handed back by the transport
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    /// File content and partial (206) downloads, kept byte for byte
    Binary(Vec<u8>),
}

impl ResponseBody {
    /// Classify a raw response body from its status and `Content-Type`.
    ///
    /// Range responses and non-textual content types stay binary, as does
    /// anything that is not valid UTF-8.
    pub fn from_bytes(bytes: Vec<u8>, status: u16, content_type: Option<&str>) -> Self {
        if bytes.is_empty() {
            return ResponseBody::Empty;
        }
        if status == 206 || !content_type.is_none_or(is_textual) {
            return ResponseBody::Binary(bytes);
        }
        match String::from_utf8(bytes) {
            Ok(text) => ResponseBody::from_text(text),
            Err(err) => ResponseBody::Binary(err.into_bytes()),
        }
    }

    /// Classify raw response text: blank is empty, valid JSON is JSON, anything else text
    pub fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            return ResponseBody::Empty;
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(json) => ResponseBody::Json(json),
            Err(_) => ResponseBody::Text(text),
        }
    }
}

/// Response as returned by the transport; read-only to the interpreter
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub data: ResponseBody,
}

impl ResponseEnvelope {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_json(mut self, data: Value) -> Self {
        self.data = ResponseBody::Json(data);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.data = ResponseBody::Text(text.into());
        self
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.data = ResponseBody::Binary(bytes);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.data {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.data {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

fn is_textual(content_type: &str) -> bool {
    let media_type = content_type.to_ascii_lowercase();
    media_type.starts_with("text/")
        || media_type.starts_with("multipart/")
        || media_type.contains("json")
        || media_type.contains("xml")
        || media_type.starts_with("application/http")
}

fn find_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_lookup_ignores_case() {
        let response = ResponseEnvelope::new(204)
            .with_header("odata-entityid", "https://org/api/data/v9.2/accounts(1)");
        assert!(response.header("OData-EntityId").is_some());
        assert!(response.header("Location").is_none());
    }

    #[test]
    fn test_body_classification() {
        assert_eq!(ResponseBody::from_text("  ".into()), ResponseBody::Empty);
        assert_eq!(ResponseBody::from_text("42".into()), ResponseBody::Json(json!(42)));
        assert_eq!(
            ResponseBody::from_text("--batchresponse_1".into()),
            ResponseBody::Text("--batchresponse_1".into())
        );
    }

    #[test]
    fn test_byte_classification() {
        assert_eq!(
            ResponseBody::from_bytes(vec![0xff, 0x00], 206, Some("application/octet-stream")),
            ResponseBody::Binary(vec![0xff, 0x00])
        );
        assert_eq!(
            ResponseBody::from_bytes(b"abc".to_vec(), 206, Some("text/plain")),
            ResponseBody::Binary(b"abc".to_vec())
        );
        assert_eq!(
            ResponseBody::from_bytes(b"%PDF".to_vec(), 200, Some("application/pdf")),
            ResponseBody::Binary(b"%PDF".to_vec())
        );
        assert_eq!(
            ResponseBody::from_bytes(vec![0xff, 0xfe], 200, None),
            ResponseBody::Binary(vec![0xff, 0xfe])
        );
        assert_eq!(
            ResponseBody::from_bytes(
                br#"{"a":1}"#.to_vec(),
                200,
                Some("application/json; odata.metadata=minimal")
            ),
            ResponseBody::Json(json!({"a": 1}))
        );
        assert_eq!(
            ResponseBody::from_bytes(b"12".to_vec(), 200, Some("text/plain")),
            ResponseBody::Json(json!(12))
        );
        assert_eq!(ResponseBody::from_bytes(Vec::new(), 206, None), ResponseBody::Empty);
    }
}
