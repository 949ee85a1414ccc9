//! HTTP plumbing towards the Duet controller.
//!
//! [`HttpClient`] performs exactly one request and resolves to either the reply or a
//! [`TransportError`]. Which endpoints are called is decided by a [`DuetApi`] strategy,
//! one per API dialect.

pub mod dialect;
pub mod http;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use dialect::{ApiDialect, DsfApi, DuetApi, ProtocolError, RrfHttpApi, SimulationStatus, api_for};
pub use http::ReqwestClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

/// A request relative to the configured base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::Get, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self { method: Method::Post, path: path.into(), query: Vec::new(), body: Some(body) }
    }

    pub fn put(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self { method: Method::Put, path: path.into(), query: Vec::new(), body: Some(body) }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Percent-encoded query string without the leading `?`.
    pub fn encoded_query(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn url(&self, base_url: &str) -> String {
        let mut url = format!("{}{}", base_url, self.path);
        let query = self.encoded_query();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        url
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, body: body.into() }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {code} {reason}")]
    Status { code: u16, reason: String },
    #[error("invalid request: {0}")]
    Client(String),
}

impl TransportError {
    pub fn status(code: u16, reason: impl Into<String>) -> Self {
        Self::Status { code, reason: reason.into() }
    }

    /// The "content not found" class of failure that hints at a DSF controller.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { code: 404, .. })
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Upload progress callback: `(bytes_sent, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest, progress: Option<ProgressFn>) -> Result<HttpReply, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building_encodes_query() {
        let req = HttpRequest::get("rr_gcode").query("gcode", "M32 \"0:/gcodes/a b.gcode\"");
        assert_eq!(
            req.url("http://duet/"),
            "http://duet/rr_gcode?gcode=M32%20%220%3A%2Fgcodes%2Fa%20b.gcode%22"
        );
        assert_eq!(HttpRequest::get("rr_reply").url("http://duet/"), "http://duet/rr_reply");
    }

    #[test]
    fn test_methods() {
        assert_eq!(HttpRequest::get("x").method, Method::Get);
        assert_eq!(HttpRequest::post("x", b"M115".to_vec()).method, Method::Post);
        let put = HttpRequest::put("machine/file/gcodes/a.gcode", b"G1".to_vec());
        assert_eq!(put.method, Method::Put);
        assert_eq!(put.body.as_deref(), Some(&b"G1"[..]));
    }

    #[test]
    fn test_query_value() {
        let req = HttpRequest::get("rr_status").query("type", "3");
        assert_eq!(req.query_value("type"), Some("3"));
        assert_eq!(req.query_value("time"), None);
    }

    #[test]
    fn test_not_found_classification() {
        assert!(TransportError::status(404, "Not Found").is_not_found());
        assert!(!TransportError::status(401, "Unauthorized").is_not_found());
        assert!(!TransportError::Network("connection refused".into()).is_not_found());
        assert_eq!(TransportError::status(500, "Internal Server Error").to_string(), "HTTP 500 Internal Server Error");
        assert_eq!(TransportError::status(503, "").code(), Some(503));
    }
}
