// reqwest-backed HttpClient with Basic auth and upload progress reporting.
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::time::Duration;

use super::{HttpClient, HttpReply, HttpRequest, Method, ProgressFn, TransportError};
use crate::config::ConnectionConfig;

pub const USER_AGENT: &str = concat!("duet-rrf/", env!("CARGO_PKG_VERSION"));
pub const ACCEPT: &str = "application/json, text/javascript";
const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// `Authorization` header value for HTTP Basic auth.
pub fn basic_auth_header(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

/// Headers sent with every request.
pub fn request_headers(connection: &ConnectionConfig) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("User-Agent", USER_AGENT.to_string()),
        ("Accept", ACCEPT.to_string()),
        ("Connection", "keep-alive".to_string()),
    ];
    if let Some((user, password)) = connection.basic_auth() {
        headers.push(("Authorization", basic_auth_header(user, password)));
    }
    headers
}

pub struct ReqwestClient {
    client: reqwest::Client,
    connection: ConnectionConfig,
}

impl ReqwestClient {
    pub fn new(connection: ConnectionConfig, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        tracing::debug!(
            "HTTP client for {} (timeout {:?}) | Duet password: {} | HTTP Basic Auth: user:{}, password:{}",
            connection.base_url,
            timeout,
            if connection.duet_password.is_empty() { "<empty>" } else { "set" },
            connection.http_user.as_deref().unwrap_or("<empty>"),
            if connection.http_password.is_some() { "set" } else { "<empty>" },
        );
        Ok(Self { client, connection })
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }
}

impl std::fmt::Debug for ReqwestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestClient")
            .field("base_url", &self.connection.base_url)
            .finish()
    }
}

/// Stream the body in chunks, reporting progress as each chunk is handed over.
fn upload_body(body: Vec<u8>, progress: Option<ProgressFn>) -> reqwest::Body {
    let total = body.len() as u64;
    let stream = async_stream::stream! {
        let mut sent = 0u64;
        for chunk in body.chunks(UPLOAD_CHUNK_SIZE) {
            sent += chunk.len() as u64;
            // hyper stops polling once Content-Length bytes are out, so report first
            if let Some(progress) = &progress {
                progress(sent, total);
            }
            yield Ok::<Vec<u8>, std::io::Error>(chunk.to_vec());
        }
    };
    reqwest::Body::wrap_stream(stream)
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest, progress: Option<ProgressFn>) -> Result<HttpReply, TransportError> {
        let url = request.url(&self.connection.base_url);
        // the query may carry the Duet password, so only the path is logged
        tracing::debug!("{:?} {}{}", request.method, self.connection.base_url, request.path);

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };
        let mut builder = self.client.request(method, &url);
        for (name, value) in request_headers(&self.connection) {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(CONTENT_LENGTH, body.len() as u64)
                .body(upload_body(body, progress));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!("{} answered {}", request.path, status);
            return Err(TransportError::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(HttpReply { status: status.as_u16(), body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        // RFC 7617 example
        assert_eq!(basic_auth_header("Aladdin", "open sesame"), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn test_request_headers_without_credentials() {
        let conn = ConnectionConfig::new("http://duet/", "reprap", "", "");
        let headers = request_headers(&conn);
        assert_eq!(headers.len(), 3);
        assert!(headers.contains(&("Accept", "application/json, text/javascript".to_string())));
        assert!(headers.contains(&("Connection", "keep-alive".to_string())));
        assert!(headers.iter().all(|(name, _)| *name != "Authorization"));
    }

    #[test]
    fn test_request_headers_with_credentials() {
        let conn = ConnectionConfig::new("http://duet/", "", "user", "pass");
        let headers = request_headers(&conn);
        assert!(headers.contains(&("Authorization", "Basic dXNlcjpwYXNz".to_string())));
    }
}
