//! HTTP transport seam and the reqwest-backed implementation.

use crate::api::errors::{ApiError, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// A request relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: json_headers(),
            body: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_owned(), value.to_string()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Value of a query parameter, if set.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// A raw response: status plus the undecoded body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Sends requests to the backend. Implementations never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// Minimal `{Accept: application/json}` header map.
pub fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// JSON-over-HTTPS transport rooted at the configured API base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_owned()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|error| ApiError::Network(format!("invalid API base URL {base_url}: {error}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nusprofs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| ApiError::transport(&error))?;

        Ok(Self { client, base_url })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|error| ApiError::Network(format!("invalid path {}: {error}", request.path)))?;

        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = self.url_for(&request)?;
        debug!(method = %request.method, %url, "sending request");

        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|error| ApiError::transport(&error))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ApiError::transport(&error))?;

        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_path_and_query_under_base() {
        let transport = HttpTransport::new("https://api.example.test/v1", Duration::from_secs(5))
            .expect("transport");
        let request = ApiRequest::new(Method::GET, "/professors/search")
            .query("q", "tan")
            .query("page", 2);

        let url = transport.url_for(&request).expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.test/v1/professors/search?q=tan&page=2"
        );
    }

    #[test]
    fn encoded_segments_survive_the_join() {
        let transport = HttpTransport::new("https://api.example.test", Duration::from_secs(5))
            .expect("transport");
        let request = ApiRequest::new(Method::GET, "/reviews/users/al%2Fice%3Fx");

        let url = transport.url_for(&request).expect("url");
        assert_eq!(url.path(), "/reviews/users/al%2Fice%3Fx");
        assert_eq!(url.query(), None);
    }
}
