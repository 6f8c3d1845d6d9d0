//! Request executor: header composition, status classification, and the
//! single verify → refresh → retry cycle for protected calls.

use crate::api::auth::AuthEndpoints;
use crate::api::errors::{ApiError, Result};
use crate::api::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use crate::config::ApiConfig;
use crate::session::headers::HeaderBuilder;
use crate::session::store::SessionStore;
use crate::session::validator::TokenValidator;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// One backend call, before headers are attached.
#[derive(Debug, Clone)]
pub struct Call {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    auth_required: bool,
}

impl Call {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            auth_required: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_owned(), value.to_string()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Marks the call as wanting an `Authorization` header when one is available.
    pub fn authenticated(mut self) -> Self {
        self.auth_required = true;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Backend client shared by every endpoint module.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    headers: HeaderBuilder,
    page_size: u32,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, headers: HeaderBuilder, page_size: u32) -> Self {
        Self {
            transport,
            headers,
            page_size,
        }
    }

    /// Wires the HTTP transport, validator, and header builder over `store`.
    pub fn connect(config: &ApiConfig, store: Arc<dyn SessionStore>) -> Result<Self> {
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(&config.base_url, config.timeout)?);
        Ok(Self::with_transport(transport, store, config))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        config: &ApiConfig,
    ) -> Self {
        let endpoints = Arc::new(AuthEndpoints::new(Arc::clone(&transport)));
        let validator = TokenValidator::new(store, endpoints, config.verify_ttl);
        Self::new(transport, HeaderBuilder::new(validator), config.page_size)
    }

    pub fn validator(&self) -> &TokenValidator {
        self.headers.validator()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Sends `call` and decodes a JSON body.
    pub async fn json<T: DeserializeOwned>(&self, call: Call) -> Result<T> {
        let response = self.send(&call).await?;
        serde_json::from_str(&response.body)
            .map_err(|error| ApiError::Decode(format!("{}: {error}", call.path)))
    }

    /// Sends `call`, ignoring any response body.
    pub async fn empty(&self, call: Call) -> Result<()> {
        self.send(&call).await.map(|_| ())
    }

    /// Sends `call` and returns the successful response.
    ///
    /// A 401 on a protected call re-validates the session once and retries;
    /// a second rejection, or no usable token, becomes `LoginRequired`.
    pub async fn send(&self, call: &Call) -> Result<ApiResponse> {
        let response = self.dispatch(call).await?;
        if response.status.is_success() {
            return Ok(response);
        }

        if !(call.auth_required && response.status == StatusCode::UNAUTHORIZED) {
            return Err(ApiError::from_response(response.status, &response.body));
        }

        warn!(path = %call.path, "protected call rejected; re-validating session");
        let validator = self.validator();
        validator.invalidate();
        if validator.usable_access_token().await.is_none() {
            return Err(ApiError::LoginRequired);
        }

        let retried = self.dispatch(call).await?;
        if retried.status.is_success() {
            return Ok(retried);
        }

        match ApiError::from_response(retried.status, &retried.body) {
            ApiError::Auth(_) if retried.status == StatusCode::UNAUTHORIZED => {
                Err(ApiError::LoginRequired)
            }
            other => Err(other),
        }
    }

    async fn dispatch(&self, call: &Call) -> Result<ApiResponse> {
        let headers = self.headers.build_headers(call.auth_required).await;
        debug!(
            method = %call.method,
            path = %call.path,
            auth = call.auth_required,
            "dispatching call"
        );

        let mut request = ApiRequest::new(call.method.clone(), call.path.clone()).headers(headers);
        request.query = call.query.clone();
        request.body = call.body.clone();

        self.transport.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ScriptedTransport, scripted_client};
    use crate::session::store::{Session, Token};
    use reqwest::header::AUTHORIZATION;
    use serde_json::json;

    #[tokio::test]
    async fn protected_401_refreshes_once_and_retries() {
        let transport = ScriptedTransport::new();
        transport.respond(Method::POST, "/auth/token/verify", 200, json!({}));
        transport.respond(Method::POST, "/reviews/9/like", 401, json!({}));
        transport.respond(
            Method::POST,
            "/reviews/9/like",
            200,
            json!({"liked": true, "likes_count": 3}),
        );
        transport.respond(Method::POST, "/auth/token/verify", 401, json!({}));
        transport.respond(Method::POST, "/auth/token/refresh", 200, json!({"access": "a2"}));
        let (client, _) =
            scripted_client(&transport, Session::pair(Token::new("a1"), Token::new("r1")));

        let like: serde_json::Value = client
            .json(Call::post("/reviews/9/like").authenticated())
            .await
            .expect("retried call succeeds");

        assert_eq!(like["likes_count"], 3);
        let likes = transport.requests_to(&Method::POST, "/reviews/9/like");
        assert_eq!(likes.len(), 2);
        assert_eq!(likes[0].headers.get(AUTHORIZATION).unwrap(), "Bearer a1");
        assert_eq!(likes[1].headers.get(AUTHORIZATION).unwrap(), "Bearer a2");
        assert_eq!(transport.calls(&Method::POST, "/auth/token/refresh"), 1);
    }

    #[tokio::test]
    async fn second_rejection_requires_login() {
        let transport = ScriptedTransport::new();
        transport.respond(Method::POST, "/auth/token/verify", 200, json!({}));
        transport.respond(Method::DELETE, "/reviews/4/delete", 401, json!({}));
        let (client, _) =
            scripted_client(&transport, Session::pair(Token::new("a1"), Token::new("r1")));

        let error = client
            .empty(Call::delete("/reviews/4/delete").authenticated())
            .await
            .expect_err("should require login");

        assert!(error.requires_login());
        assert_eq!(transport.calls(&Method::DELETE, "/reviews/4/delete"), 2);
    }

    #[tokio::test]
    async fn anonymous_read_errors_are_not_retried() {
        let transport = ScriptedTransport::new();
        transport.respond(Method::GET, "/professors/77", 404, json!({"detail": "Not found."}));
        let (client, _) = scripted_client(&transport, Session::empty());

        let error = client
            .json::<serde_json::Value>(Call::get("/professors/77"))
            .await
            .expect_err("missing professor");

        assert!(matches!(error, ApiError::NotFound(_)));
        assert_eq!(transport.requests().len(), 1);
    }
}
