//! Composes request headers, consulting the validator only for protected calls.

use crate::api::transport::json_headers;
use crate::session::validator::TokenValidator;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::warn;

/// Builds per-call headers. A missing token fails open to anonymous: the
/// server decides whether the call is permitted.
#[derive(Clone)]
pub struct HeaderBuilder {
    validator: TokenValidator,
}

impl HeaderBuilder {
    pub fn new(validator: TokenValidator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    pub async fn build_headers(&self, auth_required: bool) -> HeaderMap {
        let mut headers = json_headers();
        if !auth_required {
            return headers;
        }

        let Some(token) = self.validator.usable_access_token().await else {
            return headers;
        };

        match HeaderValue::from_str(&format!("Bearer {}", token.expose())) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("stored access token is not a valid header value; sending anonymously"),
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ScriptedTransport, scripted_session};
    use crate::session::store::{Session, Token};
    use reqwest::Method;
    use reqwest::header::ACCEPT;
    use serde_json::json;

    #[tokio::test]
    async fn anonymous_protected_read_has_no_authorization() {
        let transport = ScriptedTransport::new();
        let (builder, _) = scripted_session(&transport, Session::empty());

        let headers = builder.build_headers(true).await;

        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn unprotected_call_never_consults_validator() {
        let transport = ScriptedTransport::new();
        let (builder, _) =
            scripted_session(&transport, Session::pair(Token::new("a1"), Token::new("r1")));

        let headers = builder.build_headers(false).await;

        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn valid_token_is_sent_unchanged() {
        let transport = ScriptedTransport::new();
        transport.respond(Method::POST, "/auth/token/verify", 200, json!({}));
        let (builder, _) =
            scripted_session(&transport, Session::pair(Token::new("a1"), Token::new("r1")));

        let headers = builder.build_headers(true).await;

        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer a1");
    }

    #[tokio::test]
    async fn expired_token_is_replaced_by_refreshed_token() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::POST,
            "/auth/token/verify",
            401,
            json!({"detail": "Token is invalid or expired"}),
        );
        transport.respond(Method::POST, "/auth/token/refresh", 200, json!({"access": "T2"}));
        let (builder, store) =
            scripted_session(&transport, Session::pair(Token::new("a1"), Token::new("r1")));

        let headers = builder.build_headers(true).await;

        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer T2");
        assert_eq!(store.snapshot().access, Some(Token::new("T2")));
    }

    #[tokio::test]
    async fn failed_refresh_sends_anonymously_and_clears_tokens() {
        let transport = ScriptedTransport::new();
        transport.respond(Method::POST, "/auth/token/verify", 401, json!({}));
        transport.respond(
            Method::POST,
            "/auth/token/refresh",
            401,
            json!({"detail": "Token is blacklisted"}),
        );
        let (builder, store) =
            scripted_session(&transport, Session::pair(Token::new("a1"), Token::new("r1")));

        let headers = builder.build_headers(true).await;

        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(store.snapshot().is_empty());
    }
}
