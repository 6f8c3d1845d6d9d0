//! Account endpoints: login, token verify/refresh, logout, and profile changes.

use crate::api::client::{ApiClient, Call};
use crate::api::errors::{ApiError, Result};
use crate::api::transport::{ApiRequest, Transport};
use crate::domain::CurrentUser;
use crate::session::store::Token;
use crate::session::validator::{TokenEndpoints, TokenPair};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// Verify/refresh calls made straight on the transport, outside the
/// authenticated request path.
pub struct AuthEndpoints {
    transport: Arc<dyn Transport>,
}

impl AuthEndpoints {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<String> {
        let request = ApiRequest::new(Method::POST, path).json(body);
        let response = self.transport.send(request).await?;
        if response.status.is_success() {
            Ok(response.body)
        } else {
            Err(ApiError::from_response(response.status, &response.body))
        }
    }
}

#[async_trait]
impl TokenEndpoints for AuthEndpoints {
    async fn verify(&self, access: &Token) -> Result<()> {
        self.post("/auth/token/verify", json!({ "token": access.expose() }))
            .await
            .map(|_| ())
    }

    async fn refresh(&self, refresh: &Token) -> Result<TokenPair> {
        let body = self
            .post("/auth/token/refresh", json!({ "refresh": refresh.expose() }))
            .await?;
        let tokens: TokenResponse = serde_json::from_str(&body)
            .map_err(|error| ApiError::Decode(format!("/auth/token/refresh: {error}")))?;

        Ok(TokenPair {
            access: Token::new(tokens.access),
            refresh: tokens.refresh.map(Token::new),
        })
    }
}

/// Exchanges credentials for a token pair and stores both together.
pub async fn login(client: &ApiClient, username: &str, password: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(ApiError::invalid("username", "Username is required."));
    }
    if password.is_empty() {
        return Err(ApiError::invalid("password", "Password is required."));
    }

    let tokens: TokenResponse = client
        .json(Call::post("/auth/token").json(json!({
            "username": username,
            "password": password,
        })))
        .await?;

    let Some(refresh) = tokens.refresh else {
        return Err(ApiError::Decode(
            "/auth/token: response is missing the refresh token".to_owned(),
        ));
    };

    client
        .validator()
        .begin_session(Token::new(tokens.access), Token::new(refresh));
    info!(username, "logged in");
    Ok(())
}

/// Revokes the refresh token best-effort, then clears both stored tokens.
pub async fn logout(client: &ApiClient) {
    if let Some(refresh) = client.validator().refresh_token() {
        let call = Call::post("/auth/logout")
            .json(json!({ "refresh": refresh.expose() }))
            .authenticated();
        if let Err(error) = client.empty(call).await {
            warn!(%error, "logout call failed; clearing local session anyway");
        }
    }

    client.validator().end_session();
}

/// Resolves the signed-in account, or `None` when the session is anonymous.
pub async fn whoami(client: &ApiClient) -> Result<Option<CurrentUser>> {
    if client.validator().usable_access_token().await.is_none() {
        return Ok(None);
    }

    match client.json(Call::get("/auth/whoami").authenticated()).await {
        Ok(user) => Ok(Some(user)),
        Err(ApiError::LoginRequired | ApiError::Auth(_)) => Ok(None),
        Err(error) => Err(error),
    }
}

/// Fields for account registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

pub async fn register(client: &ApiClient, registration: &Registration) -> Result<()> {
    check_username(&registration.username)?;
    check_new_password(&registration.password, &registration.confirm_password)?;
    if registration.email.trim().is_empty() {
        return Err(ApiError::invalid("email", "Email is required."));
    }

    client
        .empty(Call::post("/auth/register").json(json!({
            "username": registration.username,
            "email": registration.email,
            "password": registration.password,
            "confirm_password": registration.confirm_password,
        })))
        .await
}

pub async fn change_username(client: &ApiClient, new_username: &str) -> Result<()> {
    check_username(new_username)?;
    require_session(client).await?;

    client
        .empty(
            Call::put("/auth/change_username")
                .json(json!({ "new_username": new_username }))
                .authenticated(),
        )
        .await
}

pub async fn change_password(
    client: &ApiClient,
    old_password: &str,
    new_password: &str,
    confirm_password: &str,
) -> Result<()> {
    if old_password.is_empty() {
        return Err(ApiError::invalid(
            "old_password",
            "Please enter your current password.",
        ));
    }
    check_new_password(new_password, confirm_password)?;
    require_session(client).await?;

    client
        .empty(
            Call::put("/auth/change_password")
                .json(json!({
                    "old_password": old_password,
                    "new_password": new_password,
                    "confirm_password": confirm_password,
                }))
                .authenticated(),
        )
        .await
}

async fn require_session(client: &ApiClient) -> Result<()> {
    match client.validator().usable_access_token().await {
        Some(_) => Ok(()),
        None => Err(ApiError::LoginRequired),
    }
}

fn check_username(username: &str) -> Result<()> {
    if username.trim().chars().count() < MIN_USERNAME_LEN {
        return Err(ApiError::invalid(
            "username",
            format!("Username must be at least {MIN_USERNAME_LEN} characters."),
        ));
    }
    Ok(())
}

fn check_new_password(password: &str, confirm: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::invalid(
            "new_password",
            format!("New password must be at least {MIN_PASSWORD_LEN} characters."),
        ));
    }
    if password != confirm {
        return Err(ApiError::invalid(
            "confirm_password",
            "New passwords do not match.",
        ));
    }
    Ok(())
}
