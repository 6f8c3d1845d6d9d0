//! Error taxonomy for backend calls and status classification.

use reqwest::StatusCode;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Result type for backend calls.
pub type Result<T> = std::result::Result<T, ApiError>;

/// One field-level message from a 400 response, or a local form check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Errors surfaced by backend calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("not authorized: {0}")]
    Auth(String),
    #[error("sign in required")]
    LoginRequired,
    #[error("{}", join_field_errors(.0))]
    Validation(Vec<FieldError>),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Builds a local validation error without a network round-trip.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn transport(error: &(dyn StdError + 'static)) -> Self {
        Self::Network(format_error_chain(error))
    }

    /// Classifies a non-2xx response.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let payload = serde_json::from_str::<serde_json::Value>(body).ok();
        let detail = payload.as_ref().and_then(detail_message);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth(
                detail.unwrap_or_else(|| "invalid or expired credentials".to_owned()),
            ),
            StatusCode::BAD_REQUEST => {
                let errors = payload.as_ref().map(field_errors).unwrap_or_default();
                if errors.is_empty() {
                    Self::Validation(vec![FieldError::general(
                        detail.unwrap_or_else(|| "request was rejected".to_owned()),
                    )])
                } else {
                    Self::Validation(errors)
                }
            }
            StatusCode::NOT_FOUND => {
                Self::NotFound(detail.unwrap_or_else(|| "resource no longer exists".to_owned()))
            }
            other => match detail {
                Some(message) => Self::Server {
                    status: other.as_u16(),
                    message,
                },
                None => Self::Network(format!("request failed with status {}", other.as_u16())),
            },
        }
    }

    /// True when the caller should be sent to the login flow.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::LoginRequired)
    }

    /// True for transport-level failures where the server never judged the request.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// True when the server could not answer, as opposed to answering "no".
    /// Covers transport failures, 5xx responses and unreadable bodies.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Decode(_) => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Field-level messages for a validation failure, verbatim.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }

    /// Short inline message suitable for rendering next to a list or form.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) | Self::Decode(_) => {
                "Could not reach the server. Try again.".to_owned()
            }
            Self::Auth(_) | Self::LoginRequired => "Please log in to continue.".to_owned(),
            Self::Validation(errors) => join_field_errors(errors),
            Self::NotFound(message) | Self::Server { message, .. } => message.clone(),
        }
    }
}

fn detail_message(payload: &serde_json::Value) -> Option<String> {
    if let Some(text) = payload.as_str() {
        return Some(text.to_owned());
    }

    ["detail", "error", "message"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(serde_json::Value::as_str))
        .map(str::to_owned)
}

fn field_errors(payload: &serde_json::Value) -> Vec<FieldError> {
    let Some(object) = payload.as_object() else {
        return payload
            .as_str()
            .map(|text| vec![FieldError::general(text)])
            .unwrap_or_default();
    };

    let mut errors = Vec::new();
    for (key, value) in object {
        let field = match key.as_str() {
            "detail" | "error" | "message" | "non_field_errors" => None,
            other => Some(other.to_owned()),
        };

        for message in messages(value) {
            errors.push(FieldError {
                field: field.clone(),
                message,
            });
        }
    }

    errors
}

fn messages(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(text) => vec![text.clone()],
        serde_json::Value::Array(items) => items.iter().flat_map(messages).collect(),
        serde_json::Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    if errors.is_empty() {
        return "invalid request".to_owned();
    }

    errors
        .iter()
        .map(FieldError::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut current = Some(error);
    let mut parts = Vec::new();

    while let Some(err) = current {
        let text = err.to_string();
        if !text.is_empty() && parts.last() != Some(&text) {
            parts.push(text);
        }
        current = err.source();
    }

    if parts.is_empty() {
        "unknown error".to_owned()
    } else {
        parts.join(": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_collects_field_messages() {
        let error = ApiError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"module_code": ["This field is required."], "non_field_errors": ["Duplicate review"]}"#,
        );

        assert_eq!(
            error.field_errors(),
            &[
                FieldError::new("module_code", "This field is required."),
                FieldError::general("Duplicate review"),
            ]
        );
    }

    #[test]
    fn unauthorized_maps_to_auth_with_detail() {
        let error = ApiError::from_response(
            StatusCode::UNAUTHORIZED,
            r#"{"detail": "Token is invalid or expired"}"#,
        );

        assert!(matches!(error, ApiError::Auth(ref message) if message == "Token is invalid or expired"));
    }

    #[test]
    fn server_error_without_body_is_network() {
        let error = ApiError::from_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(error.is_transport());

        let error = ApiError::from_response(StatusCode::CONFLICT, r#"{"error": "Already liked"}"#);
        assert!(matches!(error, ApiError::Server { status: 409, .. }));
    }

    #[test]
    fn only_5xx_and_transport_count_as_unavailable() {
        let outage = ApiError::from_response(
            StatusCode::SERVICE_UNAVAILABLE,
            r#"{"detail": "Database is restarting"}"#,
        );
        assert!(matches!(outage, ApiError::Server { status: 503, .. }));
        assert!(outage.is_unavailable());

        let conflict = ApiError::from_response(StatusCode::CONFLICT, r#"{"error": "Already liked"}"#);
        assert!(!conflict.is_unavailable());
        assert!(!ApiError::Auth("expired".to_owned()).is_unavailable());
    }

    #[test]
    fn not_found_keeps_server_detail() {
        let error = ApiError::from_response(StatusCode::NOT_FOUND, r#"{"detail": "No Review matches."}"#);
        assert_eq!(error.user_message(), "No Review matches.");
    }
}
