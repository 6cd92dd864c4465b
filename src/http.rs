//! Shared HTTP plumbing for the identity, vault and management endpoints.

use crate::{Result, VaultauthError};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Builds the HTTP client used by every outbound call.
///
/// Redirects are disabled so a bearer token is never forwarded to another host.
pub fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("vaultauth/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(VaultauthError::Http)
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Value,
    #[serde(default)]
    error_description: Option<String>,
}

/// Extracts a readable message from an error response body.
///
/// Understands `{"error": {"code", "message"}}` (vault, management API) and
/// `{"error": "...", "error_description": "..."}` (OAuth2 endpoints); any
/// other body is returned as text.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return body.trim().to_string();
    };

    let detail = match &envelope.error {
        Value::Object(map) => {
            let code = map.get("code").and_then(Value::as_str).unwrap_or_default();
            let message = map.get("message").and_then(Value::as_str).unwrap_or_default();
            match (code.is_empty(), message.is_empty()) {
                (false, false) => format!("{code}: {message}"),
                (true, false) => message.to_string(),
                _ => code.to_string(),
            }
        }
        Value::String(code) => code.clone(),
        other => other.to_string(),
    };

    match envelope.error_description {
        Some(desc) => format!("{detail}: {desc}"),
        None => detail,
    }
}

/// Turns a response into `T`, or into a typed error on a non-success status.
///
/// 401/403 become [`VaultauthError::AuthorizationDenied`] and 404 becomes
/// [`VaultauthError::NotFound`], both keyed by `target`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    service: &str,
    target: &str,
) -> Result<T> {
    let response = check_status(response, service, target).await?;
    Ok(response.json::<T>().await?)
}

/// Returns the response untouched on success, or a typed error otherwise.
pub(crate) async fn check_status(
    response: Response,
    service: &str,
    target: &str,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VaultauthError::AuthorizationDenied {
            target: target.to_string(),
            message,
        },
        StatusCode::NOT_FOUND => VaultauthError::NotFound(target.to_string()),
        _ => VaultauthError::UnexpectedResponse {
            service: service.to_string(),
            status: status.as_u16(),
            message,
        },
    })
}
