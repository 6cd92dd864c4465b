//! Access tokens and the principals they were issued to.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

/// Identity type of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    /// A signed-in user
    User,
    /// An application (managed identity or service principal)
    App,
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::App => write!(f, "App"),
        }
    }
}

/// The identity a token was issued to.
///
/// Fields other than `kind` are filled from the token's claims when the token
/// is a readable JWT, so they are best-effort and for display only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// User or application
    pub kind: PrincipalKind,
    /// Display name, UPN or application id
    pub name: Option<String>,
    /// Directory object id
    pub object_id: Option<String>,
    /// Tenant id
    pub tenant_id: Option<String>,
    /// Application (client) id
    pub app_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Claims {
    upn: Option<String>,
    unique_name: Option<String>,
    preferred_username: Option<String>,
    oid: Option<String>,
    tid: Option<String>,
    appid: Option<String>,
    azp: Option<String>,
}

impl Principal {
    /// Creates a principal with only the kind known.
    pub fn new(kind: PrincipalKind) -> Self {
        Self {
            kind,
            name: None,
            object_id: None,
            tenant_id: None,
            app_id: None,
        }
    }

    /// Builds a principal from the claims of `token`, if it is a JWT.
    pub fn from_token(kind: PrincipalKind, token: &AccessToken) -> Self {
        let claims = decode_claims(token.secret()).unwrap_or_default();
        let app_id = claims.appid.or(claims.azp);
        let name = match kind {
            PrincipalKind::User => claims
                .upn
                .or(claims.unique_name)
                .or(claims.preferred_username),
            PrincipalKind::App => app_id.clone(),
        };

        Self {
            kind,
            name,
            object_id: claims.oid,
            tenant_id: claims.tid,
            app_id,
        }
    }

    /// Sets the display name if none was decoded.
    pub fn or_name(mut self, name: impl Into<String>) -> Self {
        if self.name.is_none() {
            self.name = Some(name.into());
        }
        self
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self
            .name
            .as_deref()
            .or(self.object_id.as_deref())
            .unwrap_or("unknown");
        write!(f, "{}: {}", self.kind, id)
    }
}

fn decode_claims(jwt: &str) -> Option<Claims> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// An opaque bearer credential.
///
/// The token value is held in a [`SecretString`], so `Debug` output is
/// redacted. Tokens are neither cached nor refreshed by this crate.
#[derive(Debug)]
pub struct AccessToken {
    token: SecretString,
    expires_on: DateTime<Utc>,
    resource: String,
}

impl AccessToken {
    /// Creates a token for `resource` expiring at `expires_on`.
    pub fn new(
        token: impl Into<String>,
        expires_on: DateTime<Utc>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_on,
            resource: resource.into(),
        }
    }

    /// Returns the raw bearer value.
    pub fn secret(&self) -> &str {
        self.token.expose_secret()
    }

    /// Returns when the token expires.
    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    /// Returns the resource the token was requested for.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Checks the expiry against the current time.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_on
    }

    /// Formats the `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.secret())
    }
}

impl Clone for AccessToken {
    fn clone(&self) -> Self {
        Self {
            token: SecretString::from(self.secret().to_owned()),
            expires_on: self.expires_on,
            resource: self.resource.clone(),
        }
    }
}

/// OAuth2-style token response shared by the identity endpoints.
///
/// `expires_on` arrives as epoch seconds (number or string), RFC 3339, or a
/// local timestamp depending on the mechanism, so it is kept as raw JSON.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_on: Option<Value>,
    #[serde(default)]
    pub expires_in: Option<Value>,
}

impl TokenResponse {
    /// Converts the response into an [`AccessToken`].
    ///
    /// Falls back to `expires_in` and finally to one hour from now when no
    /// expiry can be parsed.
    pub fn into_token(self, resource: &str) -> AccessToken {
        let expires_on = self
            .expires_on
            .as_ref()
            .and_then(parse_expiry)
            .or_else(|| {
                self.expires_in
                    .as_ref()
                    .and_then(value_as_i64)
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            })
            .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1));

        AccessToken::new(self.access_token, expires_on, resource)
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses the expiry formats emitted by the supported mechanisms.
pub(crate) fn parse_expiry(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value_as_i64(value) {
        return DateTime::from_timestamp(secs, 0);
    }

    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // az CLI: "2024-01-01 12:00:00.000000" in local time
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
pub(crate) fn test_jwt(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_expiry_formats() {
        let epoch = parse_expiry(&json!(1700000000)).unwrap();
        assert_eq!(epoch.timestamp(), 1700000000);

        let epoch_str = parse_expiry(&json!("1700000000")).unwrap();
        assert_eq!(epoch_str.timestamp(), 1700000000);

        let rfc = parse_expiry(&json!("2023-11-14T22:13:20+00:00")).unwrap();
        assert_eq!(rfc.timestamp(), 1700000000);

        assert!(parse_expiry(&json!("2023-11-14 22:13:20.000000")).is_some());
        assert!(parse_expiry(&json!("tomorrow")).is_none());
    }

    #[test]
    fn test_token_response_expires_in_fallback() {
        let resp: TokenResponse =
            serde_json::from_value(json!({"access_token": "t", "expires_in": "3599"})).unwrap();
        let token = resp.into_token("https://vault.azure.net");

        assert!(!token.is_expired());
        assert_eq!(token.resource(), "https://vault.azure.net");
        assert_eq!(token.bearer(), "Bearer t");
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AccessToken::new("super-secret", Utc::now(), "r");
        let dbg = format!("{:?}", token);
        assert!(!dbg.contains("super-secret"));
    }

    #[test]
    fn test_principal_from_user_token() {
        let jwt = test_jwt(json!({"upn": "alice@contoso.com", "oid": "o1", "tid": "t1"}));
        let token = AccessToken::new(jwt, Utc::now(), "r");
        let principal = Principal::from_token(PrincipalKind::User, &token);

        assert_eq!(principal.name.as_deref(), Some("alice@contoso.com"));
        assert_eq!(principal.tenant_id.as_deref(), Some("t1"));
        assert_eq!(principal.to_string(), "User: alice@contoso.com");
    }

    #[test]
    fn test_principal_from_app_token() {
        let jwt = test_jwt(json!({"appid": "app-123", "oid": "o2"}));
        let token = AccessToken::new(jwt, Utc::now(), "r");
        let principal = Principal::from_token(PrincipalKind::App, &token);

        assert_eq!(principal.kind, PrincipalKind::App);
        assert_eq!(principal.name.as_deref(), Some("app-123"));
    }

    #[test]
    fn test_principal_from_opaque_token() {
        let token = AccessToken::new("opaque", Utc::now(), "r");
        let principal = Principal::from_token(PrincipalKind::User, &token).or_name("bob");
        assert_eq!(principal.to_string(), "User: bob");
    }
}
