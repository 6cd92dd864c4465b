//! End-to-end secret reads: managed identity token issuance and vault access
//! against local HTTP doubles.
//!
//! Run with:
//!   cargo test --test integration_keyvault

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use secrecy::ExposeSecret;
use serde_json::json;
use std::time::Duration;
use vaultauth::config::{ConnectionString, ManagedIdentityEndpoint};
use vaultauth::{
    read_secret, CredentialResolver, KeyVaultClient, PrincipalKind, ResolverConfig, SourceKind,
    VaultConfig, VaultauthError,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const APP_ID: &str = "5f0e3c1a-8a37-4c3e-9d4b-0b6a1f2f9c11";

fn jwt(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.sig")
}

/// Resolver pinned to managed identity through a connection string.
fn resolver(identity: &MockServer) -> CredentialResolver {
    let cs: ConnectionString = "RunAs=App".parse().unwrap();
    let config = ResolverConfig::default()
        .with_connection_string(&cs)
        .with_managed_identity(ManagedIdentityEndpoint::AppService {
            url: format!("{}/msi/token", identity.uri()),
            header: "identity-header".to_string(),
        })
        .with_source_timeout(Duration::from_secs(5));
    CredentialResolver::new(config).unwrap()
}

async fn identity_endpoint(token: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/msi/token"))
        .and(query_param("resource", "https://vault.azure.net"))
        .and(header("X-IDENTITY-HEADER", "identity-header"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": token,
            "expires_on": "4102444800",
            "resource": "https://vault.azure.net",
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_read_secret_with_managed_identity() {
    let token = jwt(json!({ "appid": APP_ID, "tid": "contoso" }));
    let identity = identity_endpoint(&token).await;

    let vault_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secrets/db-password"))
        .and(query_param("api-version", "7.4"))
        .and(header("Authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": "hunter2",
            "id": format!("{}/secrets/db-password/abc123", vault_server.uri()),
            "attributes": { "enabled": true, "updated": 1700000000 }
        })))
        .expect(1)
        .mount(&vault_server)
        .await;

    let vault =
        KeyVaultClient::new(&VaultConfig::new("unused").with_url(vault_server.uri())).unwrap();
    let lookup = read_secret(&resolver(&identity), &vault, "db-password").await.unwrap();

    assert_eq!(lookup.secret.value.expose_secret(), "hunter2");
    assert_eq!(lookup.secret.version.as_deref(), Some("abc123"));
    assert_eq!(lookup.source, SourceKind::ManagedIdentity);
    assert_eq!(lookup.principal.kind, PrincipalKind::App);
    assert_eq!(lookup.describe(), format!("App: {APP_ID} via managed-identity"));
}

#[tokio::test]
async fn test_vault_refusal_names_the_principal() {
    let token = jwt(json!({ "appid": APP_ID }));
    let identity = identity_endpoint(&token).await;

    let vault_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secrets/db-password"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": "Forbidden", "message": "caller is not authorized" }
        })))
        .mount(&vault_server)
        .await;

    let vault =
        KeyVaultClient::new(&VaultConfig::new("unused").with_url(vault_server.uri())).unwrap();
    let err = read_secret(&resolver(&identity), &vault, "db-password")
        .await
        .unwrap_err();

    assert!(err.is_authorization_denied());
    match &err {
        VaultauthError::SecretRetrievalFailed { secret, principal, .. } => {
            assert_eq!(secret, "db-password");
            assert_eq!(
                principal.as_deref(),
                Some(format!("App: {APP_ID} via managed-identity").as_str())
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_identity_endpoint_failure_reports_source() {
    let identity = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/msi/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "Identity not found"
        })))
        .mount(&identity)
        .await;

    let vault_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&vault_server)
        .await;

    let vault =
        KeyVaultClient::new(&VaultConfig::new("unused").with_url(vault_server.uri())).unwrap();
    let err = read_secret(&resolver(&identity), &vault, "db-password")
        .await
        .unwrap_err();

    let failures = err.source_failures().expect("resolution failure expected");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, SourceKind::ManagedIdentity);
    assert!(failures[0].attempted);
    assert!(failures[0].reason.contains("Identity not found"));
    assert!(!err.to_string().contains("principal used"));
}

#[tokio::test]
async fn test_invalid_secret_name_rejected_before_request() {
    let token = jwt(json!({ "appid": APP_ID }));
    let identity = identity_endpoint(&token).await;
    let vault_server = MockServer::start().await;

    let vault =
        KeyVaultClient::new(&VaultConfig::new("unused").with_url(vault_server.uri())).unwrap();
    let err = read_secret(&resolver(&identity), &vault, "not/a/name")
        .await
        .unwrap_err();

    assert!(matches!(err, VaultauthError::SecretRetrievalFailed { .. }));
    assert!(vault_server.received_requests().await.unwrap_or_default().is_empty());
}
