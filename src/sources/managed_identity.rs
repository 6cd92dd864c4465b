//! Managed identity source.
//!
//! Talks to the identity endpoint the hosting platform exposes to the
//! process: the App Service endpoint advertised through environment variables,
//! or the instance metadata service on virtual machines.

use crate::config::{ManagedIdentityEndpoint, ResolverConfig};
use crate::http::read_json;
use crate::source::{Availability, CredentialSource, SourceKind, SourceToken};
use crate::token::{Principal, PrincipalKind, TokenResponse};
use crate::{Result, VaultauthError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use url::Url;

/// Managed identity credential source.
pub struct ManagedIdentitySource {
    http: reqwest::Client,
    endpoint: ManagedIdentityEndpoint,
    client_id: Option<String>,
    probe_timeout: Duration,
}

impl ManagedIdentitySource {
    /// Creates the source from resolver configuration.
    pub fn new(config: &ResolverConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: config.managed_identity.clone(),
            client_id: config.managed_identity_client_id.clone(),
            probe_timeout: config.imds_probe_timeout,
        }
    }

    fn parse_url(raw: &str) -> Result<Url> {
        Url::parse(raw).map_err(|e| {
            VaultauthError::InvalidConfig(format!("managed identity endpoint '{raw}': {e}"))
        })
    }

    /// Builds the token request for `resource`.
    fn request(&self, resource: &str) -> Result<reqwest::RequestBuilder> {
        let request = match &self.endpoint {
            ManagedIdentityEndpoint::AppService { url, header } => {
                let mut url = Self::parse_url(url)?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("resource", resource);
                    query.append_pair("api-version", "2019-08-01");
                    if let Some(id) = &self.client_id {
                        query.append_pair("client_id", id);
                    }
                }
                self.http.get(url).header("X-IDENTITY-HEADER", header)
            }
            ManagedIdentityEndpoint::LegacyAppService { url, secret } => {
                let mut url = Self::parse_url(url)?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("resource", resource);
                    query.append_pair("api-version", "2017-09-01");
                    if let Some(id) = &self.client_id {
                        query.append_pair("clientid", id);
                    }
                }
                self.http.get(url).header("Secret", secret)
            }
            ManagedIdentityEndpoint::Imds { url } => {
                let mut url = Self::parse_url(url)?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("api-version", "2018-02-01");
                    query.append_pair("resource", resource);
                    if let Some(id) = &self.client_id {
                        query.append_pair("client_id", id);
                    }
                }
                self.http.get(url).header("Metadata", "true")
            }
        };
        Ok(request)
    }
}

#[async_trait]
impl CredentialSource for ManagedIdentitySource {
    fn kind(&self) -> SourceKind {
        SourceKind::ManagedIdentity
    }

    async fn availability(&self) -> Availability {
        let url = match &self.endpoint {
            ManagedIdentityEndpoint::AppService { .. }
            | ManagedIdentityEndpoint::LegacyAppService { .. } => return Availability::Available,
            ManagedIdentityEndpoint::Imds { url } => url,
        };

        let Ok(url) = Url::parse(url) else {
            return Availability::unavailable(format!("invalid metadata endpoint '{url}'"));
        };
        let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
            return Availability::unavailable(format!("metadata endpoint '{url}' has no host"));
        };

        match tokio::time::timeout(self.probe_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => Availability::Available,
            Ok(Err(e)) => Availability::unavailable(format!("metadata endpoint unreachable: {e}")),
            Err(_) => Availability::unavailable(format!(
                "metadata endpoint did not answer within {:?}",
                self.probe_timeout
            )),
        }
    }

    async fn get_token(&self, resource: &str) -> Result<SourceToken> {
        let response = self.request(resource)?.send().await?;
        let body: TokenResponse = read_json(response, "identity endpoint", resource)
            .await
            .map_err(|e| VaultauthError::source_failed(self.kind(), e.to_string()))?;

        let token = body.into_token(resource);
        let fallback = self
            .client_id
            .clone()
            .unwrap_or_else(|| "system-assigned identity".to_string());
        let principal = Principal::from_token(PrincipalKind::App, &token).or_name(fallback);

        tracing::debug!(principal = %principal, "managed identity issued token");
        Ok(SourceToken { token, principal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::test_jwt;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(endpoint: ManagedIdentityEndpoint) -> ManagedIdentitySource {
        let config = ResolverConfig::default().with_managed_identity(endpoint);
        ManagedIdentitySource::new(&config, crate::http::client().unwrap())
    }

    #[tokio::test]
    async fn test_app_service_token() {
        let server = MockServer::start().await;
        let jwt = test_jwt(json!({"appid": "mi-app", "oid": "o1"}));

        Mock::given(method("GET"))
            .and(path("/msi/token"))
            .and(header("X-IDENTITY-HEADER", "hdr"))
            .and(query_param("resource", "https://vault.azure.net"))
            .and(query_param("api-version", "2019-08-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": jwt,
                "expires_on": "1900000000",
                "resource": "https://vault.azure.net",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = source(ManagedIdentityEndpoint::AppService {
            url: format!("{}/msi/token", server.uri()),
            header: "hdr".to_string(),
        });

        assert!(source.availability().await.is_available());
        let issued = source.get_token("https://vault.azure.net").await.unwrap();
        assert_eq!(issued.principal.kind, PrincipalKind::App);
        assert_eq!(issued.principal.name.as_deref(), Some("mi-app"));
        assert_eq!(issued.token.expires_on().timestamp(), 1900000000);
    }

    #[tokio::test]
    async fn test_imds_probe_and_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata/identity/oauth2/token"))
            .and(header("Metadata", "true"))
            .and(query_param("client_id", "user-assigned"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "opaque",
                "expires_on": 1900000000
            })))
            .mount(&server)
            .await;

        let config = ResolverConfig::default()
            .with_managed_identity(ManagedIdentityEndpoint::Imds {
                url: format!("{}/metadata/identity/oauth2/token", server.uri()),
            })
            .with_managed_identity_client_id("user-assigned");
        let source = ManagedIdentitySource::new(&config, crate::http::client().unwrap());

        assert!(source.availability().await.is_available());
        let issued = source.get_token("https://vault.azure.net").await.unwrap();
        assert_eq!(issued.principal.to_string(), "App: user-assigned");
    }

    #[tokio::test]
    async fn test_imds_unreachable_is_unavailable() {
        // Port 9 on localhost is closed in test environments.
        let source = source(ManagedIdentityEndpoint::Imds {
            url: "http://127.0.0.1:9/metadata/identity/oauth2/token".to_string(),
        });

        assert!(!source.availability().await.is_available());
    }

    #[tokio::test]
    async fn test_endpoint_error_is_source_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_request",
                "error_description": "Identity not found"
            })))
            .mount(&server)
            .await;

        let source = source(ManagedIdentityEndpoint::AppService {
            url: server.uri(),
            header: "hdr".to_string(),
        });

        let err = source.get_token("https://vault.azure.net").await.unwrap_err();
        assert!(matches!(
            err,
            VaultauthError::SourceFailed { kind: SourceKind::ManagedIdentity, .. }
        ));
        assert!(err.to_string().contains("Identity not found"));
    }
}
