//! Integrated domain authentication source.
//!
//! A domain-joined machine whose domain is federated with the identity
//! provider can obtain a token for the signed-in domain user without a
//! password. The flow has three steps:
//!
//! 1. user realm discovery tells whether the user's domain is federated and
//!    where its WS-Trust endpoint lives;
//! 2. the federation server issues a SAML assertion over its
//!    windows-transport endpoint, authenticating the caller with a SPNEGO
//!    `Negotiate` token from the configured [`NegotiateProvider`];
//! 3. the assertion is exchanged for an access token at the authority's
//!    token endpoint.

use crate::config::ResolverConfig;
use crate::http::{check_status, read_json};
use crate::source::{Availability, CredentialSource, NegotiateProvider, SourceKind, SourceToken};
use crate::token::{Principal, PrincipalKind, TokenResponse};
use crate::{Result, VaultauthError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::{form_urlencoded, Url};
use uuid::Uuid;

const SAML_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:saml1_1-bearer";

const NO_NEGOTIATE: &str =
    "integrated auth unsupported on this platform (no Kerberos/SPNEGO provider configured)";

#[derive(Debug, Deserialize)]
struct UserRealm {
    account_type: String,
    #[serde(default)]
    federation_active_auth_url: Option<String>,
}

/// Integrated domain authentication credential source.
pub struct IntegratedAuthSource {
    http: reqwest::Client,
    authority: String,
    tenant: String,
    client_id: String,
    user: Option<String>,
    negotiate: Option<Arc<dyn NegotiateProvider>>,
    realm_timeout: Duration,
}

impl IntegratedAuthSource {
    /// Creates the source from resolver configuration.
    ///
    /// The domain user is the configured UPN, or `USERNAME@USERDNSDOMAIN`
    /// when the machine is domain-joined.
    pub fn new(config: &ResolverConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            authority: config.authority.trim_end_matches('/').to_string(),
            tenant: config.tenant_id.clone().unwrap_or_else(|| "common".to_string()),
            client_id: config.client_id.clone(),
            user: config.domain_user.clone().or_else(domain_user_from_env),
            negotiate: config.negotiate.clone(),
            realm_timeout: config.realm_discovery_timeout,
        }
    }

    fn negotiate(&self) -> Result<&dyn NegotiateProvider> {
        self.negotiate
            .as_deref()
            .ok_or_else(|| VaultauthError::source_failed(self.kind(), NO_NEGOTIATE))
    }

    /// Discovers the realm and returns the federation endpoint, failing when
    /// the domain is not federated.
    async fn federation_endpoint(&self, user: &str) -> Result<String> {
        let realm = self.discover_realm(user).await?;
        if !realm.account_type.eq_ignore_ascii_case("federated") {
            return Err(VaultauthError::source_failed(
                self.kind(),
                format!("domain of {user} is not federated ({})", realm.account_type),
            ));
        }
        realm.federation_active_auth_url.ok_or_else(|| {
            VaultauthError::source_failed(self.kind(), "realm has no federation endpoint")
        })
    }

    fn user(&self) -> Result<&str> {
        self.user
            .as_deref()
            .ok_or_else(|| {
                VaultauthError::source_failed(self.kind(), "machine is not domain-joined")
            })
    }

    async fn discover_realm(&self, user: &str) -> Result<UserRealm> {
        let url = format!(
            "{}/common/userrealm/{}?api-version=1.0",
            self.authority,
            form_urlencoded::byte_serialize(user.as_bytes()).collect::<String>()
        );
        let response = self.http.get(url).send().await?;
        read_json(response, "user realm discovery", user).await
    }

    async fn request_assertion(&self, active_auth_url: &str) -> Result<String> {
        let url = windows_transport_url(active_auth_url);
        let spn = service_principal(&url).ok_or_else(|| {
            VaultauthError::source_failed(self.kind(), format!("federation URL {url} has no host"))
        })?;
        let ticket = self.negotiate()?.negotiate_token(&spn).await.map_err(|e| {
            VaultauthError::source_failed(self.kind(), format!("no Negotiate token for {spn}: {e}"))
        })?;
        let envelope = wstrust_request(&url);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Negotiate {}", STANDARD.encode(ticket)))
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .header("SOAPAction", "http://docs.oasis-open.org/ws-sx/ws-trust/200512/RST/Issue")
            .body(envelope)
            .send()
            .await?;

        let response = check_status(response, "federation server", &url)
            .await
            .map_err(|e| {
                VaultauthError::source_failed(
                    self.kind(),
                    format!("federation server rejected integrated authentication: {e}"),
                )
            })?;
        let body = response.text().await?;

        extract_assertion(&body).map(str::to_string).ok_or_else(|| {
            VaultauthError::source_failed(
                self.kind(),
                "federation response carried no SAML assertion",
            )
        })
    }

    async fn exchange_assertion(&self, assertion: &str, resource: &str) -> Result<TokenResponse> {
        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", SAML_BEARER_GRANT)
            .append_pair("assertion", &STANDARD.encode(assertion))
            .append_pair("client_id", &self.client_id)
            .append_pair("resource", resource)
            .append_pair("scope", "openid")
            .finish();

        let response = self
            .http
            .post(format!("{}/{}/oauth2/token", self.authority, self.tenant))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;

        read_json(response, "token endpoint", resource).await
    }
}

fn domain_user_from_env() -> Option<String> {
    let domain = std::env::var("USERDNSDOMAIN").ok().filter(|d| !d.is_empty())?;
    let user = std::env::var("USERNAME").ok().filter(|u| !u.is_empty())?;
    Some(format!("{}@{}", user, domain.to_ascii_lowercase()))
}

/// The realm advertises the username/password endpoint; integrated auth uses
/// the sibling windows-transport endpoint.
fn windows_transport_url(active_auth_url: &str) -> String {
    match active_auth_url.rsplit_once('/') {
        Some((base, "usernamemixed")) => format!("{base}/windowstransport"),
        _ => active_auth_url.to_string(),
    }
}

/// Kerberos service principal of the federation server's HTTP endpoint.
fn service_principal(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.host_str().map(|host| format!("HTTP/{host}"))
}

fn wstrust_request(to: &str) -> String {
    let created = Utc::now();
    let expires = created + ChronoDuration::minutes(10);
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
 xmlns:a="http://www.w3.org/2005/08/addressing"
 xmlns:u="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
<s:Header>
<a:Action s:mustUnderstand="1">http://docs.oasis-open.org/ws-sx/ws-trust/200512/RST/Issue</a:Action>
<a:MessageID>urn:uuid:{id}</a:MessageID>
<a:ReplyTo><a:Address>http://www.w3.org/2005/08/addressing/anonymous</a:Address></a:ReplyTo>
<a:To s:mustUnderstand="1">{to}</a:To>
<o:Security s:mustUnderstand="1"
 xmlns:o="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
<u:Timestamp u:Id="_0">
<u:Created>{created}</u:Created><u:Expires>{expires}</u:Expires>
</u:Timestamp>
</o:Security>
</s:Header>
<s:Body>
<trust:RequestSecurityToken xmlns:trust="http://docs.oasis-open.org/ws-sx/ws-trust/200512">
<wsp:AppliesTo xmlns:wsp="http://schemas.xmlsoap.org/ws/2004/09/policy">
<a:EndpointReference><a:Address>urn:federation:MicrosoftOnline</a:Address></a:EndpointReference>
</wsp:AppliesTo>
<trust:KeyType>http://docs.oasis-open.org/ws-sx/ws-trust/200512/Bearer</trust:KeyType>
<trust:RequestType>http://docs.oasis-open.org/ws-sx/ws-trust/200512/Issue</trust:RequestType>
</trust:RequestSecurityToken>
</s:Body>
</s:Envelope>"#,
        id = Uuid::new_v4(),
        to = to,
        created = created.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        expires = expires.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
    )
}

fn extract_assertion(body: &str) -> Option<&str> {
    let start = body.find("<saml:Assertion")?;
    const CLOSE: &str = "</saml:Assertion>";
    let end = body[start..].find(CLOSE)? + start + CLOSE.len();
    Some(&body[start..end])
}

#[async_trait]
impl CredentialSource for IntegratedAuthSource {
    fn kind(&self) -> SourceKind {
        SourceKind::IntegratedAuth
    }

    async fn availability(&self) -> Availability {
        let Some(user) = self.user.as_deref() else {
            return Availability::unavailable("machine is not domain-joined");
        };
        if self.negotiate.is_none() {
            return Availability::unavailable(NO_NEGOTIATE);
        }

        match tokio::time::timeout(self.realm_timeout, self.federation_endpoint(user)).await {
            Ok(Ok(_)) => Availability::Available,
            Ok(Err(VaultauthError::SourceFailed { reason, .. })) => {
                Availability::unavailable(reason)
            }
            Ok(Err(e)) => Availability::unavailable(format!("user realm discovery failed: {e}")),
            Err(_) => Availability::unavailable(format!(
                "user realm discovery timed out after {}ms",
                self.realm_timeout.as_millis()
            )),
        }
    }

    async fn get_token(&self, resource: &str) -> Result<SourceToken> {
        let user = self.user()?;
        self.negotiate()?;

        let active_auth_url = self.federation_endpoint(user).await?;
        let assertion = self.request_assertion(&active_auth_url).await?;
        let token = self.exchange_assertion(&assertion, resource).await?.into_token(resource);
        let principal = Principal::from_token(PrincipalKind::User, &token).or_name(user);

        Ok(SourceToken { token, principal })
    }
}
