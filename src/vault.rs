//! Vault access: the [`SecretStore`] trait, its HTTP implementation, and the
//! application-facing [`read_secret`] helper.

use crate::config::{VaultConfig, VAULT_RESOURCE};
use crate::http::read_json;
use crate::resolver::TokenCredential;
use crate::source::SourceKind;
use crate::token::{AccessToken, Principal};
use crate::validation::validate_secret_name;
use crate::{Result, VaultauthError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

/// Vault REST API version.
const API_VERSION: &str = "7.4";

/// A secret as returned by the vault.
///
/// The value is a [`SecretString`]; it never appears in `Debug` output.
#[derive(Debug)]
pub struct SecretBundle {
    /// Secret name
    pub name: String,
    /// Current value
    pub value: SecretString,
    /// Full secret identifier (`{vault}/secrets/{name}/{version}`)
    pub id: Option<String>,
    /// Version id, the last segment of `id`
    pub version: Option<String>,
    /// When this version was written
    pub updated: Option<DateTime<Utc>>,
}

impl SecretBundle {
    /// Creates a bundle, deriving the version from `id`.
    pub fn new(name: impl Into<String>, value: SecretString, id: Option<String>) -> Self {
        let version = id
            .as_deref()
            .and_then(|id| id.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string);
        Self {
            name: name.into(),
            value,
            id,
            version,
            updated: None,
        }
    }
}

/// SecretStore is a vault holding name/value pairs with version history.
///
/// # Implementations
///
/// - [`KeyVaultClient`]: the vault REST API
/// - `MockVault` (feature `mock`): in-memory store with error injection
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resource identifier tokens for this store must be issued for.
    fn resource(&self) -> &str;

    /// Human-readable location (the vault URL).
    fn location(&self) -> String;

    /// Reads the current version of a secret.
    ///
    /// # Errors
    ///
    /// - [`VaultauthError::NotFound`]: secret does not exist
    /// - [`VaultauthError::AuthorizationDenied`]: the token was refused
    async fn get_secret(&self, name: &str, token: &AccessToken) -> Result<SecretBundle>;

    /// Writes a new version of a secret, creating it if needed.
    ///
    /// Prior versions stay retrievable through the vault's own versioning.
    ///
    /// # Errors
    ///
    /// - [`VaultauthError::AuthorizationDenied`]: the token was refused
    async fn set_secret(
        &self,
        name: &str,
        value: &SecretString,
        token: &AccessToken,
    ) -> Result<SecretBundle>;
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    value: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    attributes: Option<SecretAttributes>,
}

#[derive(Debug, Deserialize)]
struct SecretAttributes {
    #[serde(default)]
    updated: Option<i64>,
}

impl SecretResponse {
    fn into_bundle(self, name: &str) -> SecretBundle {
        let updated = self
            .attributes
            .and_then(|a| a.updated)
            .and_then(|ts| DateTime::from_timestamp(ts, 0));
        let mut bundle = SecretBundle::new(name, SecretString::from(self.value), self.id);
        bundle.updated = updated;
        bundle
    }
}

/// Vault REST client.
///
/// Requests go to `https://{vault-name}.{vault-domain}/secrets/{secret-name}`
/// with the caller's bearer token.
pub struct KeyVaultClient {
    http: reqwest::Client,
    base_url: Url,
}

impl KeyVaultClient {
    /// Creates a client for the configured vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault name is invalid or the URL does not parse.
    pub fn new(config: &VaultConfig) -> Result<Self> {
        Ok(Self {
            http: crate::http::client()?,
            base_url: config.base_url()?,
        })
    }

    /// Builds `{base}/secrets/{name}?api-version=7.4`.
    fn secret_url(&self, name: &str) -> Result<Url> {
        validate_secret_name(name)?;

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                VaultauthError::InvalidConfig(format!(
                    "vault URL {} cannot be a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["secrets", name]);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }
}

#[async_trait]
impl SecretStore for KeyVaultClient {
    fn resource(&self) -> &str {
        VAULT_RESOURCE
    }

    fn location(&self) -> String {
        self.base_url.to_string()
    }

    async fn get_secret(&self, name: &str, token: &AccessToken) -> Result<SecretBundle> {
        let response = self
            .http
            .get(self.secret_url(name)?)
            .header("Authorization", token.bearer())
            .send()
            .await?;

        let body: SecretResponse = read_json(response, "vault", name).await?;
        Ok(body.into_bundle(name))
    }

    async fn set_secret(
        &self,
        name: &str,
        value: &SecretString,
        token: &AccessToken,
    ) -> Result<SecretBundle> {
        let payload = serde_json::json!({ "value": value.expose_secret() });
        let response = self
            .http
            .put(self.secret_url(name)?)
            .header("Authorization", token.bearer())
            .json(&payload)
            .send()
            .await?;

        let body: SecretResponse = read_json(response, "vault", name).await?;
        let bundle = body.into_bundle(name);
        tracing::debug!(secret = name, version = ?bundle.version, "vault secret version written");
        Ok(bundle)
    }
}

/// Result of a successful [`read_secret`].
#[derive(Debug)]
pub struct SecretLookup {
    /// The secret
    pub secret: SecretBundle,
    /// Source that produced the token
    pub source: SourceKind,
    /// Identity the token was issued to
    pub principal: Principal,
}

impl SecretLookup {
    /// Describes the principal and source for display,
    /// e.g. `"App: 1234 via managed-identity"`.
    pub fn describe(&self) -> String {
        format!("{} via {}", self.principal, self.source)
    }
}

/// Resolves a token for the store and reads secret `name`.
///
/// Every failure, including credential resolution, is returned as
/// [`VaultauthError::SecretRetrievalFailed`] naming the principal and source
/// attempted. A vault that refuses the token yields
/// [`VaultauthError::AuthorizationDenied`] inside it; no other source is tried.
///
/// # Example
///
/// ```no_run
/// use vaultauth::{read_secret, CredentialResolver, KeyVaultClient, ResolverConfig, VaultConfig};
/// use secrecy::ExposeSecret;
///
/// #[tokio::main]
/// async fn main() -> vaultauth::Result<()> {
///     let resolver = CredentialResolver::new(ResolverConfig::from_env()?)?;
///     let vault = KeyVaultClient::new(&VaultConfig::new("contoso-kv"))?;
///
///     match read_secret(&resolver, &vault, "db-password").await {
///         Ok(lookup) => println!(
///             "{} (principal used: {})",
///             lookup.secret.value.expose_secret(),
///             lookup.describe()
///         ),
///         Err(e) => println!("Something went wrong: {e}"),
///     }
///     Ok(())
/// }
/// ```
pub async fn read_secret(
    credential: &dyn TokenCredential,
    store: &dyn SecretStore,
    name: &str,
) -> Result<SecretLookup> {
    let resolved = credential
        .get_token(store.resource())
        .await
        .map_err(|e| VaultauthError::retrieval(name, None, e))?;

    match store.get_secret(name, &resolved.token).await {
        Ok(secret) => {
            tracing::info!(
                secret = name,
                vault = %store.location(),
                principal = %resolved.principal,
                source = %resolved.source,
                "secret retrieved"
            );
            Ok(SecretLookup {
                secret,
                source: resolved.source,
                principal: resolved.principal,
            })
        }
        Err(e) => {
            tracing::warn!(
                secret = name,
                vault = %store.location(),
                principal = %resolved.principal,
                error = %e,
                "secret retrieval failed"
            );
            Err(VaultauthError::retrieval(name, Some(resolved.describe()), e))
        }
    }
}
