//! Command-line tool session source.
//!
//! Asks the `az` CLI for a token from its cached login:
//! `az account get-access-token --resource R --output json`.

use crate::config::ResolverConfig;
use crate::process::{locate_executable, run_command};
use crate::source::{Availability, CredentialSource, SourceKind, SourceToken};
use crate::token::{parse_expiry, AccessToken, Principal, PrincipalKind};
use crate::{Result, VaultauthError};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

const CLI_NAME: &str = "az";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<Value>,
    /// Epoch seconds, emitted by newer CLI versions next to `expiresOn`.
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<Value>,
    #[serde(default)]
    tenant: Option<String>,
}

/// `az` CLI credential source.
pub struct AzureCliSource {
    cli_path: Option<PathBuf>,
    tenant_id: Option<String>,
}

impl AzureCliSource {
    /// Creates the source from resolver configuration.
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            cli_path: config.cli_path.clone(),
            tenant_id: config.tenant_id.clone(),
        }
    }

    fn executable(&self) -> Option<PathBuf> {
        locate_executable(self.cli_path.as_deref(), CLI_NAME)
    }
}

#[async_trait]
impl CredentialSource for AzureCliSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CliSession
    }

    async fn availability(&self) -> Availability {
        match (self.executable(), &self.cli_path) {
            (Some(_), _) => Availability::Available,
            (None, Some(path)) => Availability::unavailable(format!(
                "configured CLI path {} does not exist",
                path.display()
            )),
            (None, None) => Availability::unavailable("az CLI not installed"),
        }
    }

    async fn get_token(&self, resource: &str) -> Result<SourceToken> {
        let program = self
            .executable()
            .ok_or_else(|| VaultauthError::ToolNotInstalled(CLI_NAME.to_string()))?;

        let mut args = vec![
            "account",
            "get-access-token",
            "--resource",
            resource,
            "--output",
            "json",
        ];
        if let Some(tenant) = &self.tenant_id {
            args.extend(["--tenant", tenant.as_str()]);
        }

        let output = run_command(&program, &args).await.map_err(|e| match e {
            VaultauthError::CommandFailed(msg) if msg.contains("az login") => {
                VaultauthError::source_failed(
                    self.kind(),
                    "no active CLI login session (run 'az login')",
                )
            }
            other => other,
        })?;

        let body: CliToken = serde_json::from_str(&output)?;
        let expires_on = body
            .expires_on_epoch
            .as_ref()
            .or(body.expires_on.as_ref())
            .and_then(parse_expiry)
            .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(5));

        let token = AccessToken::new(body.access_token, expires_on, resource);
        let mut principal = Principal::from_token(PrincipalKind::User, &token);
        if principal.tenant_id.is_none() {
            principal.tenant_id = body.tenant;
        }

        Ok(SourceToken { token, principal })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::write_script;
    use crate::token::test_jwt;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_override_is_unavailable() {
        let config = ResolverConfig::default().with_cli_path("/nonexistent/az");
        let source = AzureCliSource::new(&config);

        let availability = source.availability().await;
        assert!(!availability.is_available());
        assert!(matches!(
            availability,
            Availability::Unavailable(r) if r.contains("/nonexistent/az")
        ));
    }

    #[tokio::test]
    async fn test_cli_token() {
        let dir = tempdir().unwrap();
        let jwt = test_jwt(json!({"upn": "alice@contoso.com"}));
        let body = json!({
            "accessToken": jwt,
            "expiresOn": "2030-01-01 00:00:00.000000",
            "expires_on": 1893456000,
            "tenant": "tenant-1",
            "tokenType": "Bearer"
        });
        let az = write_script(
            dir.path(),
            "az",
            &format!(
                "[ \"$1 $2 $3\" = \"account get-access-token --resource\" ] || exit 2\necho '{}'",
                body
            ),
        );
        let source = AzureCliSource::new(&ResolverConfig::default().with_cli_path(&az));

        assert!(source.availability().await.is_available());
        let issued = source.get_token("https://vault.azure.net").await.unwrap();
        assert_eq!(issued.principal.to_string(), "User: alice@contoso.com");
        assert_eq!(issued.principal.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(issued.token.expires_on().timestamp(), 1893456000);
    }

    #[tokio::test]
    async fn test_cli_not_logged_in() {
        let dir = tempdir().unwrap();
        let az = write_script(
            dir.path(),
            "az",
            "echo \"ERROR: Please run 'az login' to setup account.\" >&2\nexit 1",
        );
        let source = AzureCliSource::new(&ResolverConfig::default().with_cli_path(&az));

        let err = source.get_token("https://vault.azure.net").await.unwrap_err();
        assert!(err.to_string().contains("no active CLI login session"));
    }
}
