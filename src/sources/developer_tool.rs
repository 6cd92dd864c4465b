//! Developer tool session source.
//!
//! An IDE that has a signed-in account publishes a token provider manifest
//! listing helper executables. Each helper prints a JSON token for the
//! resource passed with `--resource`.

use crate::config::ResolverConfig;
use crate::process::run_command;
use crate::source::{Availability, CredentialSource, SourceKind, SourceToken};
use crate::token::{Principal, PrincipalKind, TokenResponse};
use crate::{Result, VaultauthError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Location of the manifest below `%LOCALAPPDATA%`.
const MANIFEST_RELATIVE_PATH: &str = ".IdentityService/AzureServiceAuth/tokenprovider.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Manifest {
    #[serde(default)]
    token_providers: Vec<TokenProvider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TokenProvider {
    path: PathBuf,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    preference: i32,
}

/// Developer tool credential source.
pub struct DeveloperToolSource {
    manifest: Option<PathBuf>,
}

impl DeveloperToolSource {
    /// Creates the source from resolver configuration.
    ///
    /// Uses the configured manifest path, or the one under `%LOCALAPPDATA%`.
    pub fn new(config: &ResolverConfig) -> Self {
        let manifest = config.token_provider_manifest.clone().or_else(|| {
            std::env::var_os("LOCALAPPDATA").map(|dir| Path::new(&dir).join(MANIFEST_RELATIVE_PATH))
        });
        Self { manifest }
    }

    /// Loads the providers that exist on disk, most preferred first.
    async fn providers(&self) -> Result<Vec<TokenProvider>> {
        let path = self.manifest.as_ref().ok_or_else(|| {
            VaultauthError::source_failed(self.kind(), "no developer tool manifest location")
        })?;

        let data = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultauthError::source_failed(self.kind(), "no developer tool account signed in")
            } else {
                VaultauthError::Io(e)
            }
        })?;

        let manifest: Manifest = serde_json::from_slice(&data)?;
        let mut providers: Vec<_> = manifest
            .token_providers
            .into_iter()
            .filter(|p| p.path.is_file())
            .collect();
        providers.sort_by_key(|p| p.preference);
        Ok(providers)
    }
}

#[async_trait]
impl CredentialSource for DeveloperToolSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DeveloperToolSession
    }

    async fn availability(&self) -> Availability {
        match self.providers().await {
            Ok(providers) if !providers.is_empty() => Availability::Available,
            Ok(_) => Availability::unavailable("manifest lists no installed token provider"),
            Err(VaultauthError::SourceFailed { reason, .. }) => Availability::Unavailable(reason),
            Err(e) => Availability::unavailable(format!("unreadable token provider manifest: {e}")),
        }
    }

    async fn get_token(&self, resource: &str) -> Result<SourceToken> {
        let mut failures = Vec::new();

        for provider in self.providers().await? {
            let mut args: Vec<&str> = provider.arguments.iter().map(String::as_str).collect();
            args.extend(["--resource", resource]);

            let attempt = async {
                let output = run_command(&provider.path, &args).await?;
                let body: TokenResponse = serde_json::from_str(&output)?;
                Ok::<_, VaultauthError>(body.into_token(resource))
            };

            match attempt.await {
                Ok(token) => {
                    let principal = Principal::from_token(PrincipalKind::User, &token);
                    return Ok(SourceToken { token, principal });
                }
                Err(e) => {
                    tracing::debug!(
                        provider = %provider.path.display(),
                        error = %e,
                        "token provider failed"
                    );
                    failures.push(format!("{}: {}", provider.path.display(), e));
                }
            }
        }

        Err(VaultauthError::source_failed(
            self.kind(),
            if failures.is_empty() {
                "no token provider installed".to_string()
            } else {
                failures.join("; ")
            },
        ))
    }
}
