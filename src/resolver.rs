//! Credential resolution across the ordered source chain.

use crate::config::ResolverConfig;
use crate::error::SourceFailure;
use crate::source::{Availability, CredentialSource, SourceKind};
use crate::token::{AccessToken, Principal};
use crate::{Result, VaultauthError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::Instrument;

/// A token together with the source and principal that produced it.
///
/// `source` and `principal` are for display and audit. They must not drive
/// authorization decisions.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    /// The bearer token
    pub token: AccessToken,
    /// Source that produced the token
    pub source: SourceKind,
    /// Identity the token was issued to
    pub principal: Principal,
}

impl ResolvedCredential {
    /// Describes the principal and source for diagnostics,
    /// e.g. `"User: alice@contoso.com via cli-session"`.
    pub fn describe(&self) -> String {
        format!("{} via {}", self.principal, self.source)
    }
}

/// Anything that can hand out a token for a resource.
///
/// Implemented by [`CredentialResolver`]; consumers such as the secret reader
/// and the rotation job depend on this trait.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Obtains a token for `resource`.
    async fn get_token(&self, resource: &str) -> Result<ResolvedCredential>;
}

/// Resolves a credential by trying each source in fixed priority order.
///
/// # Example
///
/// ```no_run
/// use vaultauth::{CredentialResolver, ResolverConfig};
///
/// #[tokio::main]
/// async fn main() -> vaultauth::Result<()> {
///     let resolver = CredentialResolver::new(ResolverConfig::from_env()?)?;
///     let credential = resolver.resolve("https://vault.azure.net").await?;
///     println!("authenticated as {}", credential.describe());
///     Ok(())
/// }
/// ```
pub struct CredentialResolver {
    sources: Vec<Box<dyn CredentialSource>>,
    timeout: Duration,
}

impl CredentialResolver {
    /// Creates a resolver with the four built-in sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        Ok(Self {
            sources: crate::sources::default_sources(&config)?,
            timeout: config.source_timeout,
        })
    }

    /// Creates a resolver over an explicit ordered list of sources.
    pub fn with_sources(sources: Vec<Box<dyn CredentialSource>>, timeout: Duration) -> Self {
        Self { sources, timeout }
    }

    /// Kinds of the configured sources, in attempt order.
    pub fn source_kinds(&self) -> Vec<SourceKind> {
        self.sources.iter().map(|s| s.kind()).collect()
    }

    /// Tries each source in order and returns the first token obtained.
    ///
    /// Sources whose availability predicate does not hold are skipped without
    /// invoking their mechanism. Each attempt is bounded by the configured
    /// timeout. Attempts are strictly sequential.
    ///
    /// # Errors
    ///
    /// Returns [`VaultauthError::NoCredentialAvailable`] with one
    /// [`SourceFailure`] per source when no source produced a token.
    pub async fn resolve(&self, resource: &str) -> Result<ResolvedCredential> {
        let mut failures = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let kind = source.kind();
            let span = tracing::debug_span!("credential_source", source = %kind);

            let outcome = async {
                if let Availability::Unavailable(reason) = source.availability().await {
                    tracing::debug!(%reason, "source unavailable, skipping");
                    return Err(SourceFailure {
                        kind,
                        reason,
                        attempted: false,
                    });
                }

                match tokio::time::timeout(self.timeout, source.get_token(resource)).await {
                    Ok(Ok(issued)) => Ok(issued),
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "source attempt failed");
                        Err(SourceFailure {
                            kind,
                            reason: failure_reason(e),
                            attempted: true,
                        })
                    }
                    Err(_) => {
                        tracing::debug!(timeout = ?self.timeout, "source attempt timed out");
                        Err(SourceFailure {
                            kind,
                            reason: format!("timed out after {:?}", self.timeout),
                            attempted: true,
                        })
                    }
                }
            }
            .instrument(span)
            .await;

            match outcome {
                Ok(issued) => {
                    tracing::info!(
                        source = %kind,
                        principal = %issued.principal,
                        resource,
                        "credential resolved"
                    );
                    return Ok(ResolvedCredential {
                        token: issued.token,
                        source: kind,
                        principal: issued.principal,
                    });
                }
                Err(failure) => failures.push(failure),
            }
        }

        tracing::warn!(resource, attempts = failures.len(), "no credential source succeeded");
        Err(VaultauthError::NoCredentialAvailable(failures))
    }
}

/// A source's own failure already names the source; strip that prefix.
fn failure_reason(err: VaultauthError) -> String {
    match err {
        VaultauthError::SourceFailed { reason, .. } => reason,
        other => other.to_string(),
    }
}

#[async_trait]
impl TokenCredential for CredentialResolver {
    async fn get_token(&self, resource: &str) -> Result<ResolvedCredential> {
        self.resolve(resource).await
    }
}
