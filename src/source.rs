//! Credential source trait definition.
//!
//! This module defines the [`CredentialSource`] trait that every token
//! mechanism implements. The resolver holds an ordered list of sources and
//! asks each one, in turn, whether it is available and then for a token.

use crate::token::{AccessToken, Principal};
use crate::Result;
use async_trait::async_trait;

/// Kind of credential source.
///
/// Variants are listed in the resolver's fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Platform identity endpoint (App Service, VM instance metadata)
    ManagedIdentity,
    /// Signed-in account of a locally installed developer tool
    DeveloperToolSession,
    /// Active login session of the `az` command-line tool
    CliSession,
    /// Integrated authentication of a domain-joined machine
    IntegratedAuth,
}

impl SourceKind {
    /// All kinds in resolution priority order.
    pub const ORDERED: [SourceKind; 4] = [
        SourceKind::ManagedIdentity,
        SourceKind::DeveloperToolSession,
        SourceKind::CliSession,
        SourceKind::IntegratedAuth,
    ];

    /// Zero-based position in the attempt sequence.
    pub fn priority(self) -> usize {
        match self {
            Self::ManagedIdentity => 0,
            Self::DeveloperToolSession => 1,
            Self::CliSession => 2,
            Self::IntegratedAuth => 3,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ManagedIdentity => write!(f, "managed-identity"),
            Self::DeveloperToolSession => write!(f, "developer-tool-session"),
            Self::CliSession => write!(f, "cli-session"),
            Self::IntegratedAuth => write!(f, "integrated-auth"),
        }
    }
}

/// Outcome of a source's availability predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Preconditions hold; the source may be attempted.
    Available,
    /// Preconditions do not hold, with the reason.
    Unavailable(String),
}

impl Availability {
    /// Convenience constructor for an unavailable source.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Returns true if the source may be attempted.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Token obtained by a single source, before the resolver tags it.
#[derive(Debug)]
pub struct SourceToken {
    /// The bearer token
    pub token: AccessToken,
    /// Identity the token was issued to
    pub principal: Principal,
}

/// A strategy for obtaining a bearer token.
///
/// All implementations must be `Send + Sync` so a resolver can be shared
/// across async tasks.
///
/// # Implementations
///
/// - [`ManagedIdentitySource`](crate::sources::ManagedIdentitySource)
/// - [`DeveloperToolSource`](crate::sources::DeveloperToolSource)
/// - [`AzureCliSource`](crate::sources::AzureCliSource)
/// - [`IntegratedAuthSource`](crate::sources::IntegratedAuthSource)
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Returns the source kind.
    fn kind(&self) -> SourceKind;

    /// Checks whether this source's preconditions hold.
    ///
    /// Must not invoke the underlying token mechanism. It may inspect the
    /// environment or the filesystem, probe a local endpoint, or make a
    /// bounded discovery request.
    async fn availability(&self) -> Availability;

    /// Requests a token for `resource` from the underlying mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`VaultauthError::SourceFailed`](crate::VaultauthError::SourceFailed)
    /// or a transport error when the mechanism does not produce a token.
    async fn get_token(&self, resource: &str) -> Result<SourceToken>;
}

/// Produces SPNEGO (`Negotiate`) tokens for the signed-in domain user.
///
/// Integrated auth authenticates to the federation server at the transport
/// layer; the token is sent as `Authorization: Negotiate <base64>`. Plug in a
/// Kerberos/GSSAPI or SSPI binding here.
#[async_trait]
pub trait NegotiateProvider: Send + Sync + std::fmt::Debug {
    /// Returns the initial context token for `service_principal`
    /// (for example `HTTP/sts.contoso.com`).
    ///
    /// # Errors
    ///
    /// Returns an error when no ticket can be obtained for the principal.
    async fn negotiate_token(&self, service_principal: &str) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(SourceKind::ManagedIdentity.to_string(), "managed-identity");
        assert_eq!(
            SourceKind::DeveloperToolSession.to_string(),
            "developer-tool-session"
        );
        assert_eq!(SourceKind::CliSession.to_string(), "cli-session");
        assert_eq!(SourceKind::IntegratedAuth.to_string(), "integrated-auth");
    }

    #[test]
    fn test_priority_matches_order() {
        for (i, kind) in SourceKind::ORDERED.iter().enumerate() {
            assert_eq!(kind.priority(), i);
        }
    }

    #[test]
    fn test_availability() {
        assert!(Availability::Available.is_available());
        assert!(!Availability::unavailable("not installed").is_available());
    }
}
