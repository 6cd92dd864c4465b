//! Error types for credential resolution, secret reads and rotation.

use crate::source::SourceKind;
use std::fmt;
use thiserror::Error;

/// Result type alias using [`VaultauthError`].
pub type Result<T> = std::result::Result<T, VaultauthError>;

/// Why a single credential source did not produce a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    /// Source that failed
    pub kind: SourceKind,
    /// Human-readable reason ("tool not installed", "endpoint unreachable", ...)
    pub reason: String,
    /// Whether the underlying mechanism was invoked (false when the
    /// availability predicate did not hold)
    pub attempted: bool,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempted {
            write!(f, "{}: {}", self.kind, self.reason)
        } else {
            write!(f, "{}: skipped ({})", self.kind, self.reason)
        }
    }
}

fn join_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while resolving credentials or talking to the vault.
///
/// All errors implement `std::error::Error` and can be chained with `source()`.
#[derive(Debug, Error)]
pub enum VaultauthError {
    /// Every credential source was tried and none produced a token.
    #[error("no credential available; tried {}", join_failures(.0))]
    NoCredentialAvailable(Vec<SourceFailure>),

    /// A single credential source failed its attempt.
    #[error("{kind} failed: {reason}")]
    SourceFailed {
        /// Source that failed
        kind: SourceKind,
        /// Underlying reason
        reason: String,
    },

    /// A credential was obtained but the target refused it.
    #[error("authorization denied for {target}: {message}")]
    AuthorizationDenied {
        /// Resource or secret the request targeted
        target: String,
        /// Message returned by the service
        message: String,
    },

    /// Reading a secret failed after (or while) obtaining a credential.
    #[error("failed to retrieve secret {secret}{}: {source}", principal_suffix(.principal))]
    SecretRetrievalFailed {
        /// Secret name
        secret: String,
        /// Source and principal attempted, when resolution got that far
        principal: Option<String>,
        /// Underlying error
        #[source]
        source: Box<VaultauthError>,
    },

    /// Secret or resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A service answered with an unexpected status.
    #[error("{service} returned HTTP {status}: {message}")]
    UnexpectedResponse {
        /// Service name ("vault", "management", "identity endpoint")
        service: String,
        /// HTTP status code
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// The datastore accepted a change whose outcome could not be confirmed.
    ///
    /// The change may or may not have been applied.
    #[error("{target} accepted the update but its outcome is unknown: {message}")]
    OutcomeUnknown {
        /// Resource the update targeted
        target: String,
        /// Why the outcome could not be confirmed
        message: String,
    },

    /// Configuration is incomplete or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Vault, secret or server name failed validation.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Required command-line tool is not installed.
    #[error("tool not installed: {0}")]
    ToolNotInstalled(String),

    /// Command execution failed.
    #[error("command execution failed: {0}")]
    CommandFailed(String),

    /// Rotation run failed.
    #[error(transparent)]
    Rotation(#[from] RotationError),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error (catch-all).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn principal_suffix(principal: &Option<String>) -> String {
    principal
        .as_ref()
        .map(|p| format!(" (principal used: {p})"))
        .unwrap_or_default()
}

impl VaultauthError {
    /// Creates a single-source failure.
    pub fn source_failed(kind: SourceKind, reason: impl Into<String>) -> Self {
        Self::SourceFailed {
            kind,
            reason: reason.into(),
        }
    }

    /// Wraps an error raised while reading `secret`.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultauth::VaultauthError;
    ///
    /// let err = VaultauthError::retrieval(
    ///     "db-password",
    ///     Some("User: alice@contoso.com via cli-session".to_string()),
    ///     VaultauthError::NotFound("db-password".to_string()),
    /// );
    ///
    /// assert_eq!(
    ///     err.to_string(),
    ///     "failed to retrieve secret db-password \
    ///      (principal used: User: alice@contoso.com via cli-session): not found: db-password"
    /// );
    /// ```
    pub fn retrieval(
        secret: impl Into<String>,
        principal: Option<String>,
        err: VaultauthError,
    ) -> Self {
        Self::SecretRetrievalFailed {
            secret: secret.into(),
            principal,
            source: Box::new(err),
        }
    }

    /// Per-source diagnostics when resolution exhausted every source.
    pub fn source_failures(&self) -> Option<&[SourceFailure]> {
        match self {
            Self::NoCredentialAvailable(failures) => Some(failures),
            Self::SecretRetrievalFailed { source, .. } => source.source_failures(),
            _ => None,
        }
    }

    /// Returns true if the service refused an otherwise valid credential.
    pub fn is_authorization_denied(&self) -> bool {
        match self {
            Self::AuthorizationDenied { .. } => true,
            Self::SecretRetrievalFailed { source, .. } => source.is_authorization_denied(),
            _ => false,
        }
    }
}

/// Errors from a single rotation run.
///
/// Every variant is fatal for the run; nothing is retried internally.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The automation identity could not obtain a token.
    #[error("rotation aborted: authentication failed: {0}")]
    Authentication(#[source] Box<VaultauthError>),

    /// The secure random source failed.
    #[error("rotation aborted: secret generation failed: {0}")]
    SecretGeneration(String),

    /// The datastore refused the new password; the vault was not touched.
    #[error("rotation aborted: failed to set administrator password on {server}: {source}")]
    DatastoreUpdate {
        /// Server name
        server: String,
        /// Underlying error
        #[source]
        source: Box<VaultauthError>,
    },

    /// The datastore accepted the new password but did not confirm it; the
    /// vault was not written, so the two may be out of sync.
    #[error(
        "datastore {server} may have applied the new password but vault secret {secret} \
         was not written; they may be out of sync: {source}"
    )]
    DatastoreOutcomeUnknown {
        /// Server name
        server: String,
        /// Secret name
        secret: String,
        /// Underlying error
        #[source]
        source: Box<VaultauthError>,
    },

    /// The datastore now has the new password but the vault does not.
    #[error(
        "datastore {server} updated but vault secret {secret} was not; \
         they are out of sync: {source}"
    )]
    VaultOutOfSync {
        /// Server name
        server: String,
        /// Secret name
        secret: String,
        /// Underlying error
        #[source]
        source: Box<VaultauthError>,
    },

    /// Another run is still in progress.
    #[error("a rotation run is already in progress")]
    AlreadyRunning,

    /// Rotation configuration failed validation.
    #[error("invalid rotation configuration: {0}")]
    InvalidConfig(String),
}

impl RotationError {
    /// Returns true when the run may have left the datastore and vault out
    /// of sync.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            Self::VaultOutOfSync { .. } | Self::DatastoreOutcomeUnknown { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_no_credential_lists_every_source() {
        let err = VaultauthError::NoCredentialAvailable(vec![
            SourceFailure {
                kind: SourceKind::ManagedIdentity,
                reason: "endpoint unreachable".to_string(),
                attempted: false,
            },
            SourceFailure {
                kind: SourceKind::CliSession,
                reason: "no active login".to_string(),
                attempted: true,
            },
        ]);

        let msg = err.to_string();
        assert!(msg.contains("managed-identity: skipped (endpoint unreachable)"));
        assert!(msg.contains("cli-session: no active login"));
        assert_eq!(err.source_failures().map(|f| f.len()), Some(2));
    }

    #[test]
    fn test_retrieval_error_chain() {
        let inner = VaultauthError::AuthorizationDenied {
            target: "db-password".to_string(),
            message: "Forbidden".to_string(),
        };
        let err = VaultauthError::retrieval("db-password", None, inner);

        assert!(err.source().is_some());
        assert!(err.is_authorization_denied());
        assert!(!err.to_string().contains("principal used"));
    }

    #[test]
    fn test_partial_rotation_is_distinguishable() {
        let partial = RotationError::VaultOutOfSync {
            server: "sql1".to_string(),
            secret: "sql-admin".to_string(),
            source: Box::new(VaultauthError::NotFound("vault".to_string())),
        };
        let full = RotationError::DatastoreUpdate {
            server: "sql1".to_string(),
            source: Box::new(VaultauthError::NotFound("server".to_string())),
        };

        assert!(partial.is_partial());
        assert!(!full.is_partial());
        assert!(partial.to_string().contains("out of sync"));

        let unknown = RotationError::DatastoreOutcomeUnknown {
            server: "sql1".to_string(),
            secret: "sql-admin".to_string(),
            source: Box::new(VaultauthError::OutcomeUnknown {
                target: "sql1".to_string(),
                message: "status polling timed out".to_string(),
            }),
        };
        assert!(unknown.is_partial());
        assert!(unknown.to_string().contains("may be out of sync"));
    }
}
