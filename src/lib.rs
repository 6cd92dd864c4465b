//! Vaultauth - Environment-aware credential resolution for vault access and
//! scheduled secret rotation.
//!
//! The same application code authenticates in every environment it runs in:
//! a hosted service with a managed identity, a developer machine signed in to
//! an IDE or the command-line tool, or a domain-joined workstation. Sources
//! are tried in a fixed order and the first one that produces a token wins.
//!
//! # Features
//!
//! - **Credential chain**: managed identity, developer tool session, CLI
//!   session and integrated auth, tried in priority order
//! - **Diagnosable failures**: every skipped or failed source is reported
//!   with its reason
//! - **Secret access**: read vault secrets and learn which principal was used
//! - **Rotation**: replace a SQL server's admin password and record it in the
//!   vault, on demand or on a schedule
//! - **Async/Await**: Built on tokio for non-blocking I/O
//!
//! # Quick Start
//!
//! ```no_run
//! use vaultauth::{read_secret, CredentialResolver, KeyVaultClient, ResolverConfig, VaultConfig};
//! use secrecy::ExposeSecret;
//!
//! #[tokio::main]
//! async fn main() -> vaultauth::Result<()> {
//!     let resolver = CredentialResolver::new(ResolverConfig::from_env()?)?;
//!     let vault = KeyVaultClient::new(&VaultConfig::new("contoso-kv"))?;
//!
//!     let lookup = read_secret(&resolver, &vault, "db-password").await?;
//!     println!("read as {}", lookup.describe());
//!     let _password = lookup.secret.value.expose_secret();
//!
//!     Ok(())
//! }
//! ```
//!
//! # Credential Sources
//!
//! | Order | Source | Available when | Principal |
//! |-------|--------|----------------|-----------|
//! | 1 | Managed identity | identity endpoint configured or IMDS reachable | App |
//! | 2 | Developer tool session | token provider manifest present | User |
//! | 3 | CLI session | `az` installed | User |
//! | 4 | Integrated auth | domain user known, domain federated, SPNEGO provider set | User |
//!
//! Setting `AzureServicesAuthConnectionString` pins resolution to a single
//! source, see [`ConnectionString`](config::ConnectionString).
//!
//! # Feature Flags
//!
//! - `mock` (default): in-memory test doubles in [`mock`]

pub mod config;
pub mod datastore;
pub mod error;
pub mod http;
pub mod process;
pub mod resolver;
pub mod rotation;
pub mod schedule;
pub mod source;
pub mod sources;
pub mod token;
pub mod validation;
pub mod vault;

#[cfg(feature = "mock")]
pub mod mock;

pub use config::{DatastoreTarget, ResolverConfig, RotationConfig, VaultConfig};
pub use datastore::{DatastoreAdmin, SqlServerAdmin};
pub use error::{Result, RotationError, SourceFailure, VaultauthError};
pub use resolver::{CredentialResolver, ResolvedCredential, TokenCredential};
pub use rotation::{generate_secret, RotationOutcome, SecretRotator};
pub use schedule::{RotationSchedule, ScheduleReport};
pub use source::{Availability, CredentialSource, NegotiateProvider, SourceKind};
pub use token::{AccessToken, Principal, PrincipalKind};
pub use vault::{read_secret, KeyVaultClient, SecretBundle, SecretLookup, SecretStore};
