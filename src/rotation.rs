//! Secret rotation: generate a fresh password, set it on the datastore, then
//! record it in the vault.

use crate::config::RotationConfig;
use crate::datastore::DatastoreAdmin;
use crate::error::{RotationError, VaultauthError};
use crate::resolver::TokenCredential;
use crate::validation::validate_alphabet;
use crate::vault::SecretStore;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::seq::IndexedRandom;
use rand::TryRngCore;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

/// Generates `length` characters drawn uniformly, with replacement, from
/// `alphabet` using the operating system's secure random source.
///
/// # Errors
///
/// Returns [`RotationError::InvalidConfig`] for an invalid alphabet and
/// [`RotationError::SecretGeneration`] if the random source is unusable.
///
/// # Example
///
/// ```
/// use vaultauth::rotation::generate_secret;
/// use secrecy::ExposeSecret;
///
/// let secret = generate_secret(30, "abcdef0123456789").unwrap();
/// assert_eq!(secret.expose_secret().len(), 30);
/// ```
pub fn generate_secret(length: usize, alphabet: &str) -> Result<SecretString, RotationError> {
    validate_alphabet(alphabet).map_err(|e| RotationError::InvalidConfig(e.to_string()))?;
    let chars: Vec<char> = alphabet.chars().collect();

    // Surface an unusable entropy source as an error before drawing.
    OsRng
        .try_fill_bytes(&mut [0u8; 1])
        .map_err(|e| RotationError::SecretGeneration(e.to_string()))?;

    let mut rng = OsRng.unwrap_err();
    let secret: String = (0..length)
        .map(|_| chars.choose(&mut rng).copied())
        .collect::<Option<String>>()
        .ok_or_else(|| RotationError::SecretGeneration("empty alphabet".to_string()))?;

    Ok(SecretString::from(secret))
}

/// Summary of a successful rotation run.
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    /// Run identifier used in log events
    pub run_id: Uuid,
    /// Server whose password was replaced
    pub server_name: String,
    /// Secret that received the new value
    pub secret_name: String,
    /// New vault version id, when reported
    pub version: Option<String>,
    /// Completion time
    pub rotated_at: DateTime<Utc>,
}

/// Runs the rotation job.
///
/// Runs never overlap: a [`rotate`](SecretRotator::rotate) call made while
/// another is in progress fails with [`RotationError::AlreadyRunning`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use vaultauth::config::{DatastoreTarget, RotationConfig, VaultConfig};
/// use vaultauth::{
///     CredentialResolver, KeyVaultClient, ResolverConfig, SecretRotator, SqlServerAdmin,
/// };
///
/// #[tokio::main]
/// async fn main() -> vaultauth::Result<()> {
///     let config = RotationConfig::new(
///         DatastoreTarget::new("6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f30", "rg-data", "sql-prod"),
///         VaultConfig::new("contoso-kv"),
///         "sql-admin-password",
///     );
///     let rotator = SecretRotator::new(
///         config.clone(),
///         Arc::new(CredentialResolver::new(ResolverConfig::from_env()?)?),
///         Arc::new(SqlServerAdmin::new()?),
///         Arc::new(KeyVaultClient::new(&config.vault)?),
///     )?;
///
///     let outcome = rotator.rotate().await?;
///     println!("new version: {:?}", outcome.version);
///     Ok(())
/// }
/// ```
pub struct SecretRotator {
    config: RotationConfig,
    credential: Arc<dyn TokenCredential>,
    datastore: Arc<dyn DatastoreAdmin>,
    vault: Arc<dyn SecretStore>,
    running: Mutex<()>,
}

impl SecretRotator {
    /// Creates a rotator after validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::InvalidConfig`] if validation fails.
    pub fn new(
        config: RotationConfig,
        credential: Arc<dyn TokenCredential>,
        datastore: Arc<dyn DatastoreAdmin>,
        vault: Arc<dyn SecretStore>,
    ) -> Result<Self, RotationError> {
        config
            .validate()
            .map_err(|e| RotationError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            config,
            credential,
            datastore,
            vault,
            running: Mutex::new(()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Performs one rotation run.
    ///
    /// 1. Obtain tokens for the datastore admin API and the vault.
    /// 2. Generate a new secret.
    /// 3. Set it as the datastore's administrator password.
    /// 4. Write it to the vault as a new version.
    ///
    /// A failure at steps 1-3 aborts before the vault is touched. A failure
    /// at step 4 leaves the two out of sync and is reported as
    /// [`RotationError::VaultOutOfSync`]. Nothing is retried.
    pub async fn rotate(&self) -> Result<RotationOutcome, RotationError> {
        let _guard = self.running.try_lock().map_err(|_| RotationError::AlreadyRunning)?;

        let run_id = Uuid::new_v4();
        let server = self.config.target.server_name.clone();
        let secret_name = self.config.secret_name.clone();
        let span =
            tracing::info_span!("rotation", %run_id, server = %server, secret = %secret_name);

        async {
            tracing::info!("rotation started");

            let admin_token = self
                .credential
                .get_token(self.datastore.resource())
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        "rotation aborted: no token for datastore admin API"
                    );
                    RotationError::Authentication(Box::new(e))
                })?;
            let vault_token = self
                .credential
                .get_token(self.vault.resource())
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "rotation aborted: no token for vault");
                    RotationError::Authentication(Box::new(e))
                })?;
            tracing::debug!(
                principal = %admin_token.principal,
                source = %admin_token.source,
                "authenticated"
            );

            let secret = generate_secret(self.config.length, &self.config.alphabet)?;

            match self
                .datastore
                .set_admin_password(&self.config.target, &secret, &admin_token.token)
                .await
            {
                Ok(()) => {}
                Err(e @ VaultauthError::OutcomeUnknown { .. }) => {
                    tracing::error!(
                        error = %e,
                        out_of_sync = "possible",
                        "datastore outcome unknown, vault not written; \
                         datastore may hold a password the vault lacks"
                    );
                    return Err(RotationError::DatastoreOutcomeUnknown {
                        server: server.clone(),
                        secret: secret_name.clone(),
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "rotation aborted: datastore update failed, vault untouched"
                    );
                    return Err(RotationError::DatastoreUpdate {
                        server: server.clone(),
                        source: Box::new(e),
                    });
                }
            }

            let bundle = match self
                .vault
                .set_secret(&secret_name, &secret, &vault_token.token)
                .await
            {
                Ok(bundle) => bundle,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        out_of_sync = true,
                        "datastore password changed but vault write failed; \
                         datastore and vault are out of sync"
                    );
                    return Err(RotationError::VaultOutOfSync {
                        server: server.clone(),
                        secret: secret_name.clone(),
                        source: Box::new(e),
                    });
                }
            };

            tracing::info!(version = ?bundle.version, "rotation completed");
            Ok(RotationOutcome {
                run_id,
                server_name: server.clone(),
                secret_name: secret_name.clone(),
                version: bundle.version,
                rotated_at: Utc::now(),
            })
        }
        .instrument(span)
        .await
    }
}
