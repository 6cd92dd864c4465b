//! Configuration types for the resolver, the vault client and the rotation job.

use crate::source::{NegotiateProvider, SourceKind};
use crate::validation::{
    validate_alphabet, validate_resource_group, validate_secret_name, validate_server_name,
    validate_subscription_id, validate_vault_name,
};
use crate::{Result, VaultauthError};
use std::path::PathBuf;
use std::sync::Arc;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Resource identifier for the vault service.
pub const VAULT_RESOURCE: &str = "https://vault.azure.net";

/// Resource identifier for the management API.
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// Default vault DNS suffix.
pub const DEFAULT_VAULT_DOMAIN: &str = "vault.azure.net";

/// Default management API endpoint.
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";

/// Default identity provider authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Instance metadata service token endpoint.
pub const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Default secret length used by the rotation job.
pub const DEFAULT_SECRET_LENGTH: usize = 30;

/// Printable ASCII (`!`..=`~`) minus look-alike characters and characters
/// that break quoting in connection strings and shells.
pub const DEFAULT_ALPHABET: &str =
    "!#$%&()*+,-./23456789:<=>?@ABCDEFGHJKLMNPQRSTUVWXYZ[]^_abcdefghijkmnpqrstuvwxyz{}~";

/// Environment variable holding a connection string that pins the resolver
/// to a single source.
pub const CONNECTION_STRING_ENV: &str = "AzureServicesAuthConnectionString";

/// Where the managed-identity source sends its token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagedIdentityEndpoint {
    /// App Service / Functions endpoint (`IDENTITY_ENDPOINT` + `IDENTITY_HEADER`)
    AppService {
        /// Endpoint URL
        url: String,
        /// Value for the `X-IDENTITY-HEADER` header
        header: String,
    },
    /// Legacy App Service endpoint (`MSI_ENDPOINT` + `MSI_SECRET`)
    LegacyAppService {
        /// Endpoint URL
        url: String,
        /// Value for the `Secret` header
        secret: String,
    },
    /// Instance metadata service; availability is decided by a TCP probe
    Imds {
        /// Token endpoint URL
        url: String,
    },
}

impl ManagedIdentityEndpoint {
    /// Detects the endpoint from the process environment.
    ///
    /// Falls back to the instance metadata service when no App Service
    /// variables are set.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let (Some(url), Some(header)) = (var("IDENTITY_ENDPOINT"), var("IDENTITY_HEADER")) {
            return Self::AppService { url, header };
        }
        if let (Some(url), Some(secret)) = (var("MSI_ENDPOINT"), var("MSI_SECRET")) {
            return Self::LegacyAppService { url, secret };
        }
        Self::Imds {
            url: IMDS_TOKEN_URL.to_string(),
        }
    }
}

/// Which developer tool a connection string selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeveloperTool {
    /// `az` command-line tool
    AzureCli,
    /// IDE token provider
    VisualStudio,
}

/// Parsed `RunAs=...` connection string.
///
/// ```
/// use vaultauth::config::ConnectionString;
/// use vaultauth::SourceKind;
///
/// let cs: ConnectionString = "RunAs=Developer; DeveloperTool=AzureCli".parse().unwrap();
/// assert_eq!(cs.source_kind(), SourceKind::CliSession);
///
/// let cs: ConnectionString = "RunAs=App;AppId=1234".parse().unwrap();
/// assert_eq!(cs.source_kind(), SourceKind::ManagedIdentity);
/// assert_eq!(cs.app_id.as_deref(), Some("1234"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Selected source
    pub run_as: RunAs,
    /// User-assigned managed identity client id
    pub app_id: Option<String>,
    /// Tenant to request tokens from
    pub tenant_id: Option<String>,
}

/// `RunAs` value of a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAs {
    /// Managed identity
    App,
    /// A developer tool session
    Developer(DeveloperTool),
    /// Integrated authentication of the current domain user
    CurrentUser,
}

impl ConnectionString {
    /// Returns the single source this connection string pins.
    pub fn source_kind(&self) -> SourceKind {
        match self.run_as {
            RunAs::App => SourceKind::ManagedIdentity,
            RunAs::Developer(DeveloperTool::VisualStudio) => SourceKind::DeveloperToolSession,
            RunAs::Developer(DeveloperTool::AzureCli) => SourceKind::CliSession,
            RunAs::CurrentUser => SourceKind::IntegratedAuth,
        }
    }
}

impl FromStr for ConnectionString {
    type Err = VaultauthError;

    fn from_str(s: &str) -> Result<Self> {
        let mut run_as = None;
        let mut tool = None;
        let mut app_id = None;
        let mut tenant_id = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                VaultauthError::InvalidConfig(format!(
                    "connection string segment '{part}' has no '='"
                ))
            })?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "runas" => run_as = Some(value.to_string()),
                "developertool" => tool = Some(value.to_string()),
                "appid" => app_id = Some(value.to_string()),
                "tenantid" => tenant_id = Some(value.to_string()),
                other => {
                    return Err(VaultauthError::InvalidConfig(format!(
                        "unsupported connection string key '{other}'"
                    )))
                }
            }
        }

        let run_as = match run_as.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("app") => RunAs::App,
            Some("currentuser") => RunAs::CurrentUser,
            Some("developer") => match tool.as_deref().map(str::to_ascii_lowercase).as_deref() {
                Some("azurecli") => RunAs::Developer(DeveloperTool::AzureCli),
                Some("visualstudio") => RunAs::Developer(DeveloperTool::VisualStudio),
                Some(other) => {
                    return Err(VaultauthError::InvalidConfig(format!(
                        "unsupported DeveloperTool '{other}'"
                    )))
                }
                None => {
                    return Err(VaultauthError::InvalidConfig(
                        "RunAs=Developer requires DeveloperTool".to_string(),
                    ))
                }
            },
            Some(other) => {
                return Err(VaultauthError::InvalidConfig(format!(
                    "unsupported RunAs '{other}'"
                )))
            }
            None => {
                return Err(VaultauthError::InvalidConfig(
                    "connection string requires RunAs".to_string(),
                ))
            }
        };

        Ok(Self {
            run_as,
            app_id,
            tenant_id,
        })
    }
}

/// Configuration for the credential resolver and its sources.
///
/// Use the builder pattern for ergonomic configuration:
///
/// ```
/// use vaultauth::config::ResolverConfig;
/// use std::time::Duration;
///
/// let config = ResolverConfig::default()
///     .with_cli_path("/opt/az/bin/az")
///     .with_source_timeout(Duration::from_secs(10));
/// assert_eq!(config.source_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Managed identity endpoint
    pub managed_identity: ManagedIdentityEndpoint,

    /// User-assigned managed identity client id
    pub managed_identity_client_id: Option<String>,

    /// Timeout for the instance metadata TCP probe (default: 1 second)
    pub imds_probe_timeout: Duration,

    /// Developer tool token provider manifest (default: under `%LOCALAPPDATA%`)
    pub token_provider_manifest: Option<PathBuf>,

    /// Override path for the `az` executable
    pub cli_path: Option<PathBuf>,

    /// Tenant for CLI and integrated sources
    pub tenant_id: Option<String>,

    /// Identity provider authority for integrated auth
    pub authority: String,

    /// Public client id used by integrated auth
    pub client_id: String,

    /// Domain user principal name; detected from the environment when unset
    pub domain_user: Option<String>,

    /// Bound on user realm discovery during the availability check (default: 5 seconds)
    pub realm_discovery_timeout: Duration,

    /// SPNEGO token provider for the federation server; integrated auth is
    /// unavailable without one
    pub negotiate: Option<Arc<dyn NegotiateProvider>>,

    /// Upper bound for each source attempt (default: 30 seconds)
    pub source_timeout: Duration,

    /// Restrict the chain to a single source
    pub only: Option<SourceKind>,
}

/// Public client id of the `az` command-line tool.
const DEFAULT_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            managed_identity: ManagedIdentityEndpoint::Imds {
                url: IMDS_TOKEN_URL.to_string(),
            },
            managed_identity_client_id: None,
            imds_probe_timeout: Duration::from_secs(1),
            token_provider_manifest: None,
            cli_path: None,
            tenant_id: None,
            authority: DEFAULT_AUTHORITY.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            domain_user: None,
            realm_discovery_timeout: Duration::from_secs(5),
            negotiate: None,
            source_timeout: Duration::from_secs(30),
            only: None,
        }
    }
}

impl ResolverConfig {
    /// Builds a configuration from the process environment.
    ///
    /// Reads the managed identity variables, `AZURE_CLI_PATH`,
    /// `AZURE_TENANT_ID` and [`CONNECTION_STRING_ENV`].
    ///
    /// # Errors
    ///
    /// Returns [`VaultauthError::InvalidConfig`] if the connection string is malformed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            managed_identity: ManagedIdentityEndpoint::from_env(),
            cli_path: std::env::var_os("AZURE_CLI_PATH").map(PathBuf::from),
            tenant_id: std::env::var("AZURE_TENANT_ID").ok(),
            ..Default::default()
        };

        if let Ok(cs) = std::env::var(CONNECTION_STRING_ENV) {
            if !cs.trim().is_empty() {
                config = config.with_connection_string(&cs.parse()?);
            }
        }

        Ok(config)
    }

    /// Applies a connection string, pinning the chain to one source.
    pub fn with_connection_string(mut self, cs: &ConnectionString) -> Self {
        self.only = Some(cs.source_kind());
        if cs.app_id.is_some() {
            self.managed_identity_client_id = cs.app_id.clone();
        }
        if cs.tenant_id.is_some() {
            self.tenant_id = cs.tenant_id.clone();
        }
        self
    }

    /// Sets the managed identity endpoint.
    pub fn with_managed_identity(mut self, endpoint: ManagedIdentityEndpoint) -> Self {
        self.managed_identity = endpoint;
        self
    }

    /// Sets the user-assigned managed identity client id.
    pub fn with_managed_identity_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.managed_identity_client_id = Some(client_id.into());
        self
    }

    /// Sets the developer tool manifest location.
    pub fn with_token_provider_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_provider_manifest = Some(path.into());
        self
    }

    /// Sets an explicit `az` executable path.
    pub fn with_cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cli_path = Some(path.into());
        self
    }

    /// Sets the tenant id.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant.into());
        self
    }

    /// Sets the identity provider authority.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Sets the domain user principal name used by integrated auth.
    pub fn with_domain_user(mut self, upn: impl Into<String>) -> Self {
        self.domain_user = Some(upn.into());
        self
    }

    /// Sets the bound on user realm discovery.
    pub fn with_realm_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.realm_discovery_timeout = timeout;
        self
    }

    /// Sets the SPNEGO token provider used by integrated auth.
    pub fn with_negotiate(mut self, provider: Arc<dyn NegotiateProvider>) -> Self {
        self.negotiate = Some(provider);
        self
    }

    /// Sets the per-source attempt timeout.
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Sets the instance metadata probe timeout.
    pub fn with_imds_probe_timeout(mut self, timeout: Duration) -> Self {
        self.imds_probe_timeout = timeout;
        self
    }
}

/// Vault location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Vault name
    pub vault_name: String,
    /// Vault DNS suffix (default: `vault.azure.net`)
    pub vault_domain: String,
    /// Explicit base URL; overrides name + domain
    pub vault_url: Option<String>,
}

impl VaultConfig {
    /// Creates a configuration for `vault_name` in the default domain.
    pub fn new(vault_name: impl Into<String>) -> Self {
        Self {
            vault_name: vault_name.into(),
            vault_domain: DEFAULT_VAULT_DOMAIN.to_string(),
            vault_url: None,
        }
    }

    /// Sets the vault DNS suffix.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.vault_domain = domain.into();
        self
    }

    /// Sets an explicit base URL (used for sovereign clouds and tests).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.vault_url = Some(url.into());
        self
    }

    /// Resolves the base URL, `https://{vault-name}.{vault-domain}` by default.
    ///
    /// # Errors
    ///
    /// Returns an error if the name fails validation or the URL does not parse.
    pub fn base_url(&self) -> Result<Url> {
        let raw = match &self.vault_url {
            Some(url) => url.clone(),
            None => {
                validate_vault_name(&self.vault_name)?;
                format!("https://{}.{}", self.vault_name, self.vault_domain)
            }
        };
        Url::parse(&raw)
            .map_err(|e| VaultauthError::InvalidConfig(format!("vault URL '{raw}': {e}")))
    }
}

/// The SQL server whose administrator password is rotated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreTarget {
    /// Subscription id
    pub subscription_id: String,
    /// Resource group name
    pub resource_group: String,
    /// Server name
    pub server_name: String,
}

impl DatastoreTarget {
    /// Creates a target.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            server_name: server_name.into(),
        }
    }
}

/// Configuration for the rotation job.
///
/// ```
/// use vaultauth::config::{DatastoreTarget, RotationConfig, VaultConfig};
///
/// let config = RotationConfig::new(
///     DatastoreTarget::new("6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f30", "rg-data", "sql-prod"),
///     VaultConfig::new("contoso-kv"),
///     "sql-admin-password",
/// )
/// .with_length(40);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Datastore whose administrator password is replaced
    pub target: DatastoreTarget,
    /// Vault receiving the new value
    pub vault: VaultConfig,
    /// Secret name in the vault
    pub secret_name: String,
    /// Length of generated secrets (default: 30)
    pub length: usize,
    /// Characters generated secrets are drawn from
    pub alphabet: String,
    /// Schedule interval (default: 24 hours)
    pub interval: Duration,
}

impl RotationConfig {
    /// Creates a configuration with default length, alphabet and interval.
    pub fn new(
        target: DatastoreTarget,
        vault: VaultConfig,
        secret_name: impl Into<String>,
    ) -> Self {
        Self {
            target,
            vault,
            secret_name: secret_name.into(),
            length: DEFAULT_SECRET_LENGTH,
            alphabet: DEFAULT_ALPHABET.to_string(),
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Reads the configuration from `ROTATION_*` environment variables.
    ///
    /// Required: `ROTATION_SUBSCRIPTION_ID`, `ROTATION_RESOURCE_GROUP`,
    /// `ROTATION_SERVER_NAME`, `ROTATION_VAULT_NAME`, `ROTATION_SECRET_NAME`.
    /// Optional: `ROTATION_SECRET_LENGTH`, `ROTATION_INTERVAL_SECS`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultauthError::InvalidConfig`] if a variable is missing or malformed.
    pub fn from_env() -> Result<Self> {
        fn required(name: &str) -> Result<String> {
            std::env::var(name)
                .map_err(|_| VaultauthError::InvalidConfig(format!("{name} is required")))
        }
        fn optional_number<T: FromStr>(name: &str) -> Result<Option<T>> {
            match std::env::var(name) {
                Ok(v) => v
                    .parse()
                    .map(Some)
                    .map_err(|_| VaultauthError::InvalidConfig(format!("{name} must be a number"))),
                Err(_) => Ok(None),
            }
        }

        let mut config = Self::new(
            DatastoreTarget::new(
                required("ROTATION_SUBSCRIPTION_ID")?,
                required("ROTATION_RESOURCE_GROUP")?,
                required("ROTATION_SERVER_NAME")?,
            ),
            VaultConfig::new(required("ROTATION_VAULT_NAME")?),
            required("ROTATION_SECRET_NAME")?,
        );

        if let Some(length) = optional_number("ROTATION_SECRET_LENGTH")? {
            config.length = length;
        }
        if let Some(secs) = optional_number::<u64>("ROTATION_INTERVAL_SECS")? {
            config.interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Sets the generated secret length.
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    /// Sets the alphabet generated secrets are drawn from.
    pub fn with_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.alphabet = alphabet.into();
        self
    }

    /// Sets the schedule interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Validates names, length and alphabet.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<()> {
        validate_server_name(&self.target.server_name)?;
        validate_secret_name(&self.secret_name)?;
        if self.vault.vault_url.is_none() {
            validate_vault_name(&self.vault.vault_name)?;
        }
        validate_subscription_id(&self.target.subscription_id)?;
        validate_resource_group(&self.target.resource_group)?;
        if !(1..=128).contains(&self.length) {
            return Err(VaultauthError::InvalidConfig(format!(
                "secret length {} is outside 1..=128",
                self.length
            )));
        }
        if self.interval.is_zero() {
            return Err(VaultauthError::InvalidConfig("interval must be positive".to_string()));
        }
        validate_alphabet(&self.alphabet)
    }
}
