//! In-memory test doubles with error injection.
//!
//! Enabled by the `mock` feature (on by default). Useful for testing code
//! that depends on [`CredentialSource`], [`TokenCredential`],
//! [`SecretStore`] or [`DatastoreAdmin`] without reaching a real service.

use crate::config::{DatastoreTarget, MANAGEMENT_RESOURCE, VAULT_RESOURCE};
use crate::datastore::DatastoreAdmin;
use crate::resolver::{ResolvedCredential, TokenCredential};
use crate::source::{Availability, CredentialSource, SourceKind, SourceToken};
use crate::token::{AccessToken, Principal, PrincipalKind};
use crate::vault::{SecretBundle, SecretStore};
use crate::{Result, VaultauthError};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, RwLock, Semaphore};

fn mock_principal(kind: PrincipalKind) -> Principal {
    let name = match kind {
        PrincipalKind::App => "mock-app",
        PrincipalKind::User => "mock-user",
    };
    Principal::new(kind).or_name(name)
}

fn mock_token(resource: &str) -> AccessToken {
    AccessToken::new("mock-token", Utc::now() + Duration::hours(1), resource)
}

fn take(slot: &Mutex<Option<VaultauthError>>) -> Option<VaultauthError> {
    slot.lock().ok().and_then(|mut e| e.take())
}

fn put(slot: &Mutex<Option<VaultauthError>>, err: VaultauthError) {
    if let Ok(mut e) = slot.lock() {
        *e = Some(err);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Availability(SourceKind),
    Attempt(SourceKind),
}

/// Shared record of calls made on a set of [`MockSource`]s.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    fn push(&self, call: Call) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn filtered(&self, f: impl Fn(&Call) -> Option<SourceKind>) -> Vec<SourceKind> {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter_map(f).collect())
            .unwrap_or_default()
    }

    /// Sources whose token mechanism was invoked, in call order.
    pub fn attempts(&self) -> Vec<SourceKind> {
        self.filtered(|c| match c {
            Call::Attempt(k) => Some(*k),
            _ => None,
        })
    }

    /// Sources whose availability was checked, in call order.
    pub fn availability_checks(&self) -> Vec<SourceKind> {
        self.filtered(|c| match c {
            Call::Availability(k) => Some(*k),
            _ => None,
        })
    }
}

enum Behavior {
    Succeed,
    Unavailable(String),
    Fail(String),
    Hang,
}

/// Scripted credential source.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vaultauth::mock::{CallLog, MockSource};
/// use vaultauth::source::{CredentialSource, SourceKind};
/// use vaultauth::CredentialResolver;
///
/// #[tokio::main]
/// async fn main() -> vaultauth::Result<()> {
///     let log = CallLog::default();
///     let sources: Vec<Box<dyn CredentialSource>> = vec![
///         Box::new(MockSource::unavailable(
///             SourceKind::ManagedIdentity,
///             "no endpoint",
///             log.clone(),
///         )),
///         Box::new(MockSource::succeeding(SourceKind::CliSession, log.clone())),
///     ];
///
///     let resolver = CredentialResolver::with_sources(sources, Duration::from_secs(5));
///     let credential = resolver.resolve("https://vault.azure.net").await?;
///
///     assert_eq!(credential.source, SourceKind::CliSession);
///     assert_eq!(log.attempts(), vec![SourceKind::CliSession]);
///     Ok(())
/// }
/// ```
pub struct MockSource {
    kind: SourceKind,
    behavior: Behavior,
    log: CallLog,
}

impl MockSource {
    fn with(kind: SourceKind, behavior: Behavior, log: CallLog) -> Self {
        Self { kind, behavior, log }
    }

    /// A source that is available and issues a token.
    ///
    /// The principal is an App (`mock-app`) for managed identity and a User
    /// (`mock-user`) otherwise.
    pub fn succeeding(kind: SourceKind, log: CallLog) -> Self {
        Self::with(kind, Behavior::Succeed, log)
    }

    /// A source whose availability predicate fails with `reason`.
    pub fn unavailable(kind: SourceKind, reason: impl Into<String>, log: CallLog) -> Self {
        Self::with(kind, Behavior::Unavailable(reason.into()), log)
    }

    /// A source that is available but whose attempt fails with `reason`.
    pub fn failing(kind: SourceKind, reason: impl Into<String>, log: CallLog) -> Self {
        Self::with(kind, Behavior::Fail(reason.into()), log)
    }

    /// A source whose attempt never completes.
    pub fn hanging(kind: SourceKind, log: CallLog) -> Self {
        Self::with(kind, Behavior::Hang, log)
    }
}

#[async_trait]
impl CredentialSource for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn availability(&self) -> Availability {
        self.log.push(Call::Availability(self.kind));
        match &self.behavior {
            Behavior::Unavailable(reason) => Availability::unavailable(reason.clone()),
            _ => Availability::Available,
        }
    }

    async fn get_token(&self, resource: &str) -> Result<SourceToken> {
        self.log.push(Call::Attempt(self.kind));
        match &self.behavior {
            Behavior::Succeed | Behavior::Unavailable(_) => {
                let kind = if self.kind == SourceKind::ManagedIdentity {
                    PrincipalKind::App
                } else {
                    PrincipalKind::User
                };
                Ok(SourceToken {
                    token: mock_token(resource),
                    principal: mock_principal(kind),
                })
            }
            Behavior::Fail(reason) => Err(VaultauthError::source_failed(self.kind, reason.clone())),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// A [`TokenCredential`] that always resolves to the same source and principal.
pub struct StaticCredential {
    source: SourceKind,
    principal: Principal,
    requested: Mutex<Vec<String>>,
    next_error: Mutex<Option<VaultauthError>>,
}

impl StaticCredential {
    /// Creates a credential reporting `source` and a principal of `kind`.
    pub fn new(source: SourceKind, kind: PrincipalKind) -> Self {
        Self {
            source,
            principal: mock_principal(kind),
            requested: Mutex::new(Vec::new()),
            next_error: Mutex::new(None),
        }
    }

    /// Makes the next `get_token` call fail with `err`.
    pub fn fail_next(&self, err: VaultauthError) {
        put(&self.next_error, err);
    }

    /// Resources tokens were requested for, in call order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TokenCredential for StaticCredential {
    async fn get_token(&self, resource: &str) -> Result<ResolvedCredential> {
        if let Some(err) = take(&self.next_error) {
            return Err(err);
        }
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(resource.to_string());
        }
        Ok(ResolvedCredential {
            token: mock_token(resource),
            source: self.source,
            principal: self.principal.clone(),
        })
    }
}

/// In-memory vault keeping every version of each secret.
pub struct MockVault {
    items: RwLock<HashMap<String, Vec<String>>>,
    set_calls: AtomicUsize,
    get_error: Mutex<Option<VaultauthError>>,
    set_error: Mutex<Option<VaultauthError>>,
}

impl MockVault {
    /// Creates an empty vault.
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            set_calls: AtomicUsize::new(0),
            get_error: Mutex::new(None),
            set_error: Mutex::new(None),
        }
    }

    /// Pre-populates a secret version without counting as a write.
    pub async fn set_item(&self, name: impl Into<String>, value: impl Into<String>) {
        self.items
            .write()
            .await
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    /// Current value of a secret.
    pub async fn current(&self, name: &str) -> Option<String> {
        self.items.read().await.get(name).and_then(|v| v.last().cloned())
    }

    /// Number of versions stored for a secret.
    pub async fn versions(&self, name: &str) -> usize {
        self.items.read().await.get(name).map_or(0, Vec::len)
    }

    /// Number of `set_secret` calls, including failed ones.
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Makes the next `get_secret` call fail with `err`.
    pub fn fail_next_get(&self, err: VaultauthError) {
        put(&self.get_error, err);
    }

    /// Makes the next `set_secret` call fail with `err`.
    pub fn fail_next_set(&self, err: VaultauthError) {
        put(&self.set_error, err);
    }

    fn bundle(name: &str, value: &str, version: usize) -> SecretBundle {
        SecretBundle::new(
            name,
            SecretString::from(value.to_string()),
            Some(format!("mock://vault/secrets/{name}/v{version}")),
        )
    }
}

impl Default for MockVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for MockVault {
    fn resource(&self) -> &str {
        VAULT_RESOURCE
    }

    fn location(&self) -> String {
        "mock://vault".to_string()
    }

    async fn get_secret(&self, name: &str, _token: &AccessToken) -> Result<SecretBundle> {
        if let Some(err) = take(&self.get_error) {
            return Err(err);
        }
        let items = self.items.read().await;
        let versions = items
            .get(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| VaultauthError::NotFound(name.to_string()))?;
        let value = versions.last().map(String::as_str).unwrap_or_default();
        Ok(Self::bundle(name, value, versions.len()))
    }

    async fn set_secret(
        &self,
        name: &str,
        value: &SecretString,
        _token: &AccessToken,
    ) -> Result<SecretBundle> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = take(&self.set_error) {
            return Err(err);
        }
        let mut items = self.items.write().await;
        let versions = items.entry(name.to_string()).or_default();
        versions.push(value.expose_secret().to_string());
        Ok(Self::bundle(name, value.expose_secret(), versions.len()))
    }
}

/// Holds [`MockDatastore`] updates until released.
pub struct DatastoreGate {
    permits: Arc<Semaphore>,
}

impl DatastoreGate {
    /// Lets one held update proceed.
    pub fn release(&self) {
        self.permits.add_permits(1);
    }
}

/// In-memory datastore recording the last administrator password set.
pub struct MockDatastore {
    password: RwLock<Option<String>>,
    set_calls: AtomicUsize,
    set_error: Mutex<Option<VaultauthError>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
}

impl MockDatastore {
    /// Creates a datastore with no password recorded.
    pub fn new() -> Self {
        Self {
            password: RwLock::new(None),
            set_calls: AtomicUsize::new(0),
            set_error: Mutex::new(None),
            gate: Mutex::new(None),
            entered: Notify::new(),
        }
    }

    /// Last password set.
    pub async fn password(&self) -> Option<String> {
        self.password.read().await.clone()
    }

    /// Number of `set_admin_password` calls, including failed ones.
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Makes the next `set_admin_password` call fail with `err`.
    pub fn fail_next_set(&self, err: VaultauthError) {
        put(&self.set_error, err);
    }

    /// Blocks subsequent updates until the returned gate is released.
    pub fn hold(&self) -> DatastoreGate {
        let permits = Arc::new(Semaphore::new(0));
        if let Ok(mut gate) = self.gate.lock() {
            *gate = Some(permits.clone());
        }
        DatastoreGate { permits }
    }

    /// Waits until an update has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }
}

impl Default for MockDatastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatastoreAdmin for MockDatastore {
    fn resource(&self) -> &str {
        MANAGEMENT_RESOURCE
    }

    async fn set_admin_password(
        &self,
        _target: &DatastoreTarget,
        password: &SecretString,
        _token: &AccessToken,
    ) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        let gate = self.gate.lock().ok().and_then(|g| g.clone());
        if let Some(permits) = gate {
            let _permit = permits.acquire().await;
        }

        if let Some(err) = take(&self.set_error) {
            return Err(err);
        }
        *self.password.write().await = Some(password.expose_secret().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vault_versions() {
        let vault = MockVault::new();
        let token = mock_token(VAULT_RESOURCE);
        vault.set_item("a", "one").await;

        let bundle = vault
            .set_secret("a", &SecretString::from("two".to_string()), &token)
            .await
            .unwrap();

        assert_eq!(bundle.version.as_deref(), Some("v2"));
        assert_eq!(vault.current("a").await.as_deref(), Some("two"));
        assert_eq!(vault.versions("a").await, 2);
        assert_eq!(vault.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_vault_missing_and_injected_errors() {
        let vault = MockVault::new();
        let token = mock_token(VAULT_RESOURCE);

        let err = vault.get_secret("nope", &token).await.unwrap_err();
        assert!(matches!(err, VaultauthError::NotFound(_)));

        vault.set_item("a", "one").await;
        vault.fail_next_get(VaultauthError::NotFound("injected".to_string()));
        assert!(vault.get_secret("a", &token).await.is_err());
        // Injected errors apply once.
        assert!(vault.get_secret("a", &token).await.is_ok());
    }

    #[tokio::test]
    async fn test_static_credential() {
        let credential =
            StaticCredential::new(SourceKind::DeveloperToolSession, PrincipalKind::User);
        let resolved = credential.get_token(VAULT_RESOURCE).await.unwrap();

        assert_eq!(resolved.describe(), "User: mock-user via developer-tool-session");
        assert_eq!(resolved.token.resource(), VAULT_RESOURCE);
    }
}
