//! Datastore administration: setting a SQL server's administrator password
//! through the management API.

use crate::config::{DatastoreTarget, DEFAULT_MANAGEMENT_URL, MANAGEMENT_RESOURCE};
use crate::http::{check_status, error_message};
use crate::token::AccessToken;
use crate::validation::{validate_resource_group, validate_server_name, validate_subscription_id};
use crate::{Result, VaultauthError};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Management API version for `Microsoft.Sql/servers`.
const API_VERSION: &str = "2021-11-01";

/// Upper bound on status polls for an accepted (202) update.
const MAX_POLLS: u32 = 60;

/// A datastore whose administrative credential can be replaced.
#[async_trait]
pub trait DatastoreAdmin: Send + Sync {
    /// Resource identifier tokens for the admin API must be issued for.
    fn resource(&self) -> &str;

    /// Sets the administrator password of `target`.
    ///
    /// Returns once the datastore reports the change as complete.
    ///
    /// # Errors
    ///
    /// - [`VaultauthError::AuthorizationDenied`]: the token was refused
    /// - [`VaultauthError::NotFound`]: the server does not exist
    /// - [`VaultauthError::OutcomeUnknown`]: the update was accepted but its
    ///   completion could not be confirmed, so the new password may be live
    async fn set_admin_password(
        &self,
        target: &DatastoreTarget,
        password: &SecretString,
        token: &AccessToken,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// How an accepted update reports progress.
#[derive(Debug)]
enum Monitor {
    /// `Azure-AsyncOperation`: the body carries a `status` field.
    AsyncOperation(String),
    /// `Location`: 202 while running, 200/201/204 once done.
    Location(String),
}

impl Monitor {
    fn from_headers(headers: &reqwest::header::HeaderMap) -> Option<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        header("Azure-AsyncOperation")
            .map(Self::AsyncOperation)
            .or_else(|| header("Location").map(Self::Location))
    }

    fn url(&self) -> &str {
        match self {
            Self::AsyncOperation(url) | Self::Location(url) => url,
        }
    }
}

/// Result of a single status poll.
enum PollState {
    Running,
    Done,
}

/// SQL server administrator through the management API.
pub struct SqlServerAdmin {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl SqlServerAdmin {
    /// Creates an admin client for the public management endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: crate::http::client()?,
            base_url: DEFAULT_MANAGEMENT_URL.to_string(),
            poll_interval: Duration::from_secs(5),
        })
    }

    /// Sets the management endpoint (sovereign clouds, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the delay between status polls of an accepted update.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builds the server's resource URL from validated path segments.
    fn server_url(&self, target: &DatastoreTarget) -> Result<Url> {
        validate_subscription_id(&target.subscription_id)?;
        validate_resource_group(&target.resource_group)?;
        validate_server_name(&target.server_name)?;

        let mut url = Url::parse(&self.base_url).map_err(|e| {
            VaultauthError::InvalidConfig(format!("management URL '{}': {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                VaultauthError::InvalidConfig(format!(
                    "management URL {} cannot be a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend([
                "subscriptions",
                &target.subscription_id,
                "resourceGroups",
                &target.resource_group,
                "providers",
                "Microsoft.Sql",
                "servers",
                &target.server_name,
            ]);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    /// Polls an accepted update until it completes.
    ///
    /// Only a definite failure reported by the operation itself is returned
    /// as an ordinary error. Anything else that stops the wait is
    /// [`VaultauthError::OutcomeUnknown`], since the update may have landed.
    async fn wait_for(&self, monitor: &Monitor, target: &str, token: &AccessToken) -> Result<()> {
        let unknown = |message: String| VaultauthError::OutcomeUnknown {
            target: target.to_string(),
            message,
        };

        for _ in 0..MAX_POLLS {
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .http
                .get(monitor.url())
                .header("Authorization", token.bearer())
                .send()
                .await
                .map_err(|e| unknown(format!("status poll failed: {e}")))?;

            let state = match monitor {
                Monitor::Location(_) => Self::location_state(response).await,
                Monitor::AsyncOperation(_) => Self::operation_state(response).await,
            };
            match state {
                Ok(PollState::Running) => continue,
                Ok(PollState::Done) => return Ok(()),
                Err(PollError::Failed(message)) => {
                    return Err(VaultauthError::UnexpectedResponse {
                        service: "management".to_string(),
                        status: 200,
                        message,
                    })
                }
                Err(PollError::Unreadable(message)) => return Err(unknown(message)),
            }
        }

        Err(unknown(format!("still running after {MAX_POLLS} status polls")))
    }

    async fn location_state(
        response: reqwest::Response,
    ) -> std::result::Result<PollState, PollError> {
        match response.status() {
            StatusCode::ACCEPTED => Ok(PollState::Running),
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(PollState::Done),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(PollError::Unreadable(format!(
                    "status poll returned HTTP {}: {}",
                    status.as_u16(),
                    error_message(&body)
                )))
            }
        }
    }

    async fn operation_state(
        response: reqwest::Response,
    ) -> std::result::Result<PollState, PollError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PollError::Unreadable(format!("status poll body unreadable: {e}")))?;
        if !status.is_success() {
            return Err(PollError::Unreadable(format!(
                "status poll returned HTTP {}: {}",
                status.as_u16(),
                error_message(&body)
            )));
        }

        let operation: OperationStatus = serde_json::from_str(&body)
            .map_err(|e| PollError::Unreadable(format!("status poll body unreadable: {e}")))?;
        match operation.status.as_str() {
            "Succeeded" => Ok(PollState::Done),
            "InProgress" | "Accepted" | "Running" => Ok(PollState::Running),
            other => {
                let detail = operation
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no error detail".to_string());
                Err(PollError::Failed(format!("operation {other}: {detail}")))
            }
        }
    }
}

/// Why polling stopped without success.
enum PollError {
    /// The operation reported that it failed; the old password is still live.
    Failed(String),
    /// The poll could not be interpreted.
    Unreadable(String),
}

#[async_trait]
impl DatastoreAdmin for SqlServerAdmin {
    fn resource(&self) -> &str {
        MANAGEMENT_RESOURCE
    }

    async fn set_admin_password(
        &self,
        target: &DatastoreTarget,
        password: &SecretString,
        token: &AccessToken,
    ) -> Result<()> {
        let payload = serde_json::json!({
            "properties": { "administratorLoginPassword": password.expose_secret() }
        });

        let response = self
            .http
            .patch(self.server_url(target)?)
            .header("Authorization", token.bearer())
            .json(&payload)
            .send()
            .await?;

        let response = check_status(response, "management", &target.server_name).await?;
        if response.status() == StatusCode::ACCEPTED {
            let monitor = Monitor::from_headers(response.headers()).ok_or_else(|| {
                VaultauthError::OutcomeUnknown {
                    target: target.server_name.clone(),
                    message: "update accepted without a status URL".to_string(),
                }
            })?;

            tracing::debug!(
                server = %target.server_name,
                ?monitor,
                "password update accepted, polling"
            );
            self.wait_for(&monitor, &target.server_name, token).await?;
        }

        tracing::debug!(server = %target.server_name, "administrator password updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUBSCRIPTION: &str = "6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f30";
    const SERVER_PATH: &str = concat!(
        "/subscriptions/6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f30",
        "/resourceGroups/rg-data/providers/Microsoft.Sql/servers/sql-prod"
    );

    fn target() -> DatastoreTarget {
        DatastoreTarget::new(SUBSCRIPTION, "rg-data", "sql-prod")
    }

    fn token() -> AccessToken {
        AccessToken::new("mgmt", Utc::now() + chrono::Duration::hours(1), MANAGEMENT_RESOURCE)
    }

    fn admin(server: &MockServer) -> SqlServerAdmin {
        SqlServerAdmin::new()
            .unwrap()
            .with_base_url(server.uri())
            .with_poll_interval(Duration::from_millis(1))
    }

    fn password() -> SecretString {
        SecretString::from("N3w-Pa55!".to_string())
    }

    async fn mount_accepted(server: &MockServer, monitor_header: &str, poll_path: &str) {
        let monitor = format!("{}{poll_path}", server.uri());
        Mock::given(method("PATCH"))
            .and(path(SERVER_PATH))
            .respond_with(
                ResponseTemplate::new(202).insert_header(monitor_header, monitor.as_str()),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_patch_password() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(SERVER_PATH))
            .and(query_param("api-version", API_VERSION))
            .and(header("Authorization", "Bearer mgmt"))
            .and(body_json(json!({
                "properties": { "administratorLoginPassword": "N3w-Pa55!" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "sql-prod" })))
            .expect(1)
            .mount(&server)
            .await;

        admin(&server)
            .set_admin_password(&target(), &password(), &token())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_accepted_update_is_polled() {
        let server = MockServer::start().await;
        mount_accepted(&server, "Azure-AsyncOperation", "/operations/op-1").await;
        Mock::given(method("GET"))
            .and(path("/operations/op-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "status": "Succeeded" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        admin(&server)
            .set_admin_password(&target(), &password(), &token())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_location_poll_waits_for_completion() {
        let server = MockServer::start().await;
        mount_accepted(&server, "Location", "/operations/op-loc").await;
        Mock::given(method("GET"))
            .and(path("/operations/op-loc"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op-loc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "sql-prod" })))
            .expect(1)
            .mount(&server)
            .await;

        admin(&server)
            .set_admin_password(&target(), &password(), &token())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_location_poll_no_content_is_done() {
        let server = MockServer::start().await;
        mount_accepted(&server, "Location", "/operations/op-204").await;
        Mock::given(method("GET"))
            .and(path("/operations/op-204"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        admin(&server)
            .set_admin_password(&target(), &password(), &token())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_operation() {
        let server = MockServer::start().await;
        mount_accepted(&server, "Azure-AsyncOperation", "/operations/op-2").await;
        Mock::given(method("GET"))
            .and(path("/operations/op-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": { "code": "PasswordNotComplex" }
            })))
            .mount(&server)
            .await;

        let err = admin(&server)
            .set_admin_password(&target(), &password(), &token())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("PasswordNotComplex"));
        assert!(!matches!(err, VaultauthError::OutcomeUnknown { .. }));
    }

    #[tokio::test]
    async fn test_poll_failure_after_accept_is_outcome_unknown() {
        let server = MockServer::start().await;
        mount_accepted(&server, "Location", "/operations/op-3").await;
        Mock::given(method("GET"))
            .and(path("/operations/op-3"))
            .respond_with(ResponseTemplate::new(500).set_body_string("gateway exploded"))
            .mount(&server)
            .await;

        let err = admin(&server)
            .set_admin_password(&target(), &password(), &token())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultauthError::OutcomeUnknown { .. }));
        assert!(err.to_string().contains("outcome is unknown"));
    }

    #[tokio::test]
    async fn test_unreadable_operation_status_is_outcome_unknown() {
        let server = MockServer::start().await;
        mount_accepted(&server, "Azure-AsyncOperation", "/operations/op-4").await;
        Mock::given(method("GET"))
            .and(path("/operations/op-4"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = admin(&server)
            .set_admin_password(&target(), &password(), &token())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultauthError::OutcomeUnknown { .. }));
    }

    #[tokio::test]
    async fn test_accepted_without_status_url_is_outcome_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let err = admin(&server)
            .set_admin_password(&target(), &password(), &token())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultauthError::OutcomeUnknown { .. }));
    }

    #[tokio::test]
    async fn test_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": "AuthorizationFailed", "message": "no write permission" }
            })))
            .mount(&server)
            .await;

        let err = admin(&server)
            .set_admin_password(&target(), &password(), &token())
            .await
            .unwrap_err();
        assert!(err.is_authorization_denied());
    }

    #[tokio::test]
    async fn test_bad_target_rejected_before_request() {
        let server = MockServer::start().await;
        let bad_group = DatastoreTarget::new(SUBSCRIPTION, "rg/../other", "sql-prod");
        let bad_subscription = DatastoreTarget::new("sub?x=1", "rg-data", "sql-prod");

        for target in [bad_group, bad_subscription] {
            let err = admin(&server)
                .set_admin_password(&target, &password(), &token())
                .await
                .unwrap_err();
            assert!(matches!(err, VaultauthError::InvalidName(_)));
        }
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_server_url_segments() {
        let admin = SqlServerAdmin::new()
            .unwrap()
            .with_base_url("https://management.example/");
        let url = admin.server_url(&target()).unwrap();
        assert_eq!(url.path(), SERVER_PATH);
        assert_eq!(url.query(), Some("api-version=2021-11-01"));
    }
}
