//! Periodic execution of the rotation job.

use crate::error::RotationError;
use crate::rotation::{RotationOutcome, SecretRotator};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Counts of runs performed by a schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Runs that completed
    pub succeeded: usize,
    /// Runs that failed before touching the vault
    pub failed: usize,
    /// Runs that may have left datastore and vault out of sync
    pub partial: usize,
}

/// Runs a [`SecretRotator`] on a fixed interval.
///
/// The first run happens immediately. A tick that comes due while a run is
/// still in progress is skipped rather than queued.
pub struct RotationSchedule {
    rotator: Arc<SecretRotator>,
    interval: Duration,
}

impl RotationSchedule {
    /// Creates a schedule using the rotator's configured interval.
    pub fn new(rotator: Arc<SecretRotator>) -> Self {
        let interval = rotator.config().interval;
        Self { rotator, interval }
    }

    /// Overrides the interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs until `shutdown` resolves, returning what happened.
    ///
    /// A failing run is logged and the schedule continues. Shutdown is only
    /// observed between runs, so an in-flight rotation always completes.
    pub async fn run_until<F>(&self, shutdown: F) -> ScheduleReport
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut report = ScheduleReport::default();
        tracing::info!(interval = ?self.interval, "rotation schedule started");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let result = self.rotator.rotate().await;
                    record(&mut report, &result);
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            partial = report.partial,
            "rotation schedule stopped"
        );
        report
    }
}

fn record(report: &mut ScheduleReport, result: &Result<RotationOutcome, RotationError>) {
    match result {
        Ok(_) => report.succeeded += 1,
        Err(e) if e.is_partial() => report.partial += 1,
        Err(e) => {
            tracing::warn!(error = %e, "scheduled rotation failed");
            report.failed += 1;
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::config::{DatastoreTarget, RotationConfig, VaultConfig};
    use crate::mock::{MockDatastore, MockVault, StaticCredential};
    use crate::source::SourceKind;
    use crate::token::PrincipalKind;
    use crate::VaultauthError;

    fn rotator(vault: Arc<MockVault>, datastore: Arc<MockDatastore>) -> Arc<SecretRotator> {
        let config = RotationConfig::new(
            DatastoreTarget::new("6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f30", "rg", "sql1"),
            VaultConfig::new("kv-one"),
            "sql-admin",
        )
        .with_interval(Duration::from_secs(3600));
        Arc::new(
            SecretRotator::new(
                config,
                Arc::new(StaticCredential::new(SourceKind::ManagedIdentity, PrincipalKind::App)),
                datastore,
                vault,
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_on_interval() {
        let vault = Arc::new(MockVault::new());
        let schedule =
            RotationSchedule::new(rotator(vault.clone(), Arc::new(MockDatastore::new())));

        // Ticks at 0h, 1h and 2h fall before shutdown at 2.5h.
        let report = schedule
            .run_until(tokio::time::sleep(Duration::from_secs(9000)))
            .await;

        assert_eq!(report.succeeded, 3);
        assert_eq!(vault.versions("sql-admin").await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_does_not_stop_schedule() {
        let vault = Arc::new(MockVault::new());
        let datastore = Arc::new(MockDatastore::new());
        datastore.fail_next_set(VaultauthError::NotFound("sql1".to_string()));
        let schedule = RotationSchedule::new(rotator(vault.clone(), datastore));

        let report = schedule
            .run_until(tokio::time::sleep(Duration::from_secs(5400)))
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(vault.versions("sql-admin").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_counted() {
        let vault = Arc::new(MockVault::new());
        vault.fail_next_set(VaultauthError::NotFound("kv-one".to_string()));
        let schedule = RotationSchedule::new(rotator(vault, Arc::new(MockDatastore::new())))
            .with_interval(Duration::from_secs(60));

        let report = schedule
            .run_until(tokio::time::sleep(Duration::from_secs(30)))
            .await;

        assert_eq!(report, ScheduleReport { succeeded: 0, failed: 0, partial: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_shutdown() {
        let schedule = RotationSchedule::new(rotator(
            Arc::new(MockVault::new()),
            Arc::new(MockDatastore::new()),
        ));

        let report = schedule.run_until(std::future::ready(())).await;
        assert_eq!(report, ScheduleReport::default());
    }
}
