use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use findthisplace_common::{EnrichConfig, FtpError, PostScope, RunRecord, RunStatus};

use crate::pipeline::Pipeline;
use crate::stats::EnrichStats;
use crate::store::RunLedger;

/// Ledger status for a finished run. Cancelled runs are never recorded.
pub fn ledger_status(result: &Result<EnrichStats, FtpError>) -> Option<RunStatus> {
    match result {
        Ok(_) => Some(RunStatus::Success),
        Err(FtpError::Cancelled) => None,
        Err(_) => Some(RunStatus::Fail),
    }
}

/// Shortest accepted tick. `tokio::time::interval` panics on zero.
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Background driver: every `check_interval`, run the full pipeline if the
/// last recorded run is older than `run_threshold`.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    ledger: Arc<dyn RunLedger>,
    check_interval: Duration,
    run_threshold: Duration,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        ledger: Arc<dyn RunLedger>,
        check_interval: Duration,
        run_threshold: Duration,
    ) -> Self {
        Self {
            pipeline,
            ledger,
            check_interval: check_interval.max(MIN_CHECK_INTERVAL),
            run_threshold,
        }
    }

    pub fn from_config(
        pipeline: Arc<Pipeline>,
        ledger: Arc<dyn RunLedger>,
        config: &EnrichConfig,
    ) -> Self {
        Self::new(pipeline, ledger, config.check_interval, config.run_threshold)
    }

    /// Due when nothing is recorded, the ledger can't be read, or the last
    /// run finished at least `run_threshold` before `now`.
    pub async fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.ledger.last_run().await {
            Ok(None) => true,
            Ok(Some(last)) => (now - last.finished_at)
                .to_std()
                .map(|since| since >= self.run_threshold)
                .unwrap_or(false),
            Err(e) => {
                warn!(error = %e, "Could not read last run, running anyway");
                true
            }
        }
    }

    /// Run over all posts if due, then record the outcome.
    /// Returns `None` when nothing ran or the run was cancelled.
    pub async fn run_if_needed_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<RunStatus> {
        if !self.is_due(now).await {
            return None;
        }

        let run_id = Uuid::new_v4().to_string();
        let result = self.pipeline.run_with_id(&run_id, &PostScope::All, cancel).await;
        match &result {
            Ok(stats) => info!("Enrichment run complete. {stats}"),
            Err(FtpError::Cancelled) => {}
            Err(e) => error!(run_id = run_id.as_str(), error = %e, "Scheduled enrichment run failed"),
        }
        let status = ledger_status(&result)?;

        let record = RunRecord {
            run_id,
            finished_at: Utc::now(),
            status,
        };
        if let Err(e) = self.ledger.record_run(&record).await {
            error!(run_id = record.run_id.as_str(), error = %e, "Failed to record run status");
        }
        Some(status)
    }

    pub async fn run_if_needed(&self, cancel: &CancellationToken) -> Option<RunStatus> {
        self.run_if_needed_at(Utc::now(), cancel).await
    }

    /// Check on every tick until cancelled. The first tick fires immediately.
    pub async fn run_forever(&self, cancel: CancellationToken) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            run_threshold_secs = self.run_threshold.as_secs(),
            "Starting enrichment scheduler"
        );

        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.run_if_needed(&cancel).await;
        }

        info!("Enrichment scheduler stopped");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_forever(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_runs_have_no_ledger_status() {
        assert_eq!(ledger_status(&Err(FtpError::Cancelled)), None);
        assert_eq!(
            ledger_status(&Err(FtpError::Database("reset".into()))),
            Some(RunStatus::Fail)
        );
        assert_eq!(
            ledger_status(&Ok(EnrichStats::default())),
            Some(RunStatus::Success)
        );
    }
}
