//! The sync loop: one directory fetch and one platform submission per cycle.
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::directory::{DirectoryConnector, DirectoryError, DirectoryReader};
use crate::model::CycleReport;
use crate::platform::{PlatformError, SyncReporter};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

pub struct SyncAgent {
    reader: DirectoryReader,
    connector: Arc<dyn DirectoryConnector>,
    reporter: Arc<dyn SyncReporter>,
    interval: Duration,
}

impl SyncAgent {
    pub fn new(
        reader: DirectoryReader,
        connector: Arc<dyn DirectoryConnector>,
        reporter: Arc<dyn SyncReporter>,
        interval: Duration,
    ) -> Self {
        Self {
            reader,
            connector,
            reporter,
            interval,
        }
    }

    /// Search parameters and cycle interval both come from `cfg`.
    pub fn from_config(
        cfg: &Config,
        connector: Arc<dyn DirectoryConnector>,
        reporter: Arc<dyn SyncReporter>,
    ) -> Self {
        Self::new(
            DirectoryReader::from_config(cfg),
            connector,
            reporter,
            cfg.schedule.interval(),
        )
    }

    pub fn reader(&self) -> &DirectoryReader {
        &self.reader
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Connect, fetch, disconnect, submit. The session is closed even when the
    /// fetch fails; nothing is submitted unless the fetch succeeded.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("sync_cycle", %cycle_id);
        self.cycle(cycle_id).instrument(span).await
    }

    async fn cycle(&self, cycle_id: Uuid) -> Result<CycleReport, CycleError> {
        let started_at = Utc::now();
        info!(started_at = %started_at.format("%Y-%m-%d %H:%M:%S"), "starting directory sync");

        let mut session = self.connector.connect().await?;
        let fetched = self.reader.fetch(session.as_mut()).await;
        session.close().await;
        let users = fetched?;

        if users.is_empty() {
            warn!("no users found in directory");
        }

        let outcome = self.reporter.submit(&users).await?;
        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            fetched: users.len(),
            outcome,
        };
        info!(
            fetched = report.fetched,
            created = report.outcome.created,
            updated = report.outcome.updated,
            errors = report.outcome.errors.len(),
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "sync cycle completed"
        );
        Ok(report)
    }

    /// Run cycles back to back, sleeping `interval` after each one, until
    /// `cancel` fires. Cancellation is only observed between cycles.
    #[instrument(skip_all, fields(interval_secs = self.interval.as_secs()))]
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Err(err) = self.run_cycle().await {
                error!(%err, "sync cycle failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("sync agent stopped");
    }
}
