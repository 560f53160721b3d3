//! Stuck-job watchdog.
//!
//! Periodically scans persisted jobs for ones that have sat in
//! `processing` without a progress update for longer than a threshold and
//! resets them to `queued`. Re-admission is left to the normal enqueue path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::{JobId, JobStatus};
use crate::store::JobStore;
use crate::telemetry::metrics;

#[derive(Debug, Clone)]
pub struct StuckConfig {
    /// Time between scans.
    pub interval: Duration,
    /// A processing job idle for longer than this is stuck.
    pub threshold: Duration,
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            threshold: Duration::from_secs(10 * 60),
        }
    }
}

/// One reclaimed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StuckIncident {
    pub job_id: JobId,
    pub stuck_for: Duration,
    pub last_progress: u8,
}

/// Snapshot of processing jobs, for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StuckStats {
    pub processing: usize,
    /// Processing jobs currently past the threshold.
    pub stuck: usize,
    /// Processing jobs per progress bucket (0, 10, 20, ... 100).
    pub by_progress: BTreeMap<u8, usize>,
}

pub struct StuckJobMonitor {
    store: Arc<dyn JobStore>,
    config: StuckConfig,
    shutdown: Notify,
}

impl StuckJobMonitor {
    pub fn new(store: Arc<dyn JobStore>, config: StuckConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Notify::new(),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    fn threshold(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.threshold).unwrap_or(TimeDelta::MAX)
    }

    /// Scan every `interval` until shutdown.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            threshold_secs = self.config.threshold.as_secs(),
            "stuck-job monitor started"
        );
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("stuck-job monitor shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
            if let Err(e) = self.scan().await {
                error!("stuck-job scan failed: {e}");
            }
        }
    }

    /// Reset every stuck job to `queued` with zero progress.
    pub async fn scan(&self) -> Result<Vec<StuckIncident>> {
        let now = Utc::now();
        let threshold = self.threshold();
        let processing = self.store.list_by_status(JobStatus::Processing).await?;

        let mut incidents = Vec::new();
        for record in processing {
            let idle = now.signed_duration_since(record.updated_at);
            if idle <= threshold {
                continue;
            }

            if let Err(e) = self
                .store
                .set_job_status(record.id, JobStatus::Queued, 0)
                .await
            {
                // The owning execution may have finished between list and reset.
                debug!(job_id = %record.id, "skipping stuck job reset: {e}");
                continue;
            }

            let incident = StuckIncident {
                job_id: record.id,
                stuck_for: idle.to_std().unwrap_or_default(),
                last_progress: record.progress,
            };
            warn!(
                job_id = %incident.job_id,
                stuck_secs = incident.stuck_for.as_secs(),
                last_progress = incident.last_progress,
                "reclaimed stuck job"
            );
            metrics::stuck_jobs_reclaimed().add(1, &[]);
            incidents.push(incident);
        }
        Ok(incidents)
    }

    pub async fn stats(&self) -> Result<StuckStats> {
        let now = Utc::now();
        let threshold = self.threshold();
        let processing = self.store.list_by_status(JobStatus::Processing).await?;

        let mut stats = StuckStats {
            processing: processing.len(),
            ..Default::default()
        };
        for record in &processing {
            let bucket = record.progress.min(100) / 10 * 10;
            *stats.by_progress.entry(bucket).or_default() += 1;
            if now.signed_duration_since(record.updated_at) > threshold {
                stats.stuck += 1;
            }
        }
        Ok(stats)
    }
}
