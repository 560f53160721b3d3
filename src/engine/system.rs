//! Process-wide health sampler.
//!
//! Records resident memory and queue depth on a fixed interval. Crossing
//! the memory watermark triggers a reclamation pass over registered
//! reclaimers followed by a re-sample; a deep backlog raises a warning.
//! Never touches job or document state.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Process, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::queue::{JobQueue, QueueStatus};
use crate::cache::CacheManager;
use crate::telemetry::metrics;

/// Reports the process's resident memory.
pub trait MemoryProbe: Send + Sync {
    fn resident_bytes(&self) -> u64;
}

/// [`MemoryProbe`] backed by sysinfo.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl MemoryProbe for ProcessMemory {
    fn resident_bytes(&self) -> u64 {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return 0;
        };
        let mut system = System::new_with_specifics(RefreshKind::nothing());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(Process::memory).unwrap_or(0)
    }
}

/// Something that can release memory on request. Returns a count of
/// released items, for logging.
#[async_trait]
pub trait Reclaim: Send + Sync {
    async fn reclaim(&self) -> usize;
}

#[async_trait]
impl Reclaim for CacheManager {
    async fn reclaim(&self) -> usize {
        self.trim().await
    }
}

#[derive(Debug, Clone)]
pub struct SystemMonitorConfig {
    pub interval: Duration,
    pub memory_watermark_bytes: u64,
    /// Queued plus delayed jobs above this raise a warning.
    pub backlog_threshold: usize,
    /// Wait after a reclamation pass before re-sampling.
    pub resample_delay: Duration,
}

impl Default for SystemMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            memory_watermark_bytes: 1024 * 1024 * 1024,
            backlog_threshold: 20,
            resample_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSample {
    pub at: DateTime<Utc>,
    pub memory_bytes: u64,
    pub queue: QueueStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HealthAction {
    Reclaimed {
        released: usize,
        memory_before: u64,
        memory_after: u64,
    },
    BacklogWarning {
        backlog: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub sample: HealthSample,
    pub actions: Vec<HealthAction>,
}

pub struct SystemMonitor {
    queue: JobQueue,
    probe: Arc<dyn MemoryProbe>,
    reclaimers: Vec<Arc<dyn Reclaim>>,
    config: SystemMonitorConfig,
    latest: RwLock<Option<HealthSample>>,
    shutdown: Notify,
}

impl SystemMonitor {
    pub fn new(
        queue: JobQueue,
        probe: Arc<dyn MemoryProbe>,
        reclaimers: Vec<Arc<dyn Reclaim>>,
        config: SystemMonitorConfig,
    ) -> Self {
        Self {
            queue,
            probe,
            reclaimers,
            config,
            latest: RwLock::new(None),
            shutdown: Notify::new(),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Most recent sample, if any check has run.
    pub fn latest(&self) -> Option<HealthSample> {
        self.latest.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Sample every `interval` until shutdown.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "system monitor started"
        );
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("system monitor shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
            self.check().await;
        }
    }

    async fn memory_bytes(&self) -> u64 {
        let probe = Arc::clone(&self.probe);
        match tokio::task::spawn_blocking(move || probe.resident_bytes()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("memory probe join failed: {e}");
                0
            }
        }
    }

    async fn sample(&self) -> HealthSample {
        let sample = HealthSample {
            at: Utc::now(),
            memory_bytes: self.memory_bytes().await,
            queue: self.queue.status(),
        };
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(sample.clone());
        sample
    }

    /// Take one sample and react to it.
    pub async fn check(&self) -> HealthReport {
        let mut sample = self.sample().await;
        let mut actions = Vec::new();

        debug!(
            memory_mb = sample.memory_bytes / (1024 * 1024),
            queued = sample.queue.queued,
            in_flight = sample.queue.in_flight,
            "health sample"
        );

        if sample.memory_bytes > self.config.memory_watermark_bytes {
            let memory_before = sample.memory_bytes;
            let mut released = 0;
            for reclaimer in &self.reclaimers {
                released += reclaimer.reclaim().await;
            }
            metrics::memory_reclamations().add(1, &[]);

            tokio::time::sleep(self.config.resample_delay).await;
            sample = self.sample().await;

            warn!(
                memory_before_mb = memory_before / (1024 * 1024),
                memory_after_mb = sample.memory_bytes / (1024 * 1024),
                watermark_mb = self.config.memory_watermark_bytes / (1024 * 1024),
                released,
                "memory watermark crossed, reclaimed"
            );
            actions.push(HealthAction::Reclaimed {
                released,
                memory_before,
                memory_after: sample.memory_bytes,
            });
        }

        let backlog = sample.queue.queued + sample.queue.delayed;
        if backlog > self.config.backlog_threshold {
            warn!(
                backlog,
                threshold = self.config.backlog_threshold,
                in_flight = sample.queue.in_flight,
                "job backlog above threshold"
            );
            metrics::backlog_warnings().add(1, &[]);
            actions.push(HealthAction::BacklogWarning { backlog });
        }

        HealthReport { sample, actions }
    }
}
