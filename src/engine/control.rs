//! Control plane: feeds persisted queued jobs into the queue and
//! supervises the background monitors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::queue::JobQueue;
use super::stuck::StuckJobMonitor;
use super::system::SystemMonitor;
use crate::error::Result;

/// Configuration for the control plane.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// How often the store is polled for queued jobs.
    pub poll_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// The control plane loop: enqueue pending work, run monitors, stop on signal.
#[derive(Clone)]
pub struct ControlPlane {
    queue: JobQueue,
    stuck: Arc<StuckJobMonitor>,
    system: Arc<SystemMonitor>,
    config: ControlConfig,
    shutdown: Arc<Notify>,
}

impl ControlPlane {
    pub fn new(
        queue: JobQueue,
        stuck: Arc<StuckJobMonitor>,
        system: Arc<SystemMonitor>,
        config: ControlConfig,
    ) -> Self {
        Self {
            queue,
            stuck,
            system,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn stuck_monitor(&self) -> &Arc<StuckJobMonitor> {
        &self.stuck
    }

    pub fn system_monitor(&self) -> &Arc<SystemMonitor> {
        &self.system
    }

    /// Signal the control plane to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the control plane loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let stuck = Arc::clone(&self.stuck);
        let stuck_task = tokio::spawn(async move { stuck.run().await });
        let system = Arc::clone(&self.system);
        let system_task = tokio::spawn(async move { system.run().await });

        info!(
            max_concurrent = self.queue.config().max_concurrent,
            "control plane started"
        );

        loop {
            match self.queue.enqueue_pending().await {
                Ok(0) => {}
                Ok(n) => debug!(admitted = n, "enqueued pending jobs"),
                Err(e) => error!("enqueue_pending error: {e}"),
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("control plane shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.stuck.shutdown();
        self.system.shutdown();
        let _ = tokio::join!(stuck_task, system_task);
        Ok(())
    }
}
