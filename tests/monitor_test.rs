//! Integration tests for the stuck-job and system monitors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use session_feedback::engine::system::{HealthAction, MemoryProbe, Reclaim};
use session_feedback::engine::{
    Executor, JobQueue, QueueConfig, StuckConfig, StuckJobMonitor, SystemMonitor,
    SystemMonitorConfig,
};
use session_feedback::error::Result;
use session_feedback::model::{Job, JobId, JobInput, JobStatus};
use session_feedback::store::{JobStore, MemoryStore};

fn stuck_config() -> StuckConfig {
    StuckConfig {
        interval: Duration::from_secs(300),
        threshold: Duration::from_secs(600),
    }
}

async fn processing_job(store: &MemoryStore, progress: u8, idle: TimeDelta) -> JobId {
    let id = store.submit(JobInput::from_transcript("text"), 0).await;
    store
        .set_job_status(id, JobStatus::Processing, progress)
        .await
        .unwrap();
    store.set_updated_at(id, Utc::now() - idle).await.unwrap();
    id
}

// ---------------------------------------------------------------------------
// Stuck-job monitor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_processing_job_is_reset() {
    let store = Arc::new(MemoryStore::new());
    let stale = processing_job(&store, 60, TimeDelta::minutes(15)).await;
    let fresh = processing_job(&store, 25, TimeDelta::minutes(2)).await;
    let monitor = StuckJobMonitor::new(store.clone(), stuck_config());

    let incidents = monitor.scan().await.unwrap();

    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].job_id, stale);
    assert_eq!(incidents[0].last_progress, 60);
    assert!(incidents[0].stuck_for >= Duration::from_secs(15 * 60));

    let stale = store.get_job(stale).await.unwrap();
    assert_eq!(stale.status, JobStatus::Queued);
    assert_eq!(stale.progress, 0);

    let fresh = store.get_job(fresh).await.unwrap();
    assert_eq!(fresh.status, JobStatus::Processing);
    assert_eq!(fresh.progress, 25);
}

#[tokio::test]
async fn scan_ignores_jobs_in_other_states() {
    let store = Arc::new(MemoryStore::new());
    let queued = store.submit(JobInput::from_transcript("text"), 0).await;
    store
        .set_updated_at(queued, Utc::now() - TimeDelta::hours(2))
        .await
        .unwrap();
    let monitor = StuckJobMonitor::new(store.clone(), stuck_config());

    assert!(monitor.scan().await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_bucket_by_progress() {
    let store = Arc::new(MemoryStore::new());
    processing_job(&store, 5, TimeDelta::minutes(1)).await;
    processing_job(&store, 25, TimeDelta::minutes(20)).await;
    processing_job(&store, 29, TimeDelta::minutes(1)).await;
    processing_job(&store, 100, TimeDelta::minutes(1)).await;
    let monitor = StuckJobMonitor::new(store.clone(), stuck_config());

    let stats = monitor.stats().await.unwrap();
    assert_eq!(stats.processing, 4);
    assert_eq!(stats.stuck, 1);
    assert_eq!(stats.by_progress.get(&0), Some(&1));
    assert_eq!(stats.by_progress.get(&20), Some(&2));
    assert_eq!(stats.by_progress.get(&100), Some(&1));
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let monitor = Arc::new(StuckJobMonitor::new(
        Arc::new(MemoryStore::new()),
        stuck_config(),
    ));
    let task = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.run().await })
    };
    monitor.shutdown();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("monitor did not stop")
        .unwrap();
}

// ---------------------------------------------------------------------------
// System monitor
// ---------------------------------------------------------------------------

/// Reports a scripted memory figure that drops once reclaimed.
struct FakeMemory {
    bytes: AtomicU64,
}

impl MemoryProbe for FakeMemory {
    fn resident_bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

struct FakeReclaimer {
    memory: Arc<FakeMemory>,
    passes: AtomicUsize,
}

#[async_trait]
impl Reclaim for FakeReclaimer {
    async fn reclaim(&self) -> usize {
        self.passes.fetch_add(1, Ordering::SeqCst);
        self.memory.bytes.store(100, Ordering::SeqCst);
        7
    }
}

struct Idle;

#[async_trait]
impl Executor for Idle {
    async fn execute(&self, _: &Job) -> Result<()> {
        std::future::pending().await
    }
}

fn idle_queue(max_concurrent: usize) -> JobQueue {
    JobQueue::new(
        Arc::new(Idle),
        Arc::new(MemoryStore::new()),
        QueueConfig {
            max_concurrent,
            ..QueueConfig::default()
        },
    )
}

fn system_config() -> SystemMonitorConfig {
    SystemMonitorConfig {
        interval: Duration::from_secs(30),
        memory_watermark_bytes: 1_000,
        backlog_threshold: 2,
        resample_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn watermark_triggers_reclaim_and_resample() {
    let memory = Arc::new(FakeMemory {
        bytes: AtomicU64::new(5_000),
    });
    let reclaimer = Arc::new(FakeReclaimer {
        memory: memory.clone(),
        passes: AtomicUsize::new(0),
    });
    let monitor = SystemMonitor::new(
        idle_queue(1),
        memory.clone(),
        vec![reclaimer.clone() as Arc<dyn Reclaim>],
        system_config(),
    );

    let report = monitor.check().await;

    assert_eq!(reclaimer.passes.load(Ordering::SeqCst), 1);
    assert_eq!(
        report.actions,
        vec![HealthAction::Reclaimed {
            released: 7,
            memory_before: 5_000,
            memory_after: 100,
        }]
    );
    assert_eq!(report.sample.memory_bytes, 100);
    assert_eq!(monitor.latest().unwrap().memory_bytes, 100);
}

#[tokio::test]
async fn backlog_over_threshold_warns_without_touching_queue() {
    let memory = Arc::new(FakeMemory {
        bytes: AtomicU64::new(10),
    });
    let queue = idle_queue(1);
    for _ in 0..4 {
        queue.enqueue(JobId::new(), 0);
    }
    let before = queue.status();
    let monitor = SystemMonitor::new(queue.clone(), memory, Vec::new(), system_config());

    let report = monitor.check().await;

    assert_eq!(report.actions, vec![HealthAction::BacklogWarning { backlog: 3 }]);
    assert_eq!(queue.status(), before);
}

#[tokio::test]
async fn healthy_sample_takes_no_action() {
    let memory = Arc::new(FakeMemory {
        bytes: AtomicU64::new(10),
    });
    let monitor = SystemMonitor::new(idle_queue(2), memory, Vec::new(), system_config());

    let report = monitor.check().await;
    assert!(report.actions.is_empty());
    assert_eq!(report.sample.queue.max_concurrent, 2);
}
