//! Priority-ordered, bounded-concurrency job queue.
//!
//! The queue owns queued and in-flight membership. A job id is in at most
//! one of {queued, in flight, cooling down} at any time, and no more than
//! `max_concurrent` jobs execute at once. Execution is delegated to an
//! [`Executor`]; failures are retried by re-insertion at the head of the
//! queue with boosted priority, never by recursion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::retry::{FailureClass, RetryPolicy, classify};
use crate::error::Result;
use crate::model::{Job, JobId, JobStatus};
use crate::store::JobStore;
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

/// Runs one job to completion.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<()>;
}

/// Configuration for the job queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    /// Pause between the end of one execution and the next admission pass.
    pub admission_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            admission_delay: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

/// Read-only projection of queue membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub in_flight: usize,
    pub max_concurrent: usize,
    pub in_flight_ids: Vec<JobId>,
    /// Jobs waiting out a retry delay.
    pub delayed: usize,
}

#[derive(Default)]
struct QueueState {
    /// Sorted by (priority desc, enqueued_at asc).
    queued: Vec<Job>,
    /// Job id -> admission generation.
    in_flight: HashMap<JobId, u64>,
    /// Job id -> generation of the pending delayed re-insert.
    delayed: HashMap<JobId, u64>,
    generation: u64,
}

impl QueueState {
    fn contains(&self, id: JobId) -> bool {
        self.in_flight.contains_key(&id)
            || self.delayed.contains_key(&id)
            || self.queued.iter().any(|j| j.id == id)
    }

    fn insert(&mut self, job: Job) {
        self.queued.push(job);
        // Stable sort keeps insertion order for identical keys.
        self.queued.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });
    }

    /// Re-insert a retried job ahead of everything queued. Its priority is
    /// raised past the current head if the boost alone would not get it there.
    fn insert_retry(&mut self, mut job: Job) {
        if let Some(head) = self.queued.first()
            && head.priority >= job.priority
        {
            job.priority = head.priority.saturating_add(1);
        }
        self.insert(job);
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty() && self.delayed.is_empty()
    }
}

struct Inner {
    state: Mutex<QueueState>,
    executor: Arc<dyn Executor>,
    store: Arc<dyn JobStore>,
    config: QueueConfig,
    changed: Notify,
}

/// What happened to a finished execution.
enum Disposition {
    Completed,
    Requeued,
    Delayed { generation: u64, job: Job, delay: Duration },
    Failed,
    Unowned,
}

/// Handle to the queue. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn new(executor: Arc<dyn Executor>, store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                executor,
                store,
                config,
                changed: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Queue a job and run an admission pass. Returns false (and does
    /// nothing) if the job is already queued, in flight, or cooling down.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, id: JobId, priority: i32) -> bool {
        let accepted = {
            let mut state = self.lock();
            if state.contains(id) {
                false
            } else {
                state.insert(Job::new(id, priority));
                true
            }
        };

        metrics::jobs_enqueued().add(
            1,
            &[KeyValue::new("result", if accepted { "ok" } else { "duplicate" })],
        );
        if accepted {
            debug!(job_id = %id, priority, "job enqueued");
            self.admit();
        } else {
            debug!(job_id = %id, "job already queued or in flight, ignoring");
        }
        accepted
    }

    /// Unregister a job. An execution already in progress keeps running,
    /// but its outcome is discarded.
    pub fn cancel(&self, id: JobId) -> bool {
        let removed = {
            let mut state = self.lock();
            let before = state.queued.len();
            state.queued.retain(|j| j.id != id);
            let was_queued = state.queued.len() != before;
            let was_in_flight = state.in_flight.remove(&id).is_some();
            let was_delayed = state.delayed.remove(&id).is_some();
            was_queued || was_in_flight || was_delayed
        };
        if removed {
            info!(job_id = %id, "job cancelled");
            self.inner.changed.notify_waiters();
            self.admit();
        }
        removed
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        let mut in_flight_ids: Vec<JobId> = state.in_flight.keys().copied().collect();
        in_flight_ids.sort();
        QueueStatus {
            queued: state.queued.len(),
            in_flight: state.in_flight.len(),
            max_concurrent: self.inner.config.max_concurrent,
            in_flight_ids,
            delayed: state.delayed.len(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    /// Resolve once nothing is queued, in flight, or cooling down.
    pub async fn wait_idle(&self) {
        loop {
            let changed = self.inner.changed.notified();
            if self.is_idle() {
                return;
            }
            changed.await;
        }
    }

    /// Enqueue every job the store reports as queued. Returns how many
    /// were newly accepted.
    pub async fn enqueue_pending(&self) -> Result<usize> {
        let pending = self.inner.store.list_by_status(JobStatus::Queued).await?;
        Ok(pending
            .into_iter()
            .filter(|record| self.enqueue(record.id, record.priority))
            .count())
    }

    /// Admit queued jobs while slots are free.
    fn admit(&self) {
        let admitted: Vec<(Job, u64)> = {
            let mut state = self.lock();
            let mut admitted = Vec::new();
            while state.in_flight.len() < self.inner.config.max_concurrent
                && !state.queued.is_empty()
            {
                let job = state.queued.remove(0);
                let generation = state.next_generation();
                state.in_flight.insert(job.id, generation);
                admitted.push((job, generation));
            }
            admitted
        };

        for (job, generation) in admitted {
            let queue = self.clone();
            tokio::spawn(async move { queue.run(job, generation).await });
        }
    }

    async fn run(self, job: Job, generation: u64) {
        let span = start_job_span(job.id, job.attempt);
        record_state_transition(&span, "queued", "in_flight");

        let result = self
            .inner
            .executor
            .execute(&job)
            .instrument(span.clone())
            .await;

        self.finish(job, generation, result, &span).await;

        tokio::time::sleep(self.inner.config.admission_delay).await;
        self.admit();
    }

    async fn finish(&self, mut job: Job, generation: u64, result: Result<()>, span: &Span) {
        let id = job.id;
        let policy = &self.inner.config.retry;

        let failure = result.err().map(|err| {
            let class = classify(&err);
            (err, class)
        });

        let disposition = {
            let mut state = self.lock();
            if state.in_flight.get(&id) != Some(&generation) {
                Disposition::Unowned
            } else {
                state.in_flight.remove(&id);
                match &failure {
                    None => Disposition::Completed,
                    Some((_, class)) if class.is_retryable() && job.attempt < policy.max_attempts => {
                        job.attempt += 1;
                        job.priority = job.priority.saturating_add(policy.priority_boost);
                        let delay = policy.delay(job.attempt, *class);
                        if delay.is_zero() {
                            state.insert_retry(job.clone());
                            Disposition::Requeued
                        } else {
                            let generation = state.next_generation();
                            state.delayed.insert(id, generation);
                            Disposition::Delayed {
                                generation,
                                job: job.clone(),
                                delay,
                            }
                        }
                    }
                    Some(_) => Disposition::Failed,
                }
            }
        };

        let outcome = match disposition {
            Disposition::Unowned => {
                info!(job_id = %id, "execution finished for a cancelled job, discarding outcome");
                "cancelled"
            }
            Disposition::Completed => {
                record_state_transition(span, "in_flight", "completed");
                info!(job_id = %id, attempt = job.attempt, "job completed");
                "completed"
            }
            Disposition::Requeued => {
                record_state_transition(span, "in_flight", "queued");
                if let Some((err, _)) = &failure {
                    warn!(job_id = %id, attempt = job.attempt, error = %err, "job failed, requeued");
                }
                "retried"
            }
            Disposition::Delayed {
                generation,
                job,
                delay,
            } => {
                record_state_transition(span, "in_flight", "delayed");
                if let Some((err, class)) = &failure {
                    warn!(
                        job_id = %id,
                        attempt = job.attempt,
                        delay_ms = delay.as_millis() as u64,
                        circuit_open = matches!(class, FailureClass::CircuitOpen { .. }),
                        error = %err,
                        "job failed, retrying after delay"
                    );
                }
                self.schedule_release(job, generation, delay);
                "retried"
            }
            Disposition::Failed => {
                record_state_transition(span, "in_flight", "failed");
                if let Some((err, class)) = &failure {
                    error!(
                        job_id = %id,
                        attempts = job.attempt + 1,
                        retryable = class.is_retryable(),
                        error = %err,
                        "job failed terminally"
                    );
                }
                if let Err(e) = self
                    .inner
                    .store
                    .set_job_status(id, JobStatus::Failed, 0)
                    .await
                {
                    warn!(job_id = %id, "could not record terminal failure: {e}");
                }
                "failed"
            }
        };

        metrics::job_outcomes().add(1, &[KeyValue::new("result", outcome)]);
        self.inner.changed.notify_waiters();
    }

    fn schedule_release(&self, job: Job, generation: u64, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.release(job, generation);
        });
    }

    /// Move a cooled-down job back into the queue, unless it was cancelled.
    fn release(&self, job: Job, generation: u64) {
        let id = job.id;
        let released = {
            let mut state = self.lock();
            if state.delayed.get(&id) == Some(&generation) {
                state.delayed.remove(&id);
                state.insert_retry(job);
                true
            } else {
                false
            }
        };
        if released {
            debug!(job_id = %id, "retry delay elapsed, job requeued");
            self.inner.changed.notify_waiters();
            self.admit();
        }
    }
}
