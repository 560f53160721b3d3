//! Persistence boundary: job status, progress, and saved documents.
//!
//! The store is the system of record for terminal status. `MemoryStore`
//! is the in-process implementation used by the CLI and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{AnalysisDocument, JobId, JobInput, JobRecord, JobStatus};
use crate::telemetry::metrics;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, id: JobId) -> Result<JobRecord>;

    /// Set status and progress, enforcing legal transitions. Refreshes the
    /// record's last-updated timestamp.
    async fn set_job_status(&self, id: JobId, status: JobStatus, progress: u8) -> Result<()>;

    async fn save_document(&self, id: JobId, document: &AnalysisDocument) -> Result<()>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>>;
}

/// Validate a status transition, returning an error if disallowed.
fn validate_transition(from: JobStatus, to: JobStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, JobRecord>,
    documents: HashMap<JobId, AnalysisDocument>,
}

/// In-memory job store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queued job record and return its id.
    pub async fn submit(&self, input: JobInput, priority: i32) -> JobId {
        let record = JobRecord::new(input, priority);
        let id = record.id;
        self.tables.write().await.jobs.insert(id, record);
        debug!(job_id = %id, "job submitted");
        id
    }

    /// Insert or replace a record as-is.
    pub async fn insert(&self, record: JobRecord) {
        self.tables.write().await.jobs.insert(record.id, record);
    }

    /// Overwrite the last-updated timestamp.
    pub async fn set_updated_at(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        record.updated_at = at;
        Ok(())
    }

    pub async fn document(&self, id: JobId) -> Option<AnalysisDocument> {
        self.tables.read().await.documents.get(&id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn get_job(&self, id: JobId) -> Result<JobRecord> {
        self.tables
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus, progress: u8) -> Result<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        validate_transition(record.status, status)?;

        let from = record.status;
        record.status = status;
        record.progress = progress.min(100);
        record.updated_at = Utc::now();

        if from != status {
            metrics::job_status_transitions().add(
                1,
                &[
                    KeyValue::new("from", from.to_string()),
                    KeyValue::new("to", status.to_string()),
                ],
            );
        }
        Ok(())
    }

    async fn save_document(&self, id: JobId, document: &AnalysisDocument) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.jobs.contains_key(&id) {
            return Err(Error::NotFound(format!("job {id}")));
        }
        tables.documents.insert(id, document.clone());
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<JobRecord> = tables
            .jobs
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
