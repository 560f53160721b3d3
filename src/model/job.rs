//! Job identity, persisted job records, and lifecycle status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Opaque handle into external storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Queue entry
// ---------------------------------------------------------------------------

/// One unit of work as the queue sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    /// Higher = sooner.
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    /// Number of failed executions so far.
    pub attempt: u32,
}

impl Job {
    pub fn new(id: JobId, priority: i32) -> Self {
        Self {
            id,
            priority,
            enqueued_at: Utc::now(),
            attempt: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Externally visible job status, owned by the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for admission (new, retried, or reclaimed).
    Queued,
    /// An execution owns the job.
    Processing,
    /// Final document saved.
    Completed,
    /// Terminal failure.
    Failed,
    /// Source recording could not be retrieved; a degraded document was saved.
    FileMissing,
}

impl JobStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Processing)  // progress update
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, FileMissing)
                | (Processing, Queued)      // stuck-job reset
                | (Failed, Queued) // manual retry
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::FileMissing
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::FileMissing => "file_missing",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Descriptive metadata about the coaching session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub title: Option<String>,
    pub coach_name: Option<String>,
    pub sport: Option<String>,
    pub age_group: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// What a job analyses: transcript text, a stored media reference, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub transcript: Option<String>,
    pub media_ref: Option<String>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl JobInput {
    pub fn from_transcript(text: impl Into<String>) -> Self {
        Self {
            transcript: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn from_media(media_ref: impl Into<String>) -> Self {
        Self {
            media_ref: Some(media_ref.into()),
            ..Default::default()
        }
    }

    pub fn metadata(mut self, metadata: SessionMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ---------------------------------------------------------------------------
// Persisted record
// ---------------------------------------------------------------------------

/// A job as held by the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub input: JobInput,
    pub status: JobStatus,
    /// Queue priority used when the job is (re)admitted. Higher = sooner.
    pub priority: i32,
    /// 0-100, observability and stuck detection only.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(input: JobInput, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            input,
            status: JobStatus::Queued,
            priority,
            progress: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Queued));
        assert!(Processing.can_transition_to(FileMissing));
        assert!(!Completed.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Completed));
        assert!(FileMissing.is_terminal());
    }
}
