//! Core data model.
//!
//! A job is one uploaded session awaiting analysis. Its result is an
//! analysis document: named sections of open key/value fields, checked
//! against a schema of required fields.

pub mod document;
pub mod job;
pub mod schema;

pub use document::{
    AnalysisDocument, DocumentQuality, Field, PartialDocument, Provenance, SectionPayload,
};
pub use job::{Job, JobId, JobInput, JobRecord, JobStatus, SessionMetadata};
pub use schema::{ContentRule, FieldSpec, Schema, Section, SectionSchema, Severity};
