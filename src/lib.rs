//! # session-feedback
//!
//! Resilient analysis pipeline that turns coaching-session transcripts into
//! multi-section structured feedback documents.
//!
//! A bounded-concurrency job queue admits work, an orchestrator fans each
//! job out to independent analysis providers, and a completeness validator
//! drives bounded gap-filling rounds until the document satisfies its
//! schema. Background monitors reclaim stuck jobs and watch process health.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod model;
pub mod provider;
pub mod store;
pub mod telemetry;
