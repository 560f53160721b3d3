//! The job executor: resolve input, orchestrate, fill gaps, persist.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::filler::{GapFillConfig, GapFiller};
use super::gaps::HeuristicClassifier;
use super::fallback::degraded_document;
use super::orchestrator::{Orchestrator, OrchestratorConfig};
use super::validator::CompletenessValidator;
use crate::cache::{CacheManager, MEDIA_REGION};
use crate::engine::Executor;
use crate::error::{Error, Result};
use crate::media::{MediaContent, MediaSource};
use crate::model::{Job, JobId, JobInput, JobStatus, Schema};
use crate::provider::{ProviderRegistry, ProviderRequest};
use crate::store::JobStore;

/// Progress checkpoints written to the store.
mod progress {
    pub const STARTED: u8 = 5;
    pub const INPUT_READY: u8 = 25;
    pub const ANALYSED: u8 = 60;
    pub const FILLED: u8 = 90;
    pub const DONE: u8 = 100;
}

pub struct AnalysisPipeline {
    store: Arc<dyn JobStore>,
    media: Arc<dyn MediaSource>,
    cache: Arc<CacheManager>,
    orchestrator: Orchestrator,
    filler: GapFiller,
    schema: Schema,
}

impl AnalysisPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        media: Arc<dyn MediaSource>,
        cache: Arc<CacheManager>,
        orchestrator: Orchestrator,
        filler: GapFiller,
    ) -> Self {
        let schema = filler.validator().schema().clone();
        Self {
            store,
            media,
            cache,
            orchestrator,
            filler,
            schema,
        }
    }

    /// Wire a pipeline for `schema` with the default gap classifier.
    pub fn assemble(
        store: Arc<dyn JobStore>,
        media: Arc<dyn MediaSource>,
        cache: Arc<CacheManager>,
        registry: ProviderRegistry,
        schema: Schema,
        orchestrator: OrchestratorConfig,
        gap_fill: GapFillConfig,
    ) -> Self {
        let classifier = HeuristicClassifier {
            token_limit_threshold: gap_fill.token_limit_threshold,
        };
        let validator = CompletenessValidator::new(schema.clone(), Arc::new(classifier));
        let orchestrator = Orchestrator::new(registry.clone(), schema.rule, orchestrator);
        let filler = GapFiller::new(registry, validator, gap_fill);
        Self::new(store, media, cache, orchestrator, filler)
    }

    async fn fetch_media(&self, media_ref: &str) -> Result<MediaContent> {
        let media = Arc::clone(&self.media);
        self.cache
            .with_cache(media_ref, MEDIA_REGION, None, || async move {
                media.fetch(media_ref).await
            })
            .await
    }

    /// Transcript text for a job. Inline transcripts win over media.
    async fn resolve_text(&self, input: &JobInput) -> Result<String> {
        if let Some(text) = input.transcript.as_ref().filter(|t| !t.trim().is_empty()) {
            return Ok(text.clone());
        }
        match &input.media_ref {
            Some(media_ref) => Ok(self.fetch_media(media_ref).await?.text),
            None => Err(Error::Other(
                "job has neither a transcript nor a media reference".to_string(),
            )),
        }
    }

    async fn degrade(&self, id: JobId, reason: &str) -> Result<()> {
        warn!(job_id = %id, reason, "source unavailable, saving degraded document");
        let doc = degraded_document(&self.schema, reason);
        self.store.save_document(id, &doc).await?;
        self.store
            .set_job_status(id, JobStatus::FileMissing, progress::DONE)
            .await
    }
}

#[async_trait]
impl Executor for AnalysisPipeline {
    async fn execute(&self, job: &Job) -> Result<()> {
        let record = self.store.get_job(job.id).await?;
        self.store
            .set_job_status(job.id, JobStatus::Processing, progress::STARTED)
            .await?;

        let text = match self.resolve_text(&record.input).await {
            Ok(text) => text,
            Err(Error::SourceUnavailable(reason)) => return self.degrade(job.id, &reason).await,
            Err(e) => return Err(e),
        };
        self.store
            .set_job_status(job.id, JobStatus::Processing, progress::INPUT_READY)
            .await?;

        let request = ProviderRequest::new(
            text,
            record.input.media_ref.clone(),
            record.input.metadata.clone(),
        );
        let mut doc = self.orchestrator.run(&request).await;
        self.store
            .set_job_status(job.id, JobStatus::Processing, progress::ANALYSED)
            .await?;

        let outcome = self.filler.fill(&request, &mut doc).await;
        self.store
            .set_job_status(job.id, JobStatus::Processing, progress::FILLED)
            .await?;

        self.store.save_document(job.id, &doc).await?;
        self.store
            .set_job_status(job.id, JobStatus::Completed, progress::DONE)
            .await?;

        info!(
            job_id = %job.id,
            quality = ?doc.quality,
            score = outcome.report.completeness_score,
            rounds = outcome.rounds,
            "analysis complete"
        );
        Ok(())
    }
}
