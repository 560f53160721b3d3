//! Bounded gap-filling loop.
//!
//! Each round groups the current gaps by cause and owning provider, runs
//! the repair strategy for that cause, merges the results without
//! regressing existing fields, and re-validates. Gaps left after the last
//! round get critical-only placeholder content.

use std::collections::BTreeMap;
use std::time::Duration;

use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{Instrument, debug, info, info_span, warn};

use super::fallback::{apply_emergency_fallback, synthesize_field};
use super::gaps::{Gap, GapCause};
use super::text::{split_chunks, truncate_chars};
use super::validator::{CompletenessReport, CompletenessValidator};
use crate::model::{AnalysisDocument, DocumentQuality, Provenance, Section};
use crate::provider::{ProviderRegistry, ProviderRequest, invoke};
use crate::telemetry::metrics;

#[derive(Debug, Clone)]
pub struct GapFillConfig {
    pub max_rounds: u32,
    /// Input length for `token_limit` retries.
    pub truncate_chars: usize,
    /// Chunk length for `timeout` retries.
    pub chunk_chars: usize,
    /// Per-chunk deadline for `timeout` retries.
    pub chunk_timeout: Duration,
    /// Deadline for every other repair call.
    pub call_timeout: Duration,
    pub token_limit_threshold: usize,
}

impl Default for GapFillConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            truncate_chars: 6000,
            chunk_chars: 4000,
            chunk_timeout: Duration::from_secs(45),
            call_timeout: Duration::from_secs(120),
            token_limit_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FillOutcome {
    /// Repair rounds actually run.
    pub rounds: u32,
    /// Validation after the last round and any fallback.
    pub report: CompletenessReport,
    pub synthesized: usize,
    pub fallback_fields: usize,
}

pub struct GapFiller {
    registry: ProviderRegistry,
    validator: CompletenessValidator,
    config: GapFillConfig,
}

impl GapFiller {
    pub fn new(
        registry: ProviderRegistry,
        validator: CompletenessValidator,
        config: GapFillConfig,
    ) -> Self {
        Self {
            registry,
            validator,
            config,
        }
    }

    pub fn validator(&self) -> &CompletenessValidator {
        &self.validator
    }

    /// Repair `doc` in place until it validates or the round budget runs out.
    pub async fn fill(&self, request: &ProviderRequest, doc: &mut AnalysisDocument) -> FillOutcome {
        let owners = self.registry.ownership();
        let mut report = self.validator.validate(doc, &owners);
        let mut rounds = 0;
        let mut synthesized = 0;

        for gap in &report.gaps {
            metrics::gaps_detected().add(
                1,
                &[
                    KeyValue::new("cause", gap.cause.as_str()),
                    KeyValue::new("section", gap.section.as_str()),
                ],
            );
        }

        while !report.is_complete && rounds < self.config.max_rounds {
            rounds += 1;
            let span = info_span!("gap_fill.round", round = rounds, gaps = report.gaps.len());
            synthesized += self.round(request, doc, &report.gaps).instrument(span).await;
            report = self.validator.validate(doc, &owners);
            debug!(
                round = rounds,
                score = report.completeness_score,
                remaining = report.gaps.len(),
                "gap-fill round finished"
            );
        }
        metrics::gap_fill_rounds().record(rounds as u64, &[]);

        let mut fallback_fields = 0;
        if report.is_complete {
            doc.quality = if doc.count_by_provenance(|p| *p == Provenance::Placeholder) == 0 {
                DocumentQuality::Complete
            } else {
                DocumentQuality::BestEffort
            };
        } else {
            warn!(
                rounds,
                remaining = report.gaps.len(),
                critical = report.critical_gaps(),
                "gaps remain after round budget"
            );
            let schema = self.validator.schema();
            fallback_fields = apply_emergency_fallback(doc, schema, &request.text);
            report = self.validator.validate(doc, &owners);
        }

        info!(
            rounds,
            score = report.completeness_score,
            complete = report.is_complete,
            synthesized,
            fallback_fields,
            "gap filling done"
        );

        FillOutcome {
            rounds,
            report,
            synthesized,
            fallback_fields,
        }
    }

    /// Run one repair pass. Returns the number of synthesized fields.
    async fn round(&self, request: &ProviderRequest, doc: &mut AnalysisDocument, gaps: &[Gap]) -> usize {
        let mut grouped: BTreeMap<GapCause, BTreeMap<Option<String>, Vec<&Gap>>> = BTreeMap::new();
        for gap in gaps {
            grouped
                .entry(gap.cause)
                .or_default()
                .entry(gap.provider.clone())
                .or_default()
                .push(gap);
        }

        let mut synthesized = 0;
        for (cause, by_provider) in grouped {
            for (provider, gaps) in by_provider {
                if cause == GapCause::IncompleteResponse {
                    synthesized += self.synthesize(request, doc, &gaps);
                    continue;
                }
                let Some(name) = provider else {
                    debug!(%cause, "no provider owns these sections, leaving for fallback");
                    continue;
                };
                let sections: Vec<Section> = gaps.iter().map(|g| g.section).collect();
                self.repair(cause, &name, request, sections, doc).await;
            }
        }
        synthesized
    }

    fn synthesize(&self, request: &ProviderRequest, doc: &mut AnalysisDocument, gaps: &[&Gap]) -> usize {
        let rule = self.validator.schema().rule;
        let mut written = 0;
        for gap in gaps {
            for field in &gap.missing_fields {
                let value = synthesize_field(gap.section, field, &request.text);
                if doc.merge_field(gap.section, field, value, &rule) {
                    written += 1;
                }
            }
        }
        written
    }

    async fn repair(
        &self,
        cause: GapCause,
        provider_name: &str,
        request: &ProviderRequest,
        sections: Vec<Section>,
        doc: &mut AnalysisDocument,
    ) {
        let Some(provider) = self.registry.get(provider_name) else {
            return;
        };
        let rule = self.validator.schema().rule;
        let provenance = Provenance::Provider(provider_name.to_string());
        let scoped = request.scoped(sections);

        debug!(provider = provider_name, %cause, sections = ?scoped.target_sections, "repairing gaps");

        match cause {
            GapCause::TokenLimit => {
                let text = truncate_chars(&request.text, self.config.truncate_chars).to_string();
                let req = scoped.with_text(text);
                if let Some(partial) = invoke(provider.as_ref(), &req, self.config.call_timeout).await {
                    doc.merge_partial(&partial, &provenance, &rule);
                }
            }
            GapCause::JsonParsing => {
                let req = scoped.strict();
                if let Some(partial) = invoke(provider.as_ref(), &req, self.config.call_timeout).await {
                    doc.merge_partial(&partial, &provenance, &rule);
                }
            }
            GapCause::Timeout => {
                for chunk in split_chunks(&request.text, self.config.chunk_chars) {
                    let req = scoped.clone().with_text(chunk);
                    if let Some(partial) =
                        invoke(provider.as_ref(), &req, self.config.chunk_timeout).await
                    {
                        doc.merge_partial(&partial, &provenance, &rule);
                    }
                }
            }
            GapCause::ApiFailure => {
                if let Some(partial) = invoke(provider.as_ref(), &scoped, self.config.call_timeout).await {
                    doc.merge_partial(&partial, &provenance, &rule);
                }
            }
            GapCause::IncompleteResponse => {}
        }
    }
}
