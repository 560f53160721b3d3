//! Fans a request out to every provider and merges what comes back.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{Instrument, debug, info_span, warn};

use crate::model::{AnalysisDocument, ContentRule, PartialDocument, Provenance};
use crate::provider::{ProviderRegistry, ProviderRequest, invoke};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for each provider call.
    pub call_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
        }
    }
}

pub struct Orchestrator {
    registry: ProviderRegistry,
    rule: ContentRule,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(registry: ProviderRegistry, rule: ContentRule, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            rule,
            config,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Call every provider concurrently and merge contributions in
    /// registration order. A failing provider contributes nothing; this
    /// never fails.
    pub async fn run(&self, request: &ProviderRequest) -> AnalysisDocument {
        let span = info_span!("orchestrator.run", providers = self.registry.providers().len());
        async {
            let mut calls = JoinSet::new();
            for (index, provider) in self.registry.providers().iter().enumerate() {
                let provider = Arc::clone(provider);
                let request = request.clone();
                let deadline = self.config.call_timeout;
                calls.spawn(
                    async move { (index, invoke(provider.as_ref(), &request, deadline).await) }
                        .in_current_span(),
                );
            }

            let mut results: Vec<Option<PartialDocument>> = vec![None; self.registry.providers().len()];
            while let Some(joined) = calls.join_next().await {
                match joined {
                    Ok((index, partial)) => results[index] = partial,
                    Err(e) => warn!("provider task aborted: {e}"),
                }
            }

            let mut doc = AnalysisDocument::new();
            for (provider, partial) in self.registry.providers().iter().zip(results) {
                let Some(partial) = partial else { continue };
                let provenance = Provenance::Provider(provider.name().to_string());
                let merged = doc.merge_partial(&partial, &provenance, &self.rule);
                debug!(provider = provider.name(), fields = merged, "merged provider output");
            }
            doc
        }
        .instrument(span)
        .await
    }
}
